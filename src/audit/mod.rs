//! Turn audit log
//!
//! Every handled turn is kept as a `TurnRecord` (plans, observations,
//! safety review, reasoning trace) and can be checked for tampering.

use crate::models::TurnRecord;
use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, TurnRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a turn record
    pub async fn record(&self, record: TurnRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        let mut records = self.records.write().await;
        records.insert(audit_id, record);
        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<TurnRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&audit_id).cloned())
    }

    /// Audit IDs of one session, oldest first
    pub async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.session_id == session_id)
            .map(|record| (record.audit_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Audit IDs of one user across sessions, oldest first
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.user_id == user_id)
            .map(|record| (record.audit_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Recompute the inputs hash and compare with the stored one
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        if let Some(record) = records.get(&audit_id) {
            let current_hash = turn_inputs_hash(record.session_id, &record.user_message);
            Ok(current_hash == record.inputs_hash)
        } else {
            Ok(false)
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint of one inbound turn
pub fn turn_inputs_hash(session_id: Uuid, message: &str) -> String {
    compute_hash(&(session_id, message))
}

/// SHA-256 of the JSON encoding of `value`, hex encoded.
/// Serialization streams straight into the hasher.
pub fn compute_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BusinessStage;
    use chrono::Utc;

    fn record(session_id: Uuid, message: &str) -> TurnRecord {
        TurnRecord {
            audit_id: Uuid::new_v4(),
            session_id,
            user_id: Uuid::new_v4(),
            user_message: message.to_string(),
            inputs_hash: turn_inputs_hash(session_id, message),
            stage_before: BusinessStage::Intro,
            stage_after: BusinessStage::ElementCollection,
            plans: vec![],
            observations: vec![],
            safety_review: None,
            reply: "ok".into(),
            reasoning_trace: vec![],
            created_at: Utc::now(),
            execution_time_ms: 1,
        }
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(compute_hash("保证收益"), compute_hash("保证收益"));
        assert_ne!(compute_hash("a"), compute_hash("b"));
        assert_eq!(compute_hash("a").len(), 64);
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let session_id = Uuid::new_v4();
        let id = log.record(record(session_id, "我想投资")).await.unwrap();

        assert!(log.verify_integrity(id).await.unwrap());
        assert_eq!(log.list_for_session(session_id).await.unwrap(), vec![id]);
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_record_fails_verification() {
        let log = AuditLog::new();
        let mut tampered = record(Uuid::new_v4(), "原始消息");
        tampered.user_message = "篡改后的消息".into();
        let id = log.record(tampered).await.unwrap();

        assert!(!log.verify_integrity(id).await.unwrap());
    }
}
