//! Session and strategy persistence
//!
//! Called by the orchestrator at stage boundaries only. In-memory by
//! default; Postgres when a database URL is configured.

pub mod postgres;

pub use postgres::PostgresStore;

use crate::models::{ConversationSession, Strategy};
use crate::Result;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Trait for persistence collaborators
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn load_session(&self, session_id: Uuid) -> Result<Option<ConversationSession>>;
    async fn save_session(&self, session: &ConversationSession) -> Result<()>;
    async fn save_strategy(&self, strategy: &Strategy) -> Result<()>;
    /// Strategies owned by `user_id`, oldest first
    async fn load_prior_strategies(&self, user_id: Uuid) -> Result<Vec<Strategy>>;

    /// Write a turn's outcome. `saved` is a strategy that became saved in
    /// the turn. Stores that can should write both or neither.
    async fn commit_turn(&self, session: &ConversationSession, saved: Option<&Strategy>) -> Result<()> {
        if let Some(strategy) = saved {
            self.save_strategy(strategy).await?;
        }
        self.save_session(session).await
    }
}

/// In-memory store for development and tests
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<Uuid, ConversationSession>>>,
    strategies: Arc<RwLock<HashMap<Uuid, Strategy>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            strategies: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Persistence for InMemoryStore {
    async fn load_session(&self, session_id: Uuid) -> Result<Option<ConversationSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn save_session(&self, session: &ConversationSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn save_strategy(&self, strategy: &Strategy) -> Result<()> {
        let mut strategies = self.strategies.write().await;
        strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn load_prior_strategies(&self, user_id: Uuid) -> Result<Vec<Strategy>> {
        let strategies = self.strategies.read().await;

        let mut owned: Vec<Strategy> = strategies
            .values()
            .filter(|s| s.owner_id == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.created_at);

        Ok(owned)
    }

    async fn commit_turn(&self, session: &ConversationSession, saved: Option<&Strategy>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let mut strategies = self.strategies.write().await;
        if let Some(strategy) = saved {
            strategies.insert(strategy.id, strategy.clone());
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }
}

/// Postgres when `POSTGRES_URL` or `DATABASE_URL` is set, in-memory otherwise.
pub fn build_store_from_env() -> Arc<dyn Persistence> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match PostgresStore::connect_lazy(&url) {
            Ok(store) => {
                info!("Persistence backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres persistence, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Persistence backend: in-memory");
    Arc::new(InMemoryStore::new())
}
