//! Postgres persistence
//!
//! Sessions and strategies are stored as JSON documents keyed by id,
//! with a few indexed columns for lookup. The schema is created lazily
//! on first use.

use crate::error::EngineError;
use crate::models::{ConversationSession, Strategy};
use crate::state::Persistence;
use crate::Result;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;
use uuid::Uuid;

pub struct PostgresStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresStore {
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect_lazy(url)?;
        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;

        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS etf_sessions (
                      session_id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      stage TEXT NOT NULL,
                      payload TEXT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS etf_strategies (
                      strategy_id UUID PRIMARY KEY,
                      owner_id UUID NOT NULL,
                      parent_id UUID,
                      version INTEGER NOT NULL,
                      status TEXT NOT NULL,
                      payload TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_etf_strategies_owner_time
                    ON etf_strategies (owner_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Persistence for PostgresStore {
    async fn load_session(&self, session_id: Uuid) -> Result<Option<ConversationSession>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM etf_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to load session: {}", e)))?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &ConversationSession) -> Result<()> {
        self.ensure_schema().await?;

        upsert_session(session)?
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to save session: {}", e)))?;

        Ok(())
    }

    async fn save_strategy(&self, strategy: &Strategy) -> Result<()> {
        self.ensure_schema().await?;

        upsert_strategy(strategy)?
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to save strategy: {}", e)))?;

        Ok(())
    }

    async fn load_prior_strategies(&self, user_id: Uuid) -> Result<Vec<Strategy>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT strategy_id, payload FROM etf_strategies WHERE owner_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to load strategies: {}", e)))?;

        let mut strategies = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            match serde_json::from_str::<Strategy>(&payload) {
                Ok(strategy) => strategies.push(strategy),
                Err(e) => {
                    let id: Option<Uuid> = row.try_get("strategy_id").ok();
                    warn!(strategy_id = ?id, error = %e, "Skipping unreadable strategy row");
                }
            }
        }

        Ok(strategies)
    }

    async fn commit_turn(&self, session: &ConversationSession, saved: Option<&Strategy>) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to begin commit: {}", e)))?;

        if let Some(strategy) = saved {
            upsert_strategy(strategy)?
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::Persistence(format!("Failed to save strategy: {}", e)))?;
        }
        upsert_session(session)?
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to save session: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to commit turn: {}", e)))?;

        Ok(())
    }
}

type Upsert = Query<'static, Postgres, PgArguments>;

fn upsert_session(session: &ConversationSession) -> Result<Upsert> {
    Ok(sqlx::query(
        r#"
        INSERT INTO etf_sessions (session_id, user_id, stage, payload, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (session_id) DO UPDATE
          SET stage = EXCLUDED.stage,
              payload = EXCLUDED.payload,
              updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(format!("{:?}", session.stage))
    .bind(serde_json::to_string(session)?)
    .bind(session.updated_at))
}

fn upsert_strategy(strategy: &Strategy) -> Result<Upsert> {
    Ok(sqlx::query(
        r#"
        INSERT INTO etf_strategies (strategy_id, owner_id, parent_id, version, status, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (strategy_id) DO UPDATE
          SET version = EXCLUDED.version,
              status = EXCLUDED.status,
              payload = EXCLUDED.payload
        "#,
    )
    .bind(strategy.id)
    .bind(strategy.owner_id)
    .bind(strategy.parent_id)
    .bind(strategy.version as i32)
    .bind(format!("{:?}", strategy.status))
    .bind(serde_json::to_string(strategy)?)
    .bind(strategy.created_at))
}
