//! Error types for the strategy orchestration engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Core Taxonomy
    // =============================

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No eligible assets: {0}")]
    NoEligibleAssets(String),

    #[error("Blocked by safety review: {0}")]
    SafetyBlocked(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("State transition error: {0}")]
    StateTransition(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Data provider error: {0}")]
    DataProvider(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Plan cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Failures of external data sources are the only ones worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::DataProvider(_) | EngineError::Http(_))
    }

    /// Errors surfaced to the user as-is while the stage is preserved.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            EngineError::SafetyBlocked(_)
                | EngineError::StateTransition(_)
                | EngineError::NoEligibleAssets(_)
        )
    }

    /// Stable machine-readable kind, used in logs and observations.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidToolInput(_) => "invalid_tool_input",
            EngineError::InsufficientData(_) => "insufficient_data",
            EngineError::NoEligibleAssets(_) => "no_eligible_assets",
            EngineError::SafetyBlocked(_) => "safety_blocked",
            EngineError::Orchestration(_) => "orchestration",
            EngineError::StateTransition(_) => "state_transition",
            EngineError::ToolNotFound(_) => "tool_not_found",
            EngineError::DataProvider(_) => "data_provider",
            EngineError::Persistence(_) => "persistence",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::Config(_) => "config",
            EngineError::Serialization(_) => "serialization",
            EngineError::Http(_) => "http",
            EngineError::Database(_) => "database",
            EngineError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_data_failures_retry() {
        assert!(EngineError::DataProvider("timeout".into()).is_retryable());
        assert!(!EngineError::SafetyBlocked("x".into()).is_retryable());
        assert!(!EngineError::StateTransition("x".into()).is_retryable());
        assert!(!EngineError::InsufficientData("x".into()).is_retryable());
    }

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(
            EngineError::NoEligibleAssets("empty".into()).kind(),
            "no_eligible_assets"
        );
        assert!(EngineError::StateTransition("x".into()).is_user_facing());
    }
}
