//! Engine configuration
//!
//! Every empirical constant of the engine lives here so it can be tuned
//! without touching the algorithms.

use std::env;
use std::str::FromStr;
use tracing::warn;

/// Tunables of the derivation library
#[derive(Debug, Clone)]
pub struct DerivationConfig {
    /// News-to-ETF relevance score must exceed this to count as related
    pub relevance_threshold: f64,
    /// Estimated PB is derived as `pe * pb_pe_ratio`
    pub pb_pe_ratio: f64,
    /// Trailing price observations used for valuation estimates
    pub valuation_window: usize,
    pub trading_days_per_year: f64,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.3,
            pb_pe_ratio: 0.6,
            valuation_window: 60,
            trading_days_per_year: 252.0,
        }
    }
}

/// Tunables of strategy generation and backtesting
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub max_weight: f64,
    pub min_weight: f64,
    /// Minimum distinct holdings for risk levels above conservative
    pub min_holdings: usize,
    pub max_holdings: usize,
    pub risk_free_rate: f64,
    /// Cost charged on daily rebalancing turnover, in basis points
    pub transaction_cost_bps: Option<f64>,
    pub initial_capital: f64,
    /// Calendar days of price history requested for backtests
    pub backtest_days: i64,
    pub trading_days_per_year: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_weight: 0.35,
            min_weight: 0.02,
            min_holdings: 3,
            max_holdings: 8,
            risk_free_rate: 0.0,
            transaction_cost_bps: None,
            initial_capital: 100_000.0,
            backtest_days: 365,
            trading_days_per_year: 252.0,
        }
    }
}

/// Tunables of the turn orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Minimum confidence of the gating elements before leaving collection
    pub element_confidence_gate: f64,
    /// Consecutive optimization requests before nudging the user
    pub rejection_nudge_threshold: u32,
    pub max_step_retries: u32,
    pub retry_backoff_ms: u64,
    /// Automatic stage advances allowed within one turn
    pub max_stage_hops: usize,
    pub status_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            element_confidence_gate: 0.6,
            rejection_nudge_threshold: 3,
            max_step_retries: 2,
            retry_backoff_ms: 200,
            max_stage_hops: 3,
            status_channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub derivation: DerivationConfig,
    pub strategy: StrategyConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Defaults overridden by `ETF_*` environment variables.
    /// Call `dotenv::dotenv()` beforehand to pick up a `.env` file.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<f64>("ETF_RELEVANCE_THRESHOLD") {
            config.derivation.relevance_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_parse::<f64>("ETF_PB_PE_RATIO") {
            config.derivation.pb_pe_ratio = v;
        }
        if let Some(v) = env_parse::<f64>("ETF_RISK_FREE_RATE") {
            config.strategy.risk_free_rate = v;
        }
        if let Some(v) = env_parse::<f64>("ETF_TRANSACTION_COST_BPS") {
            config.strategy.transaction_cost_bps = Some(v.max(0.0));
        }
        if let Some(v) = env_parse::<f64>("ETF_MAX_WEIGHT") {
            config.strategy.max_weight = v.clamp(0.05, 1.0);
        }
        if let Some(v) = env_parse::<u32>("ETF_REJECTION_NUDGE") {
            config.orchestrator.rejection_nudge_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("ETF_MAX_STEP_RETRIES") {
            config.orchestrator.max_step_retries = v;
        }
        if let Some(v) = env_parse::<u64>("ETF_RETRY_BACKOFF_MS") {
            config.orchestrator.retry_backoff_ms = v;
        }

        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.derivation.relevance_threshold, 0.3);
        assert_eq!(config.derivation.pb_pe_ratio, 0.6);
        assert_eq!(config.strategy.max_weight, 0.35);
        assert_eq!(config.orchestrator.rejection_nudge_threshold, 3);
        assert_eq!(config.orchestrator.max_step_retries, 2);
    }

    #[test]
    fn test_env_override_and_bad_value() {
        env::set_var("ETF_PB_PE_RATIO", "0.5");
        env::set_var("ETF_REJECTION_NUDGE", "not-a-number");
        let config = EngineConfig::from_env();
        env::remove_var("ETF_PB_PE_RATIO");
        env::remove_var("ETF_REJECTION_NUDGE");

        assert_eq!(config.derivation.pb_pe_ratio, 0.5);
        assert_eq!(config.orchestrator.rejection_nudge_threshold, 3);
    }
}
