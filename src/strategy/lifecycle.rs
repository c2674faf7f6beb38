//! Strategy lifecycle
//!
//! DRAFT → GENERATED → BACKTESTED → (OPTIMIZING → BACKTESTED)* → SAVED.
//! SAVED is terminal; edits to a saved strategy go to a fork.

use crate::error::EngineError;
use crate::models::{BacktestResult, Strategy, StrategyStatus};
use crate::Result;
use chrono::Utc;
use uuid::Uuid;

pub fn can_transition(from: StrategyStatus, to: StrategyStatus) -> bool {
    use StrategyStatus::*;
    matches!(
        (from, to),
        (Draft, Generated)
            | (Generated, Backtested)
            | (Backtested, Optimizing)
            | (Optimizing, Backtested)
            | (Backtested, Saved)
    )
}

pub fn transition(strategy: &mut Strategy, to: StrategyStatus) -> Result<()> {
    if strategy.status == StrategyStatus::Saved {
        return Err(EngineError::StateTransition(format!(
            "strategy {} is saved and immutable",
            strategy.id
        )));
    }
    if !can_transition(strategy.status, to) {
        return Err(EngineError::StateTransition(format!(
            "strategy {} cannot move from {:?} to {:?}",
            strategy.id, strategy.status, to
        )));
    }
    strategy.status = to;
    Ok(())
}

/// Attach a backtest and mark the strategy backtested
pub fn record_backtest(strategy: &mut Strategy, result: BacktestResult) -> Result<()> {
    transition(strategy, StrategyStatus::Backtested)?;
    strategy.backtest_result = Some(result);
    Ok(())
}

/// Editable copy of a saved strategy, referencing it as parent.
/// The fork keeps the parent's backtest, so it starts out backtested.
pub fn fork(saved: &Strategy) -> Strategy {
    Strategy {
        id: Uuid::new_v4(),
        parent_id: Some(saved.id),
        status: StrategyStatus::Backtested,
        created_at: Utc::now(),
        ..saved.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Allocation, GenerationContext, PerformanceEstimate, RiskTolerance};

    pub(crate) fn strategy(status: StrategyStatus) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            parent_id: None,
            allocations: vec![Allocation {
                etf_code: "510300".into(),
                etf_name: "沪深300ETF".into(),
                weight: 1.0,
                asset_class: "股票".into(),
                category: "综合指数ETF".into(),
            }],
            risk_level: RiskTolerance::Moderate,
            status,
            generation_context: GenerationContext::default(),
            performance_estimate: PerformanceEstimate::default(),
            backtest_result: None,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path() {
        let mut s = strategy(StrategyStatus::Draft);
        for next in [
            StrategyStatus::Generated,
            StrategyStatus::Backtested,
            StrategyStatus::Optimizing,
            StrategyStatus::Backtested,
            StrategyStatus::Saved,
        ] {
            transition(&mut s, next).unwrap();
        }
        assert_eq!(s.status, StrategyStatus::Saved);
    }

    #[test]
    fn test_saved_is_terminal() {
        let mut s = strategy(StrategyStatus::Saved);
        assert!(matches!(
            transition(&mut s, StrategyStatus::Optimizing),
            Err(EngineError::StateTransition(_))
        ));
    }

    #[test]
    fn test_cannot_skip_backtest() {
        let mut s = strategy(StrategyStatus::Generated);
        assert!(transition(&mut s, StrategyStatus::Saved).is_err());
        assert!(transition(&mut s, StrategyStatus::Optimizing).is_err());
    }

    #[test]
    fn test_fork_references_parent() {
        let saved = strategy(StrategyStatus::Saved);
        let forked = fork(&saved);
        assert_eq!(forked.parent_id, Some(saved.id));
        assert_ne!(forked.id, saved.id);
        assert!(can_transition(forked.status, StrategyStatus::Optimizing));
    }
}
