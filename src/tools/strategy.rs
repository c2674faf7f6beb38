//! Strategy and compliance tools

use crate::config::StrategyConfig;
use crate::models::Capability;
use crate::safety::SafetyReviewer;
use crate::strategy::{generate_strategy, optimize_strategy, parse_directives, run_backtest};
use crate::tools::{wrong_input, InputSchema, JsonKind, Tool, ToolInput, ToolOutput};
use crate::Result;
use std::sync::Arc;

pub struct GenerateStrategyTool {
    config: StrategyConfig,
}

impl GenerateStrategyTool {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Tool for GenerateStrategyTool {
    fn name(&self) -> &'static str {
        "generate_strategy"
    }

    fn description(&self) -> &'static str {
        "Build a capped minimum-variance ETF allocation from investment elements"
    }

    fn capability(&self) -> Capability {
        Capability::Generation
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[
            ("elements", JsonKind::Object),
            ("universe", JsonKind::Array),
            ("owner_id", JsonKind::String),
        ])
    }

    fn estimated_cost(&self) -> u32 {
        4
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::GenerateStrategy { elements, universe, owner_id } = input else {
            return Err(wrong_input(self.name(), input));
        };
        let strategy = generate_strategy(elements, universe, *owner_id, &self.config)?;
        Ok(ToolOutput::Strategy(strategy))
    }
}

pub struct BacktestStrategyTool {
    config: StrategyConfig,
}

impl BacktestStrategyTool {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Tool for BacktestStrategyTool {
    fn name(&self) -> &'static str {
        "backtest_strategy"
    }

    fn description(&self) -> &'static str {
        "Daily-rebalanced backtest of a strategy over a period"
    }

    fn capability(&self) -> Capability {
        Capability::Backtest
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[
            ("strategy", JsonKind::Object),
            ("prices", JsonKind::Object),
            ("period", JsonKind::Object),
        ])
    }

    fn estimated_cost(&self) -> u32 {
        4
    }

    /// Pure computation. Attaching the result to the strategy is left to
    /// the caller, which owns the lifecycle.
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::BacktestStrategy { strategy, prices, period } = input else {
            return Err(wrong_input(self.name(), input));
        };
        let result = run_backtest(strategy, prices, *period, &self.config)?;
        Ok(ToolOutput::Backtest(result))
    }
}

pub struct OptimizeStrategyTool {
    config: StrategyConfig,
}

impl OptimizeStrategyTool {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Tool for OptimizeStrategyTool {
    fn name(&self) -> &'static str {
        "optimize_strategy"
    }

    fn description(&self) -> &'static str {
        "Apply feedback directives to a strategy and produce its next version"
    }

    fn capability(&self) -> Capability {
        Capability::Optimization
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[("strategy", JsonKind::Object), ("feedback", JsonKind::String)])
    }

    fn estimated_cost(&self) -> u32 {
        2
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::OptimizeStrategy { strategy, feedback } = input else {
            return Err(wrong_input(self.name(), input));
        };
        let directives = parse_directives(feedback);
        let next = optimize_strategy(strategy, &directives, &self.config)?;
        Ok(ToolOutput::Strategy(next))
    }
}

pub struct SafetyCheckTool {
    reviewer: Arc<SafetyReviewer>,
}

impl SafetyCheckTool {
    pub fn new(reviewer: Arc<SafetyReviewer>) -> Self {
        Self { reviewer }
    }
}

#[async_trait::async_trait]
impl Tool for SafetyCheckTool {
    fn name(&self) -> &'static str {
        "safety_check"
    }

    fn description(&self) -> &'static str {
        "Compliance review of generated text, with rewrite and disclaimer"
    }

    fn capability(&self) -> Capability {
        Capability::SafetyCheck
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[("text", JsonKind::String), ("content_type", JsonKind::String)])
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::SafetyCheck { text, content_type } = input else {
            return Err(wrong_input(self.name(), input));
        };
        Ok(ToolOutput::Safety(self.reviewer.check_output(text, *content_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DerivationConfig;
    use crate::data::sample::{sample_universe, synthetic_prices};
    use crate::derivation::enrich_all;
    use crate::error::EngineError;
    use crate::extraction::extract_elements;
    use crate::models::{ContentType, DateRange, ExtractedElements, PriceBook, Strategy, StrategyStatus};
    use crate::strategy::record_backtest;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    async fn generated() -> (Strategy, PriceBook) {
        let universe = sample_universe();
        let prices = synthetic_prices(&universe, 300, as_of());
        let enriched = enrich_all(&universe, &prices, &DerivationConfig::default());

        let mut elements = ExtractedElements::new();
        elements.merge_all(extract_elements("我的风险偏好是稳健，打算投10万，偏好股票和债券", 1));

        let output = GenerateStrategyTool::new(StrategyConfig::default())
            .execute(&ToolInput::GenerateStrategy { elements, universe: enriched, owner_id: Uuid::new_v4() })
            .await
            .unwrap();
        let ToolOutput::Strategy(strategy) = output else {
            panic!("unexpected output");
        };
        (strategy, prices)
    }

    #[tokio::test]
    async fn test_generate_backtest_optimize() {
        let (mut strategy, prices) = generated().await;
        assert_eq!(strategy.status, StrategyStatus::Generated);

        let period = DateRange::new(as_of() - chrono::Duration::days(180), as_of());
        let output = BacktestStrategyTool::new(StrategyConfig::default())
            .execute(&ToolInput::BacktestStrategy { strategy: strategy.clone(), prices, period })
            .await
            .unwrap();
        let ToolOutput::Backtest(result) = output else {
            panic!("unexpected output");
        };
        assert!(result.summary.trading_days > 100);
        record_backtest(&mut strategy, result).unwrap();

        let output = OptimizeStrategyTool::new(StrategyConfig::default())
            .execute(&ToolInput::OptimizeStrategy { strategy: strategy.clone(), feedback: "股票少一点".into() })
            .await
            .unwrap();
        let ToolOutput::Strategy(next) = output else {
            panic!("unexpected output");
        };
        assert_eq!(next.version, strategy.version + 1);
        assert_eq!(next.status, StrategyStatus::Optimizing);
        assert!(next.backtest_result.is_none());
        assert!((next.total_weight() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_optimize_without_directives_is_rejected() {
        let (strategy, _) = generated().await;
        let result = OptimizeStrategyTool::new(StrategyConfig::default())
            .execute(&ToolInput::OptimizeStrategy { strategy, feedback: "嗯".into() })
            .await;
        assert!(matches!(result, Err(EngineError::InvalidToolInput(_))));
    }

    #[tokio::test]
    async fn test_safety_check_appends_disclaimer() {
        let tool = SafetyCheckTool::new(Arc::new(SafetyReviewer::default()));
        let output = tool
            .execute(&ToolInput::SafetyCheck {
                text: "组合以债券为主，波动相对较低。".into(),
                content_type: ContentType::StrategyRecommendation,
            })
            .await
            .unwrap();
        let ToolOutput::Safety(review) = output else {
            panic!("unexpected output");
        };
        assert!(!review.blocked);
        assert!(review.processed_content.len() > "组合以债券为主，波动相对较低。".len());
    }
}
