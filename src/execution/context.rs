//! Per-turn blackboard
//!
//! Steps never pass values to each other directly. Each step's input is
//! built from the context and its output is applied back to it, in plan
//! order.

use crate::agent::reply::compose_reply;
use crate::classifier::TurnIntent;
use crate::config::EngineConfig;
use crate::derivation::{extract_keywords, NewsAnalysis, SectorReport};
use crate::error::EngineError;
use crate::models::{
    BusinessStage, ConversationSession, DateRange, EnrichedEtfRecord, EtfRecord, ExtractedElements,
    InvestmentElement, NewsFilter, NewsItem, PlanStep, PriceBook, SafetyReview, Strategy,
    StrategyStatus, UniverseFilter,
};
use crate::strategy::{record_backtest, transition};
use crate::tools::{ToolInput, ToolOutput};
use crate::Result;
use uuid::Uuid;

const NEWS_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub stage: BusinessStage,
    pub intent: TurnIntent,
    pub message: String,
    pub turn: u32,

    pub elements: ExtractedElements,
    /// Elements extracted from this message only
    pub extracted: Vec<InvestmentElement>,
    pub elements_changed: bool,

    pub universe: Vec<EtfRecord>,
    pub prices: PriceBook,
    pub news: Vec<NewsItem>,
    pub enriched: Vec<EnrichedEtfRecord>,
    pub news_analyses: Vec<NewsAnalysis>,
    pub sectors: Option<SectorReport>,

    pub strategy: Option<Strategy>,
    pub strategy_updated: bool,
    /// Save asked for while the strategy still awaits its backtest
    pub save_requested: bool,
    /// Strategy became saved this turn and must be persisted at commit
    pub strategy_saved: bool,
    pub prior_strategies: Vec<Strategy>,
    pub backtest_period: DateRange,
    /// Minimum confidence of the gating elements
    pub confidence_gate: f64,

    pub safety: Option<SafetyReview>,
    /// Tools that degraded instead of failing
    pub degraded: Vec<String>,
    pub nudge: bool,
}

impl TurnContext {
    pub fn new(session: &ConversationSession, message: &str, intent: TurnIntent, config: &EngineConfig) -> Self {
        Self {
            session_id: session.id,
            user_id: session.user_id,
            stage: session.stage,
            intent,
            message: message.to_string(),
            turn: session.turn_count + 1,
            elements: session.elements.clone(),
            extracted: Vec::new(),
            elements_changed: false,
            universe: Vec::new(),
            prices: PriceBook::new(),
            news: Vec::new(),
            enriched: Vec::new(),
            news_analyses: Vec::new(),
            sectors: None,
            strategy: session.current_strategy.clone(),
            strategy_updated: false,
            save_requested: false,
            strategy_saved: false,
            prior_strategies: Vec::new(),
            backtest_period: DateRange::trailing_days(config.strategy.backtest_days),
            confidence_gate: config.orchestrator.element_confidence_gate,
            safety: None,
            degraded: Vec::new(),
            nudge: false,
        }
    }

    /// Build the typed input for a step from what earlier steps produced.
    pub fn input_for(&self, step: &PlanStep) -> Result<ToolInput> {
        let input = match step.tool_name.as_str() {
            "fetch_etf_universe" => ToolInput::FetchEtfUniverse {
                filter: UniverseFilter::default(),
            },
            "fetch_price_history" => {
                let codes = if self.universe.is_empty() {
                    self.strategy.as_ref().map(|s| s.codes()).unwrap_or_default()
                } else {
                    self.universe.iter().map(|e| e.code.clone()).collect()
                };
                if codes.is_empty() {
                    return Err(EngineError::InsufficientData("no ETF codes to price".into()));
                }
                ToolInput::FetchPriceHistory { codes, range: self.backtest_period }
            }
            "fetch_news" => ToolInput::FetchNews {
                filter: NewsFilter {
                    keywords: self.news_keywords(),
                    limit: Some(NEWS_LIMIT),
                },
            },
            "extract_elements" => ToolInput::ExtractElements {
                message: self.message.clone(),
                turn: self.turn,
            },
            "enrich_etfs" => ToolInput::EnrichEtfs {
                records: self.universe.clone(),
                prices: self.prices.clone(),
            },
            "score_news" => ToolInput::ScoreNews {
                news: self.news.clone(),
                etfs: self.universe.clone(),
            },
            "build_sectors" => ToolInput::BuildSectors {
                etfs: self.enriched.clone(),
                prices: self.prices.clone(),
                as_of: self.latest_price_date().ok_or_else(|| {
                    EngineError::InsufficientData("no prices inside the backtest period".into())
                })?,
            },
            "generate_strategy" => ToolInput::GenerateStrategy {
                elements: self.elements.clone(),
                universe: self.enriched.clone(),
                owner_id: self.user_id,
            },
            "backtest_strategy" => ToolInput::BacktestStrategy {
                strategy: self.require_strategy()?.clone(),
                prices: self.prices.clone(),
                period: self.backtest_period,
            },
            "optimize_strategy" => {
                let strategy = self.require_strategy()?;
                if !strategy.is_backtested() {
                    return Err(EngineError::InsufficientData(format!(
                        "strategy {} has no backtest to optimize from",
                        strategy.id
                    )));
                }
                ToolInput::OptimizeStrategy {
                    strategy: strategy.clone(),
                    feedback: self.message.clone(),
                }
            }
            "safety_check" => {
                let (text, content_type) = compose_reply(self);
                ToolInput::SafetyCheck { text, content_type }
            }
            other => return Err(EngineError::ToolNotFound(other.to_string())),
        };
        Ok(input)
    }

    /// Fold one step's output into the context.
    pub fn apply(&mut self, output: ToolOutput) -> Result<()> {
        match output {
            ToolOutput::EtfUniverse(records) => self.universe = records,
            ToolOutput::PriceHistory(book) => self.prices = book,
            ToolOutput::News(news) => self.news = news,
            ToolOutput::Elements(extracted) => {
                let accepted = self.elements.merge_all(extracted.iter().cloned());
                self.elements_changed |= accepted > 0;
                self.extracted = extracted;
            }
            ToolOutput::EnrichedEtfs(enriched) => self.enriched = enriched,
            ToolOutput::NewsAnalyses(analyses) => self.news_analyses = analyses,
            ToolOutput::Sectors(report) => self.sectors = Some(report),
            ToolOutput::Strategy(strategy) => {
                self.strategy = Some(strategy);
                self.strategy_updated = true;
            }
            ToolOutput::Backtest(result) => {
                let strategy = self
                    .strategy
                    .as_mut()
                    .ok_or_else(|| EngineError::Orchestration("backtest without a strategy".into()))?;
                if strategy.status == StrategyStatus::Backtested {
                    // re-run of an already backtested version
                    strategy.backtest_result = Some(result);
                } else {
                    record_backtest(strategy, result)?;
                }
                if self.save_requested {
                    transition(strategy, StrategyStatus::Saved)?;
                    self.save_requested = false;
                    self.strategy_saved = true;
                    self.strategy_updated = true;
                }
            }
            ToolOutput::Safety(review) => self.safety = Some(review),
        }
        Ok(())
    }

    /// Mark the current strategy saved. A strategy still waiting for its
    /// backtest is saved once that backtest lands in this turn.
    pub fn request_save(&mut self) -> Result<()> {
        let Some(strategy) = self.strategy.as_mut() else {
            return Ok(());
        };
        match strategy.status {
            StrategyStatus::Saved => {}
            StrategyStatus::Backtested => {
                transition(strategy, StrategyStatus::Saved)?;
                self.strategy_saved = true;
                self.strategy_updated = true;
            }
            _ => self.save_requested = true,
        }
        Ok(())
    }

    fn require_strategy(&self) -> Result<&Strategy> {
        self.strategy
            .as_ref()
            .ok_or_else(|| EngineError::InvalidToolInput("no current strategy".into()))
    }

    fn news_keywords(&self) -> Vec<String> {
        let mut keywords = self.elements.preferred_asset_classes();
        for keyword in extract_keywords(&self.message) {
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        keywords
    }

    fn latest_price_date(&self) -> Option<chrono::NaiveDate> {
        self.prices
            .values()
            .filter_map(|series| {
                series
                    .iter()
                    .rev()
                    .map(|p| p.date)
                    .find(|d| self.backtest_period.contains(*d))
            })
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BacktestResult, BacktestSummary, Capability, ElementField};

    fn step(tool_name: &str) -> PlanStep {
        PlanStep {
            order: 1,
            tool_name: tool_name.to_string(),
            capability: Capability::DataFetch,
            dependencies: vec![],
            optional: false,
            description: String::new(),
        }
    }

    fn context(message: &str) -> TurnContext {
        let session = ConversationSession::new(Uuid::new_v4(), Uuid::new_v4());
        TurnContext::new(&session, message, TurnIntent::Inform, &EngineConfig::default())
    }

    #[test]
    fn test_price_codes_need_a_universe_or_strategy() {
        let ctx = context("你好");
        let result = ctx.input_for(&step("fetch_price_history"));
        assert!(matches!(result, Err(EngineError::InsufficientData(_))));
    }

    #[test]
    fn test_elements_output_is_merged() {
        let mut ctx = context("我是稳健型投资者");
        ctx.apply(ToolOutput::Elements(crate::extraction::extract_elements(&ctx.message, 1)))
            .unwrap();

        assert!(ctx.elements_changed);
        assert!(ctx.elements.get(ElementField::RiskTolerance).is_some());
        assert!(!ctx.extracted.is_empty());
    }

    fn empty_backtest() -> BacktestResult {
        BacktestResult {
            period: DateRange::trailing_days(30),
            initial_capital: 100_000.0,
            series: vec![],
            summary: BacktestSummary {
                total_return: 0.0,
                annualized_return: 0.0,
                volatility: 0.0,
                max_drawdown: 0.0,
                sharpe_ratio: None,
                win_rate: 0.0,
                trading_days: 0,
            },
            excluded: vec![],
        }
    }

    #[test]
    fn test_backtest_without_strategy() {
        let mut ctx = context("回测");
        let input = ctx.input_for(&step("backtest_strategy"));
        assert!(matches!(input, Err(EngineError::InvalidToolInput(_))));
        assert!(matches!(
            ctx.apply(ToolOutput::Backtest(empty_backtest())),
            Err(EngineError::Orchestration(_))
        ));
    }

    fn generated_strategy() -> Strategy {
        let mut elements = ExtractedElements::new();
        elements.merge_all(crate::extraction::extract_elements("我是稳健型投资者，偏好股票和债券", 1));
        let config = EngineConfig::default();
        let universe: Vec<EnrichedEtfRecord> = crate::data::sample::sample_universe()
            .iter()
            .map(|r| crate::derivation::enrich_etf(r, None, &config.derivation))
            .collect();
        crate::strategy::generate_strategy(&elements, &universe, Uuid::new_v4(), &config.strategy).unwrap()
    }

    #[test]
    fn test_save_waits_for_pending_backtest() {
        let mut ctx = context("保存");
        ctx.strategy = Some(generated_strategy());

        ctx.request_save().unwrap();
        assert!(ctx.save_requested);
        assert!(!ctx.strategy_saved);
        assert!(matches!(
            ctx.input_for(&step("optimize_strategy")),
            Err(EngineError::InsufficientData(_))
        ));

        ctx.apply(ToolOutput::Backtest(empty_backtest())).unwrap();
        assert!(ctx.strategy_saved);
        assert!(!ctx.save_requested);
        assert_eq!(ctx.strategy.as_ref().unwrap().status, StrategyStatus::Saved);
    }

    #[test]
    fn test_backtested_strategy_saves_at_once() {
        let mut ctx = context("保存");
        let mut strategy = generated_strategy();
        record_backtest(&mut strategy, empty_backtest()).unwrap();
        ctx.strategy = Some(strategy);

        ctx.request_save().unwrap();
        assert!(ctx.strategy_saved);
        assert!(ctx.strategy_updated);
        assert_eq!(ctx.strategy.as_ref().unwrap().status, StrategyStatus::Saved);
    }

    #[test]
    fn test_unknown_tool() {
        let ctx = context("你好");
        assert!(matches!(ctx.input_for(&step("web_search")), Err(EngineError::ToolNotFound(_))));
    }
}
