//! Tool trait and registry
//!
//! Every capability the orchestrator can invoke is a named tool with a
//! typed input variant and an input schema. The registry checks the input
//! against the tool before dispatch and never coerces types.

pub mod analysis;
pub mod market;
pub mod strategy;

use crate::config::EngineConfig;
use crate::data::DataProvider;
use crate::derivation::{NewsAnalysis, SectorReport};
use crate::error::EngineError;
use crate::models::{
    BacktestResult, Capability, ContentType, DateRange, EnrichedEtfRecord, EtfRecord,
    ExtractedElements, InvestmentElement, NewsFilter, NewsItem, PriceBook, SafetyReview, Strategy,
    UniverseFilter,
};
use crate::safety::SafetyReviewer;
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One variant per tool. The serde tag is the tool name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", content = "params", rename_all = "snake_case")]
pub enum ToolInput {
    FetchEtfUniverse {
        #[serde(default)]
        filter: UniverseFilter,
    },
    FetchPriceHistory {
        codes: Vec<String>,
        range: DateRange,
    },
    FetchNews {
        #[serde(default)]
        filter: NewsFilter,
    },
    ExtractElements {
        message: String,
        turn: u32,
    },
    EnrichEtfs {
        records: Vec<EtfRecord>,
        #[serde(default)]
        prices: PriceBook,
    },
    ScoreNews {
        news: Vec<NewsItem>,
        etfs: Vec<EtfRecord>,
    },
    BuildSectors {
        etfs: Vec<EnrichedEtfRecord>,
        prices: PriceBook,
        as_of: NaiveDate,
    },
    GenerateStrategy {
        elements: ExtractedElements,
        universe: Vec<EnrichedEtfRecord>,
        owner_id: Uuid,
    },
    BacktestStrategy {
        strategy: Strategy,
        prices: PriceBook,
        period: DateRange,
    },
    OptimizeStrategy {
        strategy: Strategy,
        feedback: String,
    },
    SafetyCheck {
        text: String,
        content_type: ContentType,
    },
}

impl ToolInput {
    /// Name of the tool this input is meant for
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolInput::FetchEtfUniverse { .. } => "fetch_etf_universe",
            ToolInput::FetchPriceHistory { .. } => "fetch_price_history",
            ToolInput::FetchNews { .. } => "fetch_news",
            ToolInput::ExtractElements { .. } => "extract_elements",
            ToolInput::EnrichEtfs { .. } => "enrich_etfs",
            ToolInput::ScoreNews { .. } => "score_news",
            ToolInput::BuildSectors { .. } => "build_sectors",
            ToolInput::GenerateStrategy { .. } => "generate_strategy",
            ToolInput::BacktestStrategy { .. } => "backtest_strategy",
            ToolInput::OptimizeStrategy { .. } => "optimize_strategy",
            ToolInput::SafetyCheck { .. } => "safety_check",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ToolOutput {
    EtfUniverse(Vec<EtfRecord>),
    PriceHistory(PriceBook),
    News(Vec<NewsItem>),
    Elements(Vec<InvestmentElement>),
    EnrichedEtfs(Vec<EnrichedEtfRecord>),
    NewsAnalyses(Vec<NewsAnalysis>),
    Sectors(SectorReport),
    Strategy(Strategy),
    Backtest(BacktestResult),
    Safety(SafetyReview),
}

/// JSON kinds accepted by schema fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
}

impl JsonKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            JsonKind::String => value.is_string(),
            JsonKind::Number => value.is_number(),
            JsonKind::Integer => value.is_u64() || value.is_i64(),
            JsonKind::Bool => value.is_boolean(),
            JsonKind::Array => value.is_array(),
            JsonKind::Object => value.is_object(),
        }
    }
}

/// Required top-level parameters of a tool and their JSON kinds
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    pub required: Vec<(&'static str, JsonKind)>,
}

impl InputSchema {
    pub fn new(required: &[(&'static str, JsonKind)]) -> Self {
        Self { required: required.to_vec() }
    }

    pub fn validate(&self, params: &Value) -> Result<()> {
        let object = params.as_object().ok_or_else(|| {
            EngineError::InvalidToolInput("tool parameters must be a JSON object".to_string())
        })?;

        for (field, kind) in &self.required {
            match object.get(*field) {
                None | Some(Value::Null) => {
                    return Err(EngineError::InvalidToolInput(format!("missing required field '{}'", field)));
                }
                Some(value) if !kind.matches(value) => {
                    return Err(EngineError::InvalidToolInput(format!(
                        "field '{}' must be {:?}, got {}",
                        field, kind, value
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn capability(&self) -> Capability;
    fn input_schema(&self) -> InputSchema;

    /// Relative cost, used for planning and logging
    fn estimated_cost(&self) -> u32 {
        1
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Execute a typed input. The variant must belong to `name`.
    pub async fn execute(&self, name: &str, input: &ToolInput) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;

        if input.tool_name() != name {
            return Err(EngineError::InvalidToolInput(format!(
                "tool '{}' cannot accept '{}' input",
                name,
                input.tool_name()
            )));
        }

        tool.execute(input).await
    }

    /// Execute from loosely-typed JSON parameters. The schema is checked
    /// first, then the parameters are decoded into the tool's variant.
    pub async fn dispatch_json(&self, name: &str, params: Value) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;

        tool.input_schema().validate(&params)?;

        let input: ToolInput = serde_json::from_value(json!({ "tool": name, "params": params }))
            .map_err(|e| EngineError::InvalidToolInput(format!("{}: {}", name, e)))?;

        self.execute(name, &input).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_input(tool: &str, input: &ToolInput) -> EngineError {
    EngineError::InvalidToolInput(format!("{} received {} input", tool, input.tool_name()))
}

/// Registry with every built-in tool
pub fn create_default_registry(
    provider: Arc<dyn DataProvider>,
    reviewer: Arc<SafetyReviewer>,
    config: &EngineConfig,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(market::FetchEtfUniverseTool::new(provider.clone())));
    registry.register(Arc::new(market::FetchPriceHistoryTool::new(provider.clone())));
    registry.register(Arc::new(market::FetchNewsTool::new(provider)));

    registry.register(Arc::new(analysis::ExtractElementsTool));
    registry.register(Arc::new(analysis::EnrichEtfsTool::new(config.derivation.clone())));
    registry.register(Arc::new(analysis::ScoreNewsTool::new(config.derivation.clone())));
    registry.register(Arc::new(analysis::BuildSectorsTool));

    registry.register(Arc::new(strategy::GenerateStrategyTool::new(config.strategy.clone())));
    registry.register(Arc::new(strategy::BacktestStrategyTool::new(config.strategy.clone())));
    registry.register(Arc::new(strategy::OptimizeStrategyTool::new(config.strategy.clone())));
    registry.register(Arc::new(strategy::SafetyCheckTool::new(reviewer)));

    registry
}
