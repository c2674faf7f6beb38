//! Data-fetch tools
//!
//! Thin wrappers over the data provider. These are the only tools that
//! await external I/O.

use crate::data::DataProvider;
use crate::models::{Capability, PriceBook};
use crate::tools::{wrong_input, InputSchema, JsonKind, Tool, ToolInput, ToolOutput};
use crate::Result;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

pub struct FetchEtfUniverseTool {
    provider: Arc<dyn DataProvider>,
}

impl FetchEtfUniverseTool {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Tool for FetchEtfUniverseTool {
    fn name(&self) -> &'static str {
        "fetch_etf_universe"
    }

    fn description(&self) -> &'static str {
        "Fetch the ETF universe from the market data provider"
    }

    fn capability(&self) -> Capability {
        Capability::DataFetch
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::default()
    }

    fn estimated_cost(&self) -> u32 {
        5
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::FetchEtfUniverse { filter } = input else {
            return Err(wrong_input(self.name(), input));
        };
        let records = self.provider.fetch_etf_universe(filter).await?;
        Ok(ToolOutput::EtfUniverse(records))
    }
}

pub struct FetchPriceHistoryTool {
    provider: Arc<dyn DataProvider>,
}

impl FetchPriceHistoryTool {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Tool for FetchPriceHistoryTool {
    fn name(&self) -> &'static str {
        "fetch_price_history"
    }

    fn description(&self) -> &'static str {
        "Fetch daily closes for a set of ETF codes, concurrently per code"
    }

    fn capability(&self) -> Capability {
        Capability::DataFetch
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[("codes", JsonKind::Array), ("range", JsonKind::Object)])
    }

    fn estimated_cost(&self) -> u32 {
        10
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::FetchPriceHistory { codes, range } = input else {
            return Err(wrong_input(self.name(), input));
        };

        let mut tasks = JoinSet::new();
        for code in codes {
            let provider = self.provider.clone();
            let code = code.clone();
            let range = *range;
            tasks.spawn(async move {
                let history = provider.fetch_price_history(&code, range).await;
                (code, history)
            });
        }

        // Collected into a BTreeMap, so completion order does not matter
        let mut book = PriceBook::new();
        while let Some(joined) = tasks.join_next().await {
            let (code, history) = joined.map_err(|e| {
                crate::error::EngineError::DataProvider(format!("price fetch task failed: {}", e))
            })?;
            let history = history?;
            if history.is_empty() {
                debug!(code = %code, "No price history returned");
                continue;
            }
            book.insert(code, history);
        }

        Ok(ToolOutput::PriceHistory(book))
    }
}

pub struct FetchNewsTool {
    provider: Arc<dyn DataProvider>,
}

impl FetchNewsTool {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Tool for FetchNewsTool {
    fn name(&self) -> &'static str {
        "fetch_news"
    }

    fn description(&self) -> &'static str {
        "Fetch recent news matching keywords"
    }

    fn capability(&self) -> Capability {
        Capability::DataFetch
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::default()
    }

    fn estimated_cost(&self) -> u32 {
        5
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::FetchNews { filter } = input else {
            return Err(wrong_input(self.name(), input));
        };
        let news = self.provider.fetch_news(filter).await?;
        Ok(ToolOutput::News(news))
    }
}
