#![allow(dead_code)]

use async_trait::async_trait;
use etf_strategy_orchestrator::data::sample::{sample_news, sample_universe, synthetic_prices};
use etf_strategy_orchestrator::data::{DataProvider, InMemoryDataProvider};
use etf_strategy_orchestrator::models::{DateRange, EtfRecord, NewsFilter, NewsItem, PricePoint, UniverseFilter};
use etf_strategy_orchestrator::state::InMemoryStore;
use etf_strategy_orchestrator::status::{NoopStatusSink, StatusSink};
use etf_strategy_orchestrator::{EngineConfig, EngineError, Orchestrator, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PROFILE: &str = "我的风险偏好是稳健，偏好股票和债券，打算投资10万";

pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.orchestrator.retry_backoff_ms = 1;
    config
}

pub fn orchestrator() -> Orchestrator {
    orchestrator_with(Arc::new(InMemoryDataProvider::sample()), Arc::new(InMemoryStore::new()))
}

pub fn orchestrator_with(provider: Arc<dyn DataProvider>, store: Arc<InMemoryStore>) -> Orchestrator {
    orchestrator_with_sink(provider, store, Arc::new(NoopStatusSink))
}

pub fn orchestrator_with_sink(
    provider: Arc<dyn DataProvider>,
    store: Arc<InMemoryStore>,
    sink: Arc<dyn StatusSink>,
) -> Orchestrator {
    Orchestrator::with_defaults(provider, store, sink, fast_config())
}

/// Sample data behind a delay on the universe fetch
pub struct SlowProvider {
    pub inner: InMemoryDataProvider,
    pub delay: Duration,
}

#[async_trait]
impl DataProvider for SlowProvider {
    async fn fetch_etf_universe(&self, filter: &UniverseFilter) -> Result<Vec<EtfRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_etf_universe(filter).await
    }

    async fn fetch_price_history(&self, code: &str, range: DateRange) -> Result<Vec<PricePoint>> {
        self.inner.fetch_price_history(code, range).await
    }

    async fn fetch_news(&self, filter: &NewsFilter) -> Result<Vec<NewsItem>> {
        self.inner.fetch_news(filter).await
    }
}

/// Universe fetch always fails with a transport-style error
#[derive(Default)]
pub struct DownProvider {
    pub universe_calls: AtomicUsize,
}

#[async_trait]
impl DataProvider for DownProvider {
    async fn fetch_etf_universe(&self, _filter: &UniverseFilter) -> Result<Vec<EtfRecord>> {
        self.universe_calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::DataProvider("connection reset by peer at 10.0.0.7:5432".into()))
    }

    async fn fetch_price_history(&self, _code: &str, _range: DateRange) -> Result<Vec<PricePoint>> {
        Ok(Vec::new())
    }

    async fn fetch_news(&self, _filter: &NewsFilter) -> Result<Vec<NewsItem>> {
        Ok(Vec::new())
    }
}

/// Sample data with the price series of `codes` missing
pub fn sample_without_prices(codes: &[&str]) -> InMemoryDataProvider {
    let universe = sample_universe();
    let mut prices = synthetic_prices(&universe, 400, chrono::Utc::now().date_naive());
    for code in codes {
        prices.remove(*code);
    }
    InMemoryDataProvider::new(universe, prices, sample_news())
}

/// Sample data whose price feed returns nothing until switched on
pub struct SwitchedPrices {
    pub inner: InMemoryDataProvider,
    pub online: AtomicBool,
}

impl SwitchedPrices {
    pub fn offline() -> Self {
        Self {
            inner: InMemoryDataProvider::sample(),
            online: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DataProvider for SwitchedPrices {
    async fn fetch_etf_universe(&self, filter: &UniverseFilter) -> Result<Vec<EtfRecord>> {
        self.inner.fetch_etf_universe(filter).await
    }

    async fn fetch_price_history(&self, code: &str, range: DateRange) -> Result<Vec<PricePoint>> {
        if !self.online.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.fetch_price_history(code, range).await
    }

    async fn fetch_news(&self, filter: &NewsFilter) -> Result<Vec<NewsItem>> {
        self.inner.fetch_news(filter).await
    }
}
