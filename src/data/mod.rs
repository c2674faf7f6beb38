//! Market data provider contract
//!
//! The engine only reads reference data. Providers may return partial
//! records; nothing downstream assumes a field is populated.

pub mod http;
pub mod sample;

pub use http::HttpDataProvider;

use crate::derivation::derive_classification;
use crate::models::{DateRange, EtfRecord, NewsFilter, NewsItem, PricePoint, PriceBook, UniverseFilter};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn fetch_etf_universe(&self, filter: &UniverseFilter) -> Result<Vec<EtfRecord>>;

    /// Closes for one code inside `range`, sorted by date. Unknown codes yield an empty series.
    async fn fetch_price_history(&self, code: &str, range: DateRange) -> Result<Vec<PricePoint>>;

    async fn fetch_news(&self, filter: &NewsFilter) -> Result<Vec<NewsItem>>;
}

/// Immutable in-process snapshot of reference data
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataProvider {
    universe: Vec<EtfRecord>,
    prices: PriceBook,
    news: Vec<NewsItem>,
}

impl InMemoryDataProvider {
    pub fn new(universe: Vec<EtfRecord>, prices: PriceBook, news: Vec<NewsItem>) -> Self {
        Self { universe, prices, news }
    }

    /// Demo universe with synthetic prices ending today
    pub fn sample() -> Self {
        let universe = sample::sample_universe();
        let prices = sample::synthetic_prices(&universe, 400, chrono::Utc::now().date_naive());
        Self::new(universe, prices, sample::sample_news())
    }
}

#[async_trait]
impl DataProvider for InMemoryDataProvider {
    async fn fetch_etf_universe(&self, filter: &UniverseFilter) -> Result<Vec<EtfRecord>> {
        Ok(self
            .universe
            .iter()
            .filter(|etf| filter.codes.is_empty() || filter.codes.contains(&etf.code))
            .filter(|etf| {
                if filter.asset_classes.is_empty() {
                    return true;
                }
                let asset_class = etf
                    .asset_class
                    .clone()
                    .unwrap_or_else(|| derive_classification(&etf.name, &etf.code).asset_class);
                filter.asset_classes.contains(&asset_class)
            })
            .cloned()
            .collect())
    }

    async fn fetch_price_history(&self, code: &str, range: DateRange) -> Result<Vec<PricePoint>> {
        Ok(self
            .prices
            .get(code)
            .map(|series| series.iter().filter(|p| range.contains(p.date)).copied().collect())
            .unwrap_or_default())
    }

    async fn fetch_news(&self, filter: &NewsFilter) -> Result<Vec<NewsItem>> {
        let matching = self.news.iter().filter(|item| {
            filter.keywords.is_empty() || {
                let text = item.full_text();
                filter.keywords.iter().any(|kw| text.contains(kw.as_str()))
            }
        });

        Ok(match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        })
    }
}

/// HTTP provider when `DATA_API_BASE_URL` is set, in-memory sample data otherwise.
pub fn build_provider_from_env() -> Arc<dyn DataProvider> {
    match HttpDataProvider::from_env() {
        Ok(Some(provider)) => {
            info!("Using HTTP market data provider");
            Arc::new(provider)
        }
        Ok(None) => {
            info!("DATA_API_BASE_URL not set, using in-memory sample data");
            Arc::new(InMemoryDataProvider::sample())
        }
        Err(e) => {
            warn!(error = %e, "HTTP market data provider unavailable, using in-memory sample data");
            Arc::new(InMemoryDataProvider::sample())
        }
    }
}
