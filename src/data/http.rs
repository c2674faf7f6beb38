//! HTTP market data provider
//!
//! Talks JSON to the external data service. Responses may wrap their
//! payload in `data` and may omit any optional field.

use crate::data::DataProvider;
use crate::error::EngineError;
use crate::models::{DateRange, EtfRecord, NewsFilter, NewsItem, PricePoint, UniverseFilter};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct HttpDataProvider {
    client: Client,
    base_url: String,
}

impl HttpDataProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(EngineError::Config(format!("data service URL must be http(s): {}", base_url)));
        }
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `Ok(None)` when `DATA_API_BASE_URL` is unset or blank
    pub fn from_env() -> Result<Option<Self>> {
        Self::configured(env::var("DATA_API_BASE_URL").ok())
    }

    fn configured(base_url: Option<String>) -> Result<Option<Self>> {
        match base_url.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(url) => Self::new(url).map(Some),
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::DataProvider(format!("request failed for {}: {}", path, e)))?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::DataProvider(format!("invalid JSON response from {}: {}", path, e)))?;

        if !status.is_success() {
            return Err(EngineError::DataProvider(format!(
                "data service returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

/// Accepts a bare array, `{"data": [...]}` or `{"data": {"<key>": [...]}}`.
fn unwrap_list<T: DeserializeOwned>(body: Value, key: &str) -> Result<Vec<T>> {
    let payload = match body {
        Value::Object(mut map) => map.remove("data").or_else(|| map.remove(key)).unwrap_or(Value::Null),
        other => other,
    };
    let list = match payload {
        Value::Object(mut map) => map.remove(key).unwrap_or(Value::Null),
        other => other,
    };
    match list {
        Value::Null => Ok(Vec::new()),
        value => Ok(serde_json::from_value(value)?),
    }
}

#[async_trait]
impl DataProvider for HttpDataProvider {
    async fn fetch_etf_universe(&self, filter: &UniverseFilter) -> Result<Vec<EtfRecord>> {
        let body = self.post_json("/api/v1/etf/universe", &serde_json::to_value(filter)?).await?;
        let records: Vec<EtfRecord> = unwrap_list(body, "etfs")?;
        debug!(count = records.len(), "Fetched ETF universe");
        Ok(records)
    }

    async fn fetch_price_history(&self, code: &str, range: DateRange) -> Result<Vec<PricePoint>> {
        let body = self
            .post_json(
                "/api/v1/etf/prices",
                &json!({
                    "code": code,
                    "start": range.start,
                    "end": range.end,
                }),
            )
            .await?;
        let mut points: Vec<PricePoint> = unwrap_list(body, "prices")?;
        points.retain(|p| range.contains(p.date));
        points.sort_by_key(|p| p.date);
        Ok(points)
    }

    async fn fetch_news(&self, filter: &NewsFilter) -> Result<Vec<NewsItem>> {
        let body = self.post_json("/api/v1/news", &serde_json::to_value(filter)?).await?;
        unwrap_list(body, "news")
    }
}
