//! Derivation tools
//!
//! CPU-bound wrappers around element extraction and the derivation library.

use crate::config::DerivationConfig;
use crate::derivation::{analyze_news, build_virtual_sectors, enrich_all, rotation_analysis};
use crate::error::EngineError;
use crate::extraction::extract_elements;
use crate::models::Capability;
use crate::tools::{wrong_input, InputSchema, JsonKind, Tool, ToolInput, ToolOutput};
use crate::Result;

pub struct ExtractElementsTool;

#[async_trait::async_trait]
impl Tool for ExtractElementsTool {
    fn name(&self) -> &'static str {
        "extract_elements"
    }

    fn description(&self) -> &'static str {
        "Extract investment elements with confidence from a user message"
    }

    fn capability(&self) -> Capability {
        Capability::Derivation
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[("message", JsonKind::String), ("turn", JsonKind::Integer)])
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::ExtractElements { message, turn } = input else {
            return Err(wrong_input(self.name(), input));
        };
        Ok(ToolOutput::Elements(extract_elements(message, *turn)))
    }
}

pub struct EnrichEtfsTool {
    config: DerivationConfig,
}

impl EnrichEtfsTool {
    pub fn new(config: DerivationConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Tool for EnrichEtfsTool {
    fn name(&self) -> &'static str {
        "enrich_etfs"
    }

    fn description(&self) -> &'static str {
        "Derive classification, risk level and valuation estimates for raw ETF records"
    }

    fn capability(&self) -> Capability {
        Capability::Derivation
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[("records", JsonKind::Array)])
    }

    fn estimated_cost(&self) -> u32 {
        3
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::EnrichEtfs { records, prices } = input else {
            return Err(wrong_input(self.name(), input));
        };
        if records.is_empty() {
            return Err(EngineError::InsufficientData("no ETF records to enrich".into()));
        }
        Ok(ToolOutput::EnrichedEtfs(enrich_all(records, prices, &self.config)))
    }
}

pub struct ScoreNewsTool {
    config: DerivationConfig,
}

impl ScoreNewsTool {
    pub fn new(config: DerivationConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Tool for ScoreNewsTool {
    fn name(&self) -> &'static str {
        "score_news"
    }

    fn description(&self) -> &'static str {
        "Score news relevance per ETF and estimate sentiment"
    }

    fn capability(&self) -> Capability {
        Capability::Derivation
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[("news", JsonKind::Array), ("etfs", JsonKind::Array)])
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::ScoreNews { news, etfs } = input else {
            return Err(wrong_input(self.name(), input));
        };
        let analyses = news
            .iter()
            .map(|item| analyze_news(item, etfs, self.config.relevance_threshold))
            .collect();
        Ok(ToolOutput::NewsAnalyses(analyses))
    }
}

pub struct BuildSectorsTool;

#[async_trait::async_trait]
impl Tool for BuildSectorsTool {
    fn name(&self) -> &'static str {
        "build_sectors"
    }

    fn description(&self) -> &'static str {
        "Aggregate ETFs into virtual sectors and rank their rotation"
    }

    fn capability(&self) -> Capability {
        Capability::Derivation
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(&[
            ("etfs", JsonKind::Array),
            ("prices", JsonKind::Object),
            ("as_of", JsonKind::String),
        ])
    }

    fn estimated_cost(&self) -> u32 {
        2
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let ToolInput::BuildSectors { etfs, prices, as_of } = input else {
            return Err(wrong_input(self.name(), input));
        };
        let sectors = build_virtual_sectors(etfs, prices, *as_of);
        if sectors.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "no virtual sector has two priced constituents on {}",
                as_of
            )));
        }
        Ok(ToolOutput::Sectors(rotation_analysis(&sectors)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{sample_news, sample_universe, synthetic_prices};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_enrich_then_build_sectors() {
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
        let universe = sample_universe();
        let prices = synthetic_prices(&universe, 120, as_of);

        let ToolOutput::EnrichedEtfs(enriched) = EnrichEtfsTool::new(DerivationConfig::default())
            .execute(&ToolInput::EnrichEtfs { records: universe.clone(), prices: prices.clone() })
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(enriched.len(), universe.len());

        let output = BuildSectorsTool
            .execute(&ToolInput::BuildSectors { etfs: enriched, prices, as_of })
            .await
            .unwrap();
        assert!(matches!(output, ToolOutput::Sectors(ref r) if !r.ranking.is_empty()));
    }

    #[tokio::test]
    async fn test_score_news_finds_chip_etf() {
        let output = ScoreNewsTool::new(DerivationConfig::default())
            .execute(&ToolInput::ScoreNews { news: sample_news(), etfs: sample_universe() })
            .await
            .unwrap();

        let ToolOutput::NewsAnalyses(analyses) = output else {
            panic!("unexpected output");
        };
        assert!(analyses[0].related_etfs.contains(&"512760".to_string()));
    }

    #[tokio::test]
    async fn test_empty_universe_is_insufficient() {
        let result = EnrichEtfsTool::new(DerivationConfig::default())
            .execute(&ToolInput::EnrichEtfs { records: vec![], prices: Default::default() })
            .await;
        assert!(matches!(result, Err(EngineError::InsufficientData(_))));
    }
}
