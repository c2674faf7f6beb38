//! Enrichment of raw ETF records with derived signals

use crate::config::DerivationConfig;
use crate::derivation::classifier::derive_classification;
use crate::derivation::valuation::estimate_valuation;
use crate::models::{EnrichedEtfRecord, EtfRecord, PriceBook, PricePoint, Tagged};

/// Build the enriched view of one record. Present raw fields are carried
/// as observed; only absent ones are filled by derivation or estimation.
pub fn enrich_etf(
    record: &EtfRecord,
    prices: Option<&[PricePoint]>,
    config: &DerivationConfig,
) -> EnrichedEtfRecord {
    let classification = derive_classification(&record.name, &record.code);
    let mut notes = Vec::new();

    let category = observed_or(&record.category, classification.category);
    let asset_class = observed_or(&record.asset_class, classification.asset_class);

    let valuation = prices
        .filter(|p| !p.is_empty())
        .map(|p| estimate_valuation(p, classification.industry.as_deref(), config));

    if let Some(note) = valuation.as_ref().and_then(|v| v.note.clone()) {
        notes.push(note);
    }

    let pe = match (record.pe, &valuation) {
        (Some(pe), _) => Some(Tagged::observed(pe)),
        (None, Some(v)) => Some(Tagged::estimated(v.pe)),
        (None, None) => None,
    };
    let pb = match (record.pb, &valuation) {
        (Some(pb), _) => Some(Tagged::observed(pb)),
        (None, Some(v)) => Some(Tagged::estimated(v.pb)),
        (None, None) => None,
    };

    EnrichedEtfRecord {
        record: record.clone(),
        category,
        sub_category: Tagged::derived(classification.sub_category),
        objective: Tagged::derived(classification.objective),
        asset_class,
        theme: classification.theme,
        region: classification.region,
        risk_level: classification.risk_level,
        pe,
        pb,
        volatility: valuation.as_ref().map(|v| v.volatility),
        price_percentile: valuation.as_ref().map(|v| v.percentile),
        notes,
    }
}

pub fn enrich_all(
    records: &[EtfRecord],
    prices: &PriceBook,
    config: &DerivationConfig,
) -> Vec<EnrichedEtfRecord> {
    records
        .iter()
        .map(|r| enrich_etf(r, prices.get(&r.code).map(Vec::as_slice), config))
        .collect()
}

fn observed_or(raw: &Option<String>, derived: String) -> Tagged<String> {
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => Tagged::observed(value.to_string()),
        None => Tagged::derived(derived),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceLevel;
    use chrono::NaiveDate;

    #[test]
    fn test_raw_fields_are_never_overwritten() {
        let mut record = EtfRecord::new("512760", "中证芯片ETF");
        record.category = Some("半导体主题".into());
        record.pe = Some(42.0);

        let enriched = enrich_etf(&record, None, &DerivationConfig::default());

        assert_eq!(enriched.record, record);
        assert_eq!(enriched.category.value, "半导体主题");
        assert_eq!(enriched.category.confidence_level, ConfidenceLevel::Observed);
        assert_eq!(enriched.pe, Some(Tagged::observed(42.0)));
        assert!(enriched.pb.is_none());
    }

    #[test]
    fn test_missing_fields_are_never_observed() {
        let record = EtfRecord::new("159995", "中证芯片ETF");
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let prices: Vec<PricePoint> = (0..30)
            .map(|i| PricePoint {
                date: start + chrono::Duration::days(i),
                close: 1.0 + 0.02 * (i as f64).sin(),
            })
            .collect();

        let enriched = enrich_etf(&record, Some(prices.as_slice()), &DerivationConfig::default());

        assert_eq!(enriched.category.value, "科技行业ETF");
        assert_eq!(enriched.category.confidence_level, ConfidenceLevel::Derived);
        assert_eq!(enriched.pe.as_ref().map(|t| t.confidence_level), Some(ConfidenceLevel::Estimated));
        assert_eq!(enriched.pb.as_ref().map(|t| t.confidence_level), Some(ConfidenceLevel::Estimated));
        assert!(enriched.volatility.is_some());
        assert!(!enriched.notes.is_empty());
    }
}
