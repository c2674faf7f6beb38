//! Strategy generation
//!
//! Filters the universe by the user's preferences, selects a diversified
//! set of ETFs biased towards the risk tolerance's volatility band, and
//! allocates by minimum estimated variance under per-ETF weight caps.

use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::models::{
    Allocation, EnrichedEtfRecord, ExtractedElements, GenerationContext, PerformanceEstimate,
    RiskTolerance, Strategy, StrategyStatus,
};
use crate::strategy::lifecycle::transition;
use crate::strategy::{default_volatility, expected_return, matches_term, project_capped_simplex};
use crate::Result;
use chrono::Utc;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const SAME_CATEGORY_CORRELATION: f64 = 0.6;
const CROSS_CATEGORY_CORRELATION: f64 = 0.2;
const GRADIENT_ITERATIONS: usize = 500;

/// Generate a strategy from collected elements and an enriched universe.
pub fn generate_strategy(
    elements: &ExtractedElements,
    universe: &[EnrichedEtfRecord],
    owner_id: Uuid,
    config: &StrategyConfig,
) -> Result<Strategy> {
    let risk = elements.risk_tolerance().ok_or_else(|| {
        EngineError::InvalidToolInput("risk tolerance is required to generate a strategy".into())
    })?;
    let preferred = elements.preferred_asset_classes();
    let forbidden = elements.forbidden_assets();
    let mut notes = Vec::new();

    let allowed: Vec<&EnrichedEtfRecord> = universe
        .iter()
        .filter(|etf| !forbidden.iter().any(|term| etf_matches(etf, term)))
        .collect();

    let buckets: Vec<Vec<&EnrichedEtfRecord>> = if preferred.is_empty() {
        vec![allowed.clone()]
    } else {
        preferred
            .iter()
            .map(|term| allowed.iter().copied().filter(|etf| etf_matches(etf, term)).collect())
            .collect()
    };

    if buckets.iter().all(|b| b.is_empty()) {
        return Err(EngineError::NoEligibleAssets(format!(
            "no ETF matches preferences {:?} after excluding {:?}",
            preferred, forbidden
        )));
    }

    let required = required_holdings(risk, config);
    let capacity = config.max_holdings.max(required);
    let band = risk.volatility_band();

    let mut selected = round_robin(buckets, band, capacity);

    if selected.len() < required {
        let chosen: HashSet<&str> = selected.iter().map(|e| e.code()).collect();
        let mut extra: Vec<&EnrichedEtfRecord> = allowed
            .iter()
            .copied()
            .filter(|e| !chosen.contains(e.code()))
            .collect();
        sort_by_band_fit(&mut extra, band);
        let needed = required - selected.len();
        let added: Vec<&EnrichedEtfRecord> = extra.into_iter().take(needed).collect();

        if !added.is_empty() {
            notes.push(format!(
                "偏好资产中可选ETF不足{}只，已从其他未排除资产中补充{}只以满足分散化要求",
                required,
                added.len()
            ));
        }
        selected.extend(added);
    }

    if selected.len() < required {
        return Err(EngineError::NoEligibleAssets(format!(
            "only {} eligible ETF(s), {} required for risk level {}",
            selected.len(),
            required,
            risk.label()
        )));
    }

    let vols: Vec<f64> = selected.iter().map(|e| volatility_of(e)).collect();
    let covariance = covariance_matrix(&selected, &vols);
    let weights = minimum_variance_weights(&covariance, config.min_weight, config.max_weight);

    let expected = expected_portfolio_return(&selected, &weights);
    let variance = quadratic_form(&covariance, &weights);

    if let Some(target) = elements.target_return() {
        if expected * 100.0 < target {
            notes.push(format!(
                "按资产类别长期收益估算，组合预期年化收益约{:.1}%，低于目标收益{:.1}%",
                expected * 100.0,
                target
            ));
        }
    }

    let mut allocations: Vec<Allocation> = selected
        .iter()
        .zip(&weights)
        .map(|(etf, w)| Allocation {
            etf_code: etf.code().to_string(),
            etf_name: etf.name().to_string(),
            weight: *w,
            asset_class: etf.asset_class.value.clone(),
            category: etf.category.value.clone(),
        })
        .collect();
    allocations.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.etf_code.cmp(&b.etf_code)));

    debug!(
        holdings = allocations.len(),
        risk = %risk,
        expected_volatility = variance.sqrt(),
        "Generated allocation"
    );

    let mut strategy = Strategy {
        id: Uuid::new_v4(),
        owner_id,
        parent_id: None,
        allocations,
        risk_level: risk,
        status: StrategyStatus::Draft,
        generation_context: GenerationContext {
            drivers: elements.summary(),
            notes,
            changes: Vec::new(),
        },
        performance_estimate: PerformanceEstimate {
            expected_return: expected,
            expected_volatility: variance.sqrt(),
        },
        backtest_result: None,
        version: 1,
        created_at: Utc::now(),
    };

    transition(&mut strategy, StrategyStatus::Generated)?;
    Ok(strategy)
}

/// Holdings needed so the weight cap is satisfiable, and at least
/// `min_holdings` above conservative.
fn required_holdings(risk: RiskTolerance, config: &StrategyConfig) -> usize {
    let by_cap = (1.0 / config.max_weight).ceil() as usize;
    if risk.requires_diversification() {
        by_cap.max(config.min_holdings)
    } else {
        by_cap.max(1)
    }
}

fn etf_matches(etf: &EnrichedEtfRecord, term: &str) -> bool {
    matches_term(
        term,
        &etf.asset_class.value,
        &etf.category.value,
        &etf.sub_category.value,
        etf.name(),
    )
}

fn volatility_of(etf: &EnrichedEtfRecord) -> f64 {
    etf.volatility
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or_else(|| default_volatility(&etf.asset_class.value, etf.risk_level))
}

fn band_distance(vol: f64, band: (f64, f64)) -> f64 {
    if vol < band.0 {
        band.0 - vol
    } else if vol > band.1 {
        vol - band.1
    } else {
        0.0
    }
}

/// ETFs with price history first, since only they can be backtested.
/// Within each group in-band ETFs come first, then closest to the band;
/// code breaks ties.
fn sort_by_band_fit(etfs: &mut [&EnrichedEtfRecord], band: (f64, f64)) {
    etfs.sort_by(|a, b| {
        a.volatility
            .is_none()
            .cmp(&b.volatility.is_none())
            .then_with(|| band_distance(volatility_of(a), band).total_cmp(&band_distance(volatility_of(b), band)))
            .then_with(|| a.code().cmp(b.code()))
    });
}

/// Take ETFs alternately from each preference bucket so every preferred
/// class is represented before any class gets a second slot.
fn round_robin<'a>(
    mut buckets: Vec<Vec<&'a EnrichedEtfRecord>>,
    band: (f64, f64),
    capacity: usize,
) -> Vec<&'a EnrichedEtfRecord> {
    for bucket in buckets.iter_mut() {
        sort_by_band_fit(bucket, band);
    }

    let mut selected: Vec<&EnrichedEtfRecord> = Vec::new();
    let mut chosen: HashSet<String> = HashSet::new();
    let mut cursors = vec![0usize; buckets.len()];

    loop {
        let mut progressed = false;
        for (bucket, cursor) in buckets.iter().zip(cursors.iter_mut()) {
            if selected.len() >= capacity {
                return selected;
            }
            while *cursor < bucket.len() {
                let etf = bucket[*cursor];
                *cursor += 1;
                if chosen.insert(etf.code().to_string()) {
                    selected.push(etf);
                    progressed = true;
                    break;
                }
            }
        }
        if !progressed {
            return selected;
        }
    }
}

fn covariance_matrix(etfs: &[&EnrichedEtfRecord], vols: &[f64]) -> Vec<Vec<f64>> {
    let n = etfs.len();
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let rho = if i == j {
                1.0
            } else if etfs[i].category.value == etfs[j].category.value
                && etfs[i].asset_class.value == etfs[j].asset_class.value
            {
                SAME_CATEGORY_CORRELATION
            } else {
                CROSS_CATEGORY_CORRELATION
            };
            cov[i][j] = rho * vols[i] * vols[j];
        }
    }
    cov
}

fn quadratic_form(cov: &[Vec<f64>], w: &[f64]) -> f64 {
    cov.iter()
        .zip(w)
        .map(|(row, wi)| wi * row.iter().zip(w).map(|(c, wj)| c * wj).sum::<f64>())
        .sum()
}

/// Projected gradient descent on `w' Σ w` over the capped simplex
fn minimum_variance_weights(cov: &[Vec<f64>], lo: f64, hi: f64) -> Vec<f64> {
    let n = cov.len();
    let lo = lo.min(1.0 / n as f64);

    // Lipschitz bound of the gradient 2Σw
    let lipschitz = 2.0
        * cov
            .iter()
            .map(|row| row.iter().map(|c| c.abs()).sum::<f64>())
            .fold(0.0, f64::max);
    let step = if lipschitz > 0.0 { 1.0 / lipschitz } else { 1.0 };

    let mut w = project_capped_simplex(&vec![1.0 / n as f64; n], lo, hi);

    for _ in 0..GRADIENT_ITERATIONS {
        let gradient: Vec<f64> = cov
            .iter()
            .map(|row| 2.0 * row.iter().zip(&w).map(|(c, wj)| c * wj).sum::<f64>())
            .collect();
        let candidate: Vec<f64> = w.iter().zip(&gradient).map(|(wi, g)| wi - step * g).collect();
        w = project_capped_simplex(&candidate, lo, hi);
    }

    w
}

fn expected_portfolio_return(etfs: &[&EnrichedEtfRecord], weights: &[f64]) -> f64 {
    etfs.iter()
        .zip(weights)
        .map(|(e, w)| w * expected_return(&e.asset_class.value, e.risk_level))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DerivationConfig;
    use crate::data::sample::synthetic_prices;
    use crate::derivation::enrich_etf;
    use crate::models::{ElementField, ElementValue, EtfRecord, InvestmentElement};

    pub(crate) fn sample_universe() -> Vec<EnrichedEtfRecord> {
        [
            ("510300", "沪深300ETF"),
            ("510500", "中证500ETF"),
            ("159915", "创业板ETF"),
            ("512760", "中证芯片ETF"),
            ("512010", "医药ETF"),
            ("159928", "消费ETF"),
            ("511010", "国债ETF"),
            ("511260", "十年国债ETF"),
            ("511220", "城投债ETF"),
            ("518880", "黄金ETF"),
        ]
        .iter()
        .map(|(code, name)| enrich_etf(&EtfRecord::new(*code, *name), None, &DerivationConfig::default()))
        .collect()
    }

    fn elements(risk: &str, preferred: &[&str], forbidden: &[&str]) -> ExtractedElements {
        let mut e = ExtractedElements::new();
        e.merge(InvestmentElement::new(
            ElementField::RiskTolerance,
            ElementValue::Text(risk.into()),
            0.9,
            1,
        ));
        e.merge(InvestmentElement::new(
            ElementField::PreferredAssetClasses,
            ElementValue::List(preferred.iter().map(|s| s.to_string()).collect()),
            0.75,
            1,
        ));
        if !forbidden.is_empty() {
            e.merge(InvestmentElement::new(
                ElementField::ForbiddenAssets,
                ElementValue::List(forbidden.iter().map(|s| s.to_string()).collect()),
                0.75,
                1,
            ));
        }
        e.merge(InvestmentElement::new(
            ElementField::Amount,
            ElementValue::Number(100_000.0),
            0.85,
            1,
        ));
        e
    }

    #[test]
    fn test_moderate_stock_bond_scenario() {
        let strategy = generate_strategy(
            &elements("稳健", &["股票", "债券"], &[]),
            &sample_universe(),
            Uuid::new_v4(),
            &StrategyConfig::default(),
        )
        .unwrap();

        assert!(strategy.allocations.len() >= 3);
        assert!((strategy.total_weight() - 1.0).abs() < 1e-6);
        assert!(strategy.max_weight() <= 0.35 + 1e-12);
        assert_eq!(strategy.status, StrategyStatus::Generated);
        assert_eq!(strategy.version, 1);
        assert!(strategy.allocations.iter().any(|a| a.asset_class == "债券"));
        assert!(strategy.allocations.iter().any(|a| a.asset_class == "股票"));
    }

    #[test]
    fn test_weight_invariants_across_profiles() {
        let universe = sample_universe();
        for risk in ["保守", "稳健", "积极", "激进"] {
            for preferred in [&["股票"][..], &["债券", "黄金"][..], &["科技", "医药", "消费"][..]] {
                let Ok(strategy) = generate_strategy(
                    &elements(risk, preferred, &[]),
                    &universe,
                    Uuid::new_v4(),
                    &StrategyConfig::default(),
                ) else {
                    continue;
                };
                assert!((strategy.total_weight() - 1.0).abs() < 1e-6, "{risk} {preferred:?}");
                assert!(strategy.max_weight() <= 0.35 + 1e-12, "{risk} {preferred:?}");
                assert!(strategy.allocations.len() >= 3);
                assert!(strategy.allocations.iter().all(|a| a.weight >= 0.0 && a.weight <= 1.0));
            }
        }
    }

    #[test]
    fn test_forbidden_assets_are_excluded() {
        let strategy = generate_strategy(
            &elements("积极", &["股票"], &["科技"]),
            &sample_universe(),
            Uuid::new_v4(),
            &StrategyConfig::default(),
        )
        .unwrap();
        assert!(strategy.allocations.iter().all(|a| a.etf_code != "512760"));
    }

    #[test]
    fn test_no_eligible_assets() {
        let result = generate_strategy(
            &elements("稳健", &["REITs"], &[]),
            &sample_universe(),
            Uuid::new_v4(),
            &StrategyConfig::default(),
        );
        assert!(matches!(result, Err(EngineError::NoEligibleAssets(_))));
    }

    #[test]
    fn test_priced_etfs_are_preferred() {
        let records: Vec<EtfRecord> = [
            ("510300", "沪深300ETF"),
            ("510500", "中证500ETF"),
            ("159915", "创业板ETF"),
            ("512760", "中证芯片ETF"),
            ("512010", "医药ETF"),
            ("159928", "消费ETF"),
        ]
        .iter()
        .map(|(code, name)| EtfRecord::new(*code, *name))
        .collect();
        let priced = ["159928", "512010", "512760"];
        let prices = synthetic_prices(&records, 400, chrono::Utc::now().date_naive());
        let universe: Vec<EnrichedEtfRecord> = records
            .iter()
            .map(|r| {
                let series = prices.get(&r.code).filter(|_| priced.contains(&r.code.as_str()));
                enrich_etf(r, series.map(|s| s.as_slice()), &DerivationConfig::default())
            })
            .collect();
        let config = StrategyConfig { max_holdings: 3, ..Default::default() };

        let strategy = generate_strategy(&elements("积极", &["股票"], &[]), &universe, Uuid::new_v4(), &config).unwrap();

        let mut codes = strategy.codes();
        codes.sort();
        assert_eq!(codes, vec!["159928", "512010", "512760"]);
    }

    #[test]
    fn test_thin_preference_is_widened() {
        // only one gold ETF in the universe
        let strategy = generate_strategy(
            &elements("稳健", &["黄金"], &[]),
            &sample_universe(),
            Uuid::new_v4(),
            &StrategyConfig::default(),
        )
        .unwrap();
        assert!(strategy.allocations.len() >= 3);
        assert!(!strategy.generation_context.notes.is_empty());
    }
}
