//! Valuation estimates from price history
//!
//! PE is read off a monotonic curve over the price-position percentile,
//! scaled by an industry baseline and adjusted for volatility. PB follows
//! PE through a fixed empirical ratio. Output is always tagged estimated.

use crate::config::DerivationConfig;
use crate::models::{ConfidenceLevel, EnrichedEtfRecord, PricePoint};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_PE: f64 = 18.0;

const INDUSTRY_BASE_PE: &[(&str, f64)] = &[
    ("科技", 25.0),
    ("医药", 30.0),
    ("金融", 8.0),
    ("消费", 20.0),
    ("能源", 12.0),
    ("军工", 35.0),
    ("地产", 10.0),
    ("材料", 15.0),
];

/// (percentile, PE multiplier), strictly increasing in both coordinates
const PERCENTILE_CURVE: &[(f64, f64)] = &[
    (0.0, 0.6),
    (0.2, 0.8),
    (0.5, 1.0),
    (0.8, 1.25),
    (1.0, 1.5),
];

const REFERENCE_VOLATILITY: f64 = 0.3;
const VOLATILITY_SENSITIVITY: f64 = 0.2;
const MIN_CONFIDENCE: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationEstimate {
    pub pe: f64,
    pub pb: f64,
    /// Position of the last close within the window's range, in [0, 1]
    pub percentile: f64,
    pub volatility: f64,
    pub data_points: usize,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValuationLevel {
    High,
    Moderate,
    Low,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketValuation {
    pub level: ValuationLevel,
    pub average_pe: Option<f64>,
    pub average_pb: Option<f64>,
    pub analysis: String,
    pub sample_size: usize,
}

/// Estimate PE/PB, percentile and volatility. Never fails: short or empty
/// histories fall back to the available window with reduced confidence.
pub fn estimate_valuation(
    prices: &[PricePoint],
    industry: Option<&str>,
    config: &DerivationConfig,
) -> ValuationEstimate {
    let window = config.valuation_window.max(2);
    let closes: Vec<f64> = prices
        .iter()
        .map(|p| p.close)
        .filter(|c| c.is_finite() && *c > 0.0)
        .collect();
    let recent = &closes[closes.len().saturating_sub(window)..];

    let percentile = price_percentile(recent);
    let volatility = annualized_volatility(recent, config.trading_days_per_year);
    let base_pe = base_pe(industry);

    let pe = if volatility <= f64::EPSILON {
        base_pe
    } else {
        let vol_factor = 1.0 + (volatility - REFERENCE_VOLATILITY) * VOLATILITY_SENSITIVITY;
        (base_pe * curve(percentile) * vol_factor).clamp(base_pe * 0.5, base_pe * 2.0)
    };

    let (confidence, note) = if recent.len() < window {
        (
            (recent.len() as f64 / window as f64).max(MIN_CONFIDENCE),
            Some(format!("仅有{}个价格数据点，使用全部可用窗口估算", recent.len())),
        )
    } else {
        (1.0, None)
    };

    ValuationEstimate {
        pe: round2(pe),
        pb: round2(pe * config.pb_pe_ratio),
        percentile,
        volatility,
        data_points: recent.len(),
        confidence,
        confidence_level: ConfidenceLevel::Estimated,
        note,
    }
}

/// Industry baseline PE; unknown industries use the broad-market value
pub fn base_pe(industry: Option<&str>) -> f64 {
    industry
        .and_then(|i| INDUSTRY_BASE_PE.iter().find(|(name, _)| *name == i))
        .map(|(_, pe)| *pe)
        .unwrap_or(DEFAULT_BASE_PE)
}

/// Market-wide valuation level from whatever PE/PB the records carry
pub fn assess_market_valuation(etfs: &[EnrichedEtfRecord]) -> MarketValuation {
    let pes: Vec<f64> = etfs.iter().filter_map(|e| e.pe.as_ref().map(|t| t.value)).collect();
    let pbs: Vec<f64> = etfs.iter().filter_map(|e| e.pb.as_ref().map(|t| t.value)).collect();

    if pes.is_empty() || pbs.is_empty() {
        return MarketValuation {
            level: ValuationLevel::Unknown,
            average_pe: None,
            average_pb: None,
            analysis: "数据不足，无法分析".to_string(),
            sample_size: 0,
        };
    }

    let avg_pe = mean(&pes);
    let avg_pb = mean(&pbs);

    let (level, analysis) = if avg_pe > 25.0 || avg_pb > 3.0 {
        (ValuationLevel::High, "市场整体估值偏高，建议谨慎投资，关注价值型ETF。")
    } else if avg_pe < 15.0 || avg_pb < 1.5 {
        (ValuationLevel::Low, "市场整体估值偏低，具有投资价值，可考虑增加配置。")
    } else {
        (ValuationLevel::Moderate, "市场整体估值合理，建议均衡配置，关注结构性机会。")
    };

    MarketValuation {
        level,
        average_pe: Some(round2(avg_pe)),
        average_pb: Some(round2(avg_pb)),
        analysis: analysis.to_string(),
        sample_size: pes.len(),
    }
}

/// Annualized sample standard deviation of log returns
pub fn annualized_volatility(closes: &[f64], periods_per_year: f64) -> f64 {
    let log_returns: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    sample_std(&log_returns) * periods_per_year.sqrt()
}

/// Sample (n - 1) standard deviation; zero for fewer than two values
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn price_percentile(closes: &[f64]) -> f64 {
    let Some(&last) = closes.last() else {
        return 0.5;
    };
    let min = closes.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = closes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if max - min <= f64::EPSILON {
        return 0.5;
    }
    ((last - min) / (max - min)).clamp(0.0, 1.0)
}

fn curve(percentile: f64) -> f64 {
    let p = percentile.clamp(0.0, 1.0);
    for pair in PERCENTILE_CURVE.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if p <= x1 {
            return y0 + (y1 - y0) * (p - x0) / (x1 - x0);
        }
    }
    PERCENTILE_CURVE.last().map(|(_, y)| *y).unwrap_or(1.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
