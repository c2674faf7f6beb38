//! Strategy engine
//!
//! Generation, backtesting and feedback optimization of ETF allocations,
//! plus the strategy lifecycle.

pub mod backtest;
pub mod generate;
pub mod lifecycle;
pub mod optimize;

pub use backtest::run_backtest;
pub use generate::generate_strategy;
pub use lifecycle::{can_transition, fork, record_backtest, transition};
pub use optimize::{optimize_strategy, parse_directives, Directive};

use crate::models::RiskLevel;

const PROJECTION_ITERATIONS: usize = 200;

/// Default annualized volatility when no price history was available
pub(crate) fn default_volatility(asset_class: &str, risk_level: RiskLevel) -> f64 {
    match asset_class {
        "债券" => 0.04,
        "货币" => 0.01,
        "商品" => 0.15,
        "REITs" => 0.12,
        _ => match risk_level {
            RiskLevel::Low => 0.15,
            RiskLevel::Medium => 0.20,
            RiskLevel::High => 0.28,
        },
    }
}

/// Long-run expected annual return per asset class
pub(crate) fn expected_return(asset_class: &str, risk_level: RiskLevel) -> f64 {
    match asset_class {
        "债券" => 0.03,
        "货币" => 0.02,
        "商品" => 0.05,
        "REITs" => 0.06,
        _ => match risk_level {
            RiskLevel::Low => 0.07,
            RiskLevel::Medium => 0.08,
            RiskLevel::High => 0.10,
        },
    }
}

/// Whether a holding's class, category or name matches a user term
pub(crate) fn matches_term(term: &str, asset_class: &str, category: &str, sub_category: &str, name: &str) -> bool {
    !term.is_empty()
        && (asset_class == term
            || sub_category == term
            || category.contains(term)
            || name.contains(term))
}

/// Euclidean projection of `v` onto `{w : lo <= w_i <= hi, sum(w) = 1}`.
///
/// Bisects on the shift `tau` in `clamp(v_i - tau, lo, hi)` and then spreads
/// the remaining residual over coordinates with slack, so the bounds hold
/// exactly. Requires `n * lo <= 1 <= n * hi`.
pub(crate) fn project_capped_simplex(v: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    if v.is_empty() {
        return Vec::new();
    }

    let shifted = |tau: f64| -> Vec<f64> { v.iter().map(|x| (x - tau).clamp(lo, hi)).collect() };

    let mut low = v.iter().cloned().fold(f64::INFINITY, f64::min) - hi;
    let mut high = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max) - lo;

    for _ in 0..PROJECTION_ITERATIONS {
        let mid = 0.5 * (low + high);
        let total: f64 = shifted(mid).iter().sum();
        if total > 1.0 {
            low = mid;
        } else {
            high = mid;
        }
    }

    let mut w = shifted(0.5 * (low + high));

    for _ in 0..8 {
        let residual = 1.0 - w.iter().sum::<f64>();
        if residual.abs() < 1e-15 {
            break;
        }
        let slack: Vec<f64> = w
            .iter()
            .map(|x| if residual > 0.0 { hi - x } else { x - lo })
            .collect();
        let total_slack: f64 = slack.iter().sum();
        if total_slack <= 0.0 {
            break;
        }
        for (x, s) in w.iter_mut().zip(&slack) {
            *x = (*x + residual * s / total_slack).clamp(lo, hi);
        }
    }

    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_respects_bounds() {
        let w = project_capped_simplex(&[0.9, 0.05, 0.03, 0.02], 0.02, 0.35);
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(w.iter().all(|x| *x <= 0.35 && *x >= 0.02));
    }

    #[test]
    fn test_projection_is_identity_inside_the_set() {
        let v = [0.3, 0.3, 0.2, 0.2];
        let w = project_capped_simplex(&v, 0.02, 0.35);
        for (a, b) in v.iter().zip(&w) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
