//! Daily-rebalanced backtest
//!
//! Pure function of (strategy weights, price history, period, config), so
//! repeated runs produce bit-identical metrics. Holdings without any close
//! inside the period are left out and the rest are renormalized.

use crate::config::StrategyConfig;
use crate::derivation::valuation::sample_std;
use crate::error::EngineError;
use crate::models::{BacktestPoint, BacktestResult, BacktestSummary, DateRange, PriceBook, Strategy};
use crate::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

const ZERO_VOLATILITY: f64 = 1e-12;

pub fn run_backtest(
    strategy: &Strategy,
    prices: &PriceBook,
    period: DateRange,
    config: &StrategyConfig,
) -> Result<BacktestResult> {
    if strategy.allocations.is_empty() {
        return Err(EngineError::InvalidToolInput("strategy has no allocations".into()));
    }

    let mut series: Vec<BTreeMap<NaiveDate, f64>> = Vec::with_capacity(strategy.allocations.len());
    let mut weights: Vec<f64> = Vec::with_capacity(strategy.allocations.len());
    let mut excluded: Vec<String> = Vec::new();
    for allocation in &strategy.allocations {
        let closes: BTreeMap<NaiveDate, f64> = prices
            .get(&allocation.etf_code)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| period.contains(p.date) && p.close.is_finite() && p.close > 0.0)
                    .map(|p| (p.date, p.close))
                    .collect()
            })
            .unwrap_or_default();
        if closes.is_empty() {
            excluded.push(allocation.etf_code.clone());
            continue;
        }
        series.push(closes);
        weights.push(allocation.weight);
    }

    let covered: f64 = weights.iter().sum();
    if series.is_empty() || covered <= 0.0 {
        return Err(EngineError::InsufficientData(format!(
            "no price history for {} in {} ~ {}",
            excluded.join(", "),
            period.start,
            period.end
        )));
    }
    // Priced holdings keep their relative weights
    for w in weights.iter_mut() {
        *w /= covered;
    }

    let dates: Vec<NaiveDate> = common_dates(&series);
    if dates.len() < 2 {
        return Err(EngineError::InsufficientData(format!(
            "{} common trading day(s) in {} ~ {}",
            dates.len(),
            period.start,
            period.end
        )));
    }

    let cost_rate = config.transaction_cost_bps.unwrap_or(0.0) / 10_000.0;

    let mut value = config.initial_capital;
    let mut points = Vec::with_capacity(dates.len());
    let mut returns = Vec::with_capacity(dates.len() - 1);

    points.push(BacktestPoint {
        date: dates[0],
        portfolio_value: value,
        daily_return: 0.0,
    });

    for pair in dates.windows(2) {
        let (prev, today) = (pair[0], pair[1]);

        let asset_returns: Vec<f64> = series
            .iter()
            .map(|s| match (s.get(&prev), s.get(&today)) {
                (Some(p0), Some(p1)) => p1 / p0 - 1.0,
                _ => 0.0,
            })
            .collect();

        let gross: f64 = weights.iter().zip(&asset_returns).map(|(w, r)| w * r).sum();

        // Turnover needed to pull drifted weights back to target
        let net = if cost_rate > 0.0 {
            let turnover: f64 = weights
                .iter()
                .zip(&asset_returns)
                .map(|(w, r)| (w * (1.0 + r) / (1.0 + gross) - w).abs())
                .sum();
            (1.0 + gross) * (1.0 - turnover * cost_rate) - 1.0
        } else {
            gross
        };

        value *= 1.0 + net;
        returns.push(net);
        points.push(BacktestPoint {
            date: today,
            portfolio_value: value,
            daily_return: net,
        });
    }

    let summary = summarize(&points, &returns, config);

    Ok(BacktestResult {
        period,
        initial_capital: config.initial_capital,
        series: points,
        summary,
        excluded,
    })
}

fn common_dates(series: &[BTreeMap<NaiveDate, f64>]) -> Vec<NaiveDate> {
    let Some((first, rest)) = series.split_first() else {
        return Vec::new();
    };
    let mut dates: BTreeSet<NaiveDate> = first.keys().copied().collect();
    for s in rest {
        dates.retain(|d| s.contains_key(d));
    }
    dates.into_iter().collect()
}

fn summarize(points: &[BacktestPoint], returns: &[f64], config: &StrategyConfig) -> BacktestSummary {
    let initial = config.initial_capital;
    let final_value = points.last().map(|p| p.portfolio_value).unwrap_or(initial);
    let trading_days = returns.len();

    let total_return = final_value / initial - 1.0;
    let annualized_return =
        (final_value / initial).powf(config.trading_days_per_year / trading_days as f64) - 1.0;
    let volatility = sample_std(returns) * config.trading_days_per_year.sqrt();

    let sharpe_ratio = if volatility < ZERO_VOLATILITY {
        None
    } else {
        Some((annualized_return - config.risk_free_rate) / volatility)
    };

    let mut peak = f64::MIN;
    let mut max_drawdown: f64 = 0.0;
    for p in points {
        peak = peak.max(p.portfolio_value);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - p.portfolio_value) / peak);
        }
    }

    let wins = returns.iter().filter(|r| **r > 0.0).count();
    let win_rate = wins as f64 / trading_days as f64;

    BacktestSummary {
        total_return,
        annualized_return,
        volatility,
        max_drawdown,
        sharpe_ratio,
        win_rate,
        trading_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Allocation, GenerationContext, PerformanceEstimate, PricePoint, RiskTolerance, StrategyStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn strategy(weights: &[(&str, f64)]) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            parent_id: None,
            allocations: weights
                .iter()
                .map(|(code, w)| Allocation {
                    etf_code: code.to_string(),
                    etf_name: code.to_string(),
                    weight: *w,
                    asset_class: "股票".into(),
                    category: "综合指数ETF".into(),
                })
                .collect(),
            risk_level: RiskTolerance::Moderate,
            status: StrategyStatus::Generated,
            generation_context: GenerationContext::default(),
            performance_estimate: PerformanceEstimate::default(),
            backtest_result: None,
            version: 1,
            created_at: Utc::now(),
        }
    }

    fn book(series: &[(&str, Vec<f64>)]) -> PriceBook {
        series
            .iter()
            .map(|(code, closes)| {
                (
                    code.to_string(),
                    closes
                        .iter()
                        .enumerate()
                        .map(|(i, c)| PricePoint { date: day(i as i64), close: *c })
                        .collect(),
                )
            })
            .collect()
    }

    fn period() -> DateRange {
        DateRange::new(day(0), day(400))
    }

    #[test]
    fn test_idempotent() {
        let closes_a: Vec<f64> = (0..120).map(|i| 1.0 + 0.1 * (i as f64 * 0.2).sin()).collect();
        let closes_b: Vec<f64> = (0..120).map(|i| 2.0 + 0.05 * (i as f64 * 0.13).cos()).collect();
        let prices = book(&[("A", closes_a), ("B", closes_b)]);
        let s = strategy(&[("A", 0.6), ("B", 0.4)]);
        let config = StrategyConfig::default();

        let first = run_backtest(&s, &prices, period(), &config).unwrap();
        let second = run_backtest(&s, &prices, period(), &config).unwrap();

        assert_eq!(first.summary, second.summary);
        assert_eq!(
            first.summary.annualized_return.to_bits(),
            second.summary.annualized_return.to_bits()
        );
    }

    #[test]
    fn test_flat_prices_have_no_sharpe() {
        let prices = book(&[("A", vec![1.0; 10]), ("B", vec![3.0; 10])]);
        let result = run_backtest(&strategy(&[("A", 0.5), ("B", 0.5)]), &prices, period(), &StrategyConfig::default())
            .unwrap();

        assert_eq!(result.summary.volatility, 0.0);
        assert_eq!(result.summary.sharpe_ratio, None);
        assert_eq!(result.summary.max_drawdown, 0.0);
        assert_eq!(result.summary.win_rate, 0.0);
    }

    #[test]
    fn test_known_path() {
        // A: +10% then -10%; B flat; 50/50 daily rebalance
        let prices = book(&[("A", vec![1.0, 1.1, 0.99]), ("B", vec![1.0, 1.0, 1.0])]);
        let result = run_backtest(&strategy(&[("A", 0.5), ("B", 0.5)]), &prices, period(), &StrategyConfig::default())
            .unwrap();

        let values: Vec<f64> = result.series.iter().map(|p| p.portfolio_value).collect();
        assert!((values[1] - 105_000.0).abs() < 1e-6);
        assert!((values[2] - 99_750.0).abs() < 1e-6);
        assert!((result.summary.max_drawdown - 0.05).abs() < 1e-9);
        assert_eq!(result.summary.trading_days, 2);
        assert!((result.summary.win_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_transaction_costs_reduce_value() {
        let prices = book(&[("A", vec![1.0, 1.1, 0.99]), ("B", vec![1.0, 1.0, 1.0])]);
        let s = strategy(&[("A", 0.5), ("B", 0.5)]);
        let free = run_backtest(&s, &prices, period(), &StrategyConfig::default()).unwrap();
        let config = StrategyConfig { transaction_cost_bps: Some(10.0), ..Default::default() };
        let costly = run_backtest(&s, &prices, period(), &config).unwrap();

        assert!(costly.summary.total_return < free.summary.total_return);
    }

    #[test]
    fn test_unpriced_holding_is_left_out() {
        let prices = book(&[("A", vec![1.0, 1.1, 0.99])]);
        let result = run_backtest(
            &strategy(&[("A", 0.5), ("B", 0.3), ("C", 0.2)]),
            &prices,
            period(),
            &StrategyConfig::default(),
        )
        .unwrap();

        assert_eq!(result.excluded, vec!["B", "C"]);
        // A carries the whole book
        assert!((result.series[1].portfolio_value - 110_000.0).abs() < 1e-6);
        assert_eq!(result.summary.trading_days, 2);
    }

    #[test]
    fn test_no_priced_holding() {
        let prices = book(&[("A", vec![])]);
        let result = run_backtest(&strategy(&[("A", 0.5), ("B", 0.5)]), &prices, period(), &StrategyConfig::default());
        assert!(matches!(result, Err(EngineError::InsufficientData(_))));
    }

    #[test]
    fn test_insufficient_overlap() {
        let prices = book(&[("A", vec![1.0, 1.1]), ("B", vec![1.0])]);
        let result = run_backtest(&strategy(&[("A", 0.5), ("B", 0.5)]), &prices, period(), &StrategyConfig::default());
        assert!(matches!(result, Err(EngineError::InsufficientData(_))));
    }
}
