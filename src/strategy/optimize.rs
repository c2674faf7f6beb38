//! Feedback optimization
//!
//! Turns user feedback into weight-adjustment directives and applies them
//! as proportional shrink/grow rules, renormalized under the weight caps.

use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::extraction::ASSET_VOCABULARY;
use crate::models::{Allocation, PerformanceEstimate, RiskLevel, Strategy, StrategyStatus};
use crate::strategy::lifecycle::{fork, transition};
use crate::strategy::{default_volatility, expected_return, matches_term, project_capped_simplex};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SHRINK: f64 = 0.7;
const GROW: f64 = 1.3;
const RISK_SHIFT: f64 = 0.2;
const CHANGE_EPSILON: f64 = 1e-4;

const REDUCE_WORDS: &[&str] = &[
    "降低", "减少", "少一点", "少点", "减仓", "少配", "太多", "太高", "reduce", "lower", "less", "cut",
];
const INCREASE_WORDS: &[&str] = &[
    "提高", "增加", "多一点", "多点", "加仓", "多配", "太少", "太低", "increase", "raise", "more", "add",
];

const ENGLISH_ALIASES: &[(&str, &str)] = &[
    ("tech", "科技"),
    ("bond", "债券"),
    ("stock", "股票"),
    ("equit", "股票"),
    ("gold", "黄金"),
    ("commodit", "商品"),
    ("consumer", "消费"),
    ("health", "医药"),
    ("medical", "医药"),
    ("financ", "金融"),
    ("dividend", "红利"),
];

const EQUITY_LIKE: &[&str] = &["股票", "商品", "REITs"];
const DEFENSIVE: &[&str] = &["债券", "货币"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "term", rename_all = "snake_case")]
pub enum Directive {
    ReduceExposure(String),
    IncreaseExposure(String),
    LowerRisk,
    RaiseRisk,
}

impl Directive {
    pub fn describe(&self) -> String {
        match self {
            Directive::ReduceExposure(term) => format!("降低{}配置", term),
            Directive::IncreaseExposure(term) => format!("提高{}配置", term),
            Directive::LowerRisk => "降低整体风险".to_string(),
            Directive::RaiseRisk => "提高整体风险".to_string(),
        }
    }
}

/// Parse free-text feedback into directives, one pass per clause.
pub fn parse_directives(feedback: &str) -> Vec<Directive> {
    let text = feedback.to_lowercase();
    let mut directives: Vec<Directive> = Vec::new();

    for clause in text
        .split(|c| matches!(c, '，' | ',' | '。' | '；' | ';' | '！' | '!' | '\n'))
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        let reduce = contains_any(clause, REDUCE_WORDS);
        let increase = contains_any(clause, INCREASE_WORDS);

        if clause.contains("风险") || clause.contains("risk") || clause.contains("波动") {
            let directive = if reduce && !clause.contains("太低") {
                Some(Directive::LowerRisk)
            } else if increase || clause.contains("太低") {
                Some(Directive::RaiseRisk)
            } else {
                None
            };
            push_unique(&mut directives, directive);
            continue;
        }

        if (clause.contains("收益") || clause.contains("return"))
            && (clause.contains("太低") || clause.contains("提高") || clause.contains("更高"))
        {
            push_unique(&mut directives, Some(Directive::RaiseRisk));
            continue;
        }

        if !reduce && !increase {
            continue;
        }
        for term in exposure_terms(clause) {
            let directive = if reduce {
                Directive::ReduceExposure(term)
            } else {
                Directive::IncreaseExposure(term)
            };
            push_unique(&mut directives, Some(directive));
        }
    }

    directives
}

/// Apply directives to a strategy and return the next version.
///
/// A saved strategy is forked first. Every directive leaves a line in
/// `generation_context.changes`, including those that matched nothing.
pub fn optimize_strategy(
    strategy: &Strategy,
    directives: &[Directive],
    config: &StrategyConfig,
) -> Result<Strategy> {
    if directives.is_empty() {
        return Err(EngineError::InvalidToolInput("feedback contains no adjustment directive".into()));
    }

    let mut next = if strategy.status == StrategyStatus::Saved {
        fork(strategy)
    } else {
        strategy.clone()
    };
    transition(&mut next, StrategyStatus::Optimizing)?;

    let before: Vec<f64> = next.allocations.iter().map(|a| a.weight).collect();
    let mut raw = before.clone();
    let mut changes = Vec::new();

    for directive in directives {
        let prior = raw.clone();
        let touched = apply_directive(directive, &next.allocations, &mut raw);
        if touched == 0 {
            changes.push(format!("{}：当前组合中没有匹配的持仓，未作调整", directive.describe()));
            continue;
        }
        if !shares_moved(&prior, &raw) {
            // every holding scaled alike, renormalization cancels it
            raw = prior;
            changes.push(format!("{}：组合中的持仓同属一类，按比例调整后权重不变，未作调整", directive.describe()));
            continue;
        }
        changes.push(format!("{}：调整{}只ETF", directive.describe(), touched));
        match directive {
            Directive::LowerRisk => next.risk_level = next.risk_level.lower(),
            Directive::RaiseRisk => next.risk_level = next.risk_level.raise(),
            _ => {}
        }
    }

    let n = raw.len();
    let total: f64 = raw.iter().sum();
    let normalized: Vec<f64> = raw.iter().map(|w| w / total).collect();
    let lo = config.min_weight.min(1.0 / n as f64);
    let hi = config.max_weight.max(1.0 / n as f64);
    let weights = project_capped_simplex(&normalized, lo, hi);

    for ((allocation, old), new) in next.allocations.iter_mut().zip(&before).zip(&weights) {
        if (new - old).abs() > CHANGE_EPSILON {
            changes.push(format!(
                "{} {}：{:.1}% → {:.1}%",
                allocation.etf_code,
                allocation.etf_name,
                old * 100.0,
                new * 100.0
            ));
        }
        allocation.weight = *new;
    }
    next.allocations
        .sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.etf_code.cmp(&b.etf_code)));

    next.version += 1;
    next.backtest_result = None;
    next.performance_estimate = estimate_from_allocations(&next.allocations);
    next.generation_context.changes = changes;

    debug!(
        strategy_id = %next.id,
        version = next.version,
        directives = directives.len(),
        "Optimized strategy"
    );

    Ok(next)
}

fn apply_directive(directive: &Directive, allocations: &[Allocation], raw: &mut [f64]) -> usize {
    let mut touched = 0;
    for (allocation, w) in allocations.iter().zip(raw.iter_mut()) {
        let factor = match directive {
            Directive::ReduceExposure(term) if holds(allocation, term) => SHRINK,
            Directive::IncreaseExposure(term) if holds(allocation, term) => GROW,
            Directive::LowerRisk if is_class(allocation, EQUITY_LIKE) => 1.0 - RISK_SHIFT,
            Directive::LowerRisk if is_class(allocation, DEFENSIVE) => 1.0 + RISK_SHIFT,
            Directive::RaiseRisk if is_class(allocation, EQUITY_LIKE) => 1.0 + RISK_SHIFT,
            Directive::RaiseRisk if is_class(allocation, DEFENSIVE) => 1.0 - RISK_SHIFT,
            _ => continue,
        };
        *w *= factor;
        touched += 1;
    }
    touched
}

/// Whether relative weights differ once both sides are renormalized
fn shares_moved(prior: &[f64], raw: &[f64]) -> bool {
    let (before, after): (f64, f64) = (prior.iter().sum(), raw.iter().sum());
    if before <= 0.0 || after <= 0.0 {
        return true;
    }
    prior
        .iter()
        .zip(raw)
        .any(|(p, r)| (p / before - r / after).abs() > CHANGE_EPSILON)
}

fn holds(allocation: &Allocation, term: &str) -> bool {
    matches_term(term, &allocation.asset_class, &allocation.category, "", &allocation.etf_name)
}

fn is_class(allocation: &Allocation, classes: &[&str]) -> bool {
    classes.contains(&allocation.asset_class.as_str())
}

fn estimate_from_allocations(allocations: &[Allocation]) -> PerformanceEstimate {
    // Holdings are treated as independent with class-default volatility
    let variance: f64 = allocations
        .iter()
        .map(|a| (a.weight * default_volatility(&a.asset_class, RiskLevel::Medium)).powi(2))
        .sum();
    PerformanceEstimate {
        expected_return: allocations
            .iter()
            .map(|a| a.weight * expected_return(&a.asset_class, RiskLevel::Medium))
            .sum(),
        expected_volatility: variance.sqrt(),
    }
}

fn exposure_terms(clause: &str) -> Vec<String> {
    let mut terms: Vec<String> = ASSET_VOCABULARY
        .iter()
        .filter(|term| clause.contains(&term.to_lowercase()))
        .map(|term| term.to_string())
        .collect();
    for (alias, term) in ENGLISH_ALIASES {
        if clause.contains(alias) && !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn push_unique(directives: &mut Vec<Directive>, directive: Option<Directive>) {
    if let Some(d) = directive {
        if !directives.contains(&d) {
            directives.push(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationContext, RiskTolerance};
    use chrono::Utc;
    use uuid::Uuid;

    fn allocation(code: &str, name: &str, weight: f64, asset_class: &str, category: &str) -> Allocation {
        Allocation {
            etf_code: code.into(),
            etf_name: name.into(),
            weight,
            asset_class: asset_class.into(),
            category: category.into(),
        }
    }

    fn backtested() -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            parent_id: None,
            allocations: vec![
                allocation("512760", "芯片ETF", 0.30, "股票", "科技行业ETF"),
                allocation("510300", "沪深300ETF", 0.30, "股票", "综合指数ETF"),
                allocation("511010", "国债ETF", 0.25, "债券", "债券ETF"),
                allocation("518880", "黄金ETF", 0.15, "商品", "商品ETF"),
            ],
            risk_level: RiskTolerance::Active,
            status: StrategyStatus::Backtested,
            generation_context: GenerationContext::default(),
            performance_estimate: PerformanceEstimate::default(),
            backtest_result: None,
            version: 1,
            created_at: Utc::now(),
        }
    }

    fn weight_of(s: &Strategy, code: &str) -> f64 {
        s.allocations.iter().find(|a| a.etf_code == code).map(|a| a.weight).unwrap()
    }

    #[test]
    fn test_parse_directives() {
        assert_eq!(parse_directives("风险太高了"), vec![Directive::LowerRisk]);
        assert_eq!(
            parse_directives("reduce tech exposure"),
            vec![Directive::ReduceExposure("科技".into())]
        );
        assert_eq!(
            parse_directives("减少科技，多配一些债券"),
            vec![
                Directive::ReduceExposure("科技".into()),
                Directive::IncreaseExposure("债券".into())
            ]
        );
        assert_eq!(parse_directives("收益太低了"), vec![Directive::RaiseRisk]);
        assert!(parse_directives("看起来不错").is_empty());
    }

    #[test]
    fn test_reduce_tech_exposure() {
        let s = backtested();
        let next = optimize_strategy(&s, &[Directive::ReduceExposure("科技".into())], &StrategyConfig::default())
            .unwrap();

        assert_eq!(next.version, 2);
        assert_eq!(next.status, StrategyStatus::Optimizing);
        assert!(weight_of(&next, "512760") < 0.30);
        assert!((next.total_weight() - 1.0).abs() < 1e-6);
        assert!(next.max_weight() <= 0.35 + 1e-9);
        assert_eq!(next.allocations.len(), s.allocations.len());
    }

    #[test]
    fn test_lower_risk_shifts_to_bonds() {
        let s = backtested();
        let next = optimize_strategy(&s, &[Directive::LowerRisk], &StrategyConfig::default()).unwrap();

        assert!(weight_of(&next, "511010") > 0.25);
        assert_eq!(next.risk_level, RiskTolerance::Moderate);
    }

    #[test]
    fn test_uniform_risk_shift_is_a_no_op() {
        let mut s = backtested();
        s.allocations = vec![
            allocation("512760", "芯片ETF", 0.34, "股票", "科技行业ETF"),
            allocation("510300", "沪深300ETF", 0.33, "股票", "综合指数ETF"),
            allocation("510500", "中证500ETF", 0.33, "股票", "综合指数ETF"),
        ];

        let next = optimize_strategy(&s, &[Directive::LowerRisk], &StrategyConfig::default()).unwrap();

        assert_eq!(next.generation_context.changes.len(), 1);
        assert!(next.generation_context.changes[0].contains("未作调整"));
        assert_eq!(next.risk_level, s.risk_level);
        for a in &s.allocations {
            assert!((weight_of(&next, &a.etf_code) - a.weight).abs() < 1e-9);
        }
    }

    #[test]
    fn test_unmatched_directive_is_recorded() {
        let s = backtested();
        let next = optimize_strategy(&s, &[Directive::ReduceExposure("医药".into())], &StrategyConfig::default())
            .unwrap();

        assert!(next.generation_context.changes.iter().any(|c| c.contains("未作调整")));
        for a in &s.allocations {
            assert!((weight_of(&next, &a.etf_code) - a.weight).abs() < 1e-9);
        }
    }

    #[test]
    fn test_repeated_shrink_keeps_every_holding() {
        let config = StrategyConfig::default();
        let mut s = backtested();
        for _ in 0..10 {
            let mut next = optimize_strategy(&s, &[Directive::ReduceExposure("科技".into())], &config).unwrap();
            transition(&mut next, StrategyStatus::Backtested).unwrap();
            s = next;
        }
        assert_eq!(s.allocations.len(), 4);
        assert!(s.allocations.iter().all(|a| a.weight >= config.min_weight - 1e-9));
        assert_eq!(s.version, 11);
    }

    #[test]
    fn test_saved_strategy_forks() {
        let mut s = backtested();
        s.status = StrategyStatus::Saved;
        let next = optimize_strategy(&s, &[Directive::LowerRisk], &StrategyConfig::default()).unwrap();

        assert_eq!(next.parent_id, Some(s.id));
        assert_ne!(next.id, s.id);
        assert_eq!(s.status, StrategyStatus::Saved);
    }

    #[test]
    fn test_generated_strategy_must_be_backtested_first() {
        let mut s = backtested();
        s.status = StrategyStatus::Generated;
        let result = optimize_strategy(&s, &[Directive::LowerRisk], &StrategyConfig::default());
        assert!(matches!(result, Err(EngineError::StateTransition(_))));
    }
}
