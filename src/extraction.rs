//! Rule-based investment element extraction
//!
//! Turns one user message into confidence-scored `InvestmentElement`s.
//! Merging into the session is left to `ExtractedElements::merge`.

use crate::models::{ElementField, ElementValue, InvestmentElement};
use lazy_static::lazy_static;
use regex::Regex;

const DIRECT_RISK_CONFIDENCE: f64 = 0.9;
const SYNONYM_RISK_CONFIDENCE: f64 = 0.65;
const RETURN_CONFIDENCE: f64 = 0.8;
const AMOUNT_CONFIDENCE: f64 = 0.85;
const HORIZON_CONFIDENCE: f64 = 0.7;
const ASSET_CONFIDENCE: f64 = 0.75;
const DRAWDOWN_CONFIDENCE: f64 = 0.75;

const RISK_SYNONYMS: &[(&str, &[&str])] = &[
    ("保守", &["稳定", "低风险", "安全"]),
    ("稳健", &["平衡", "中等风险"]),
    ("积极", &["成长", "高收益"]),
    ("激进", &["高风险", "投机"]),
];

/// Asset classes and industries a user can prefer or exclude
pub const ASSET_VOCABULARY: &[&str] = &[
    "股票", "债券", "黄金", "商品", "货币", "REITs",
    "科技", "医药", "消费", "金融", "地产", "新能源", "军工", "红利",
];

const NEGATION_MARKERS: &[&str] = &["不要", "不想", "不投", "避开", "排除", "不考虑", "别投"];
const RETURN_CONTEXT: &[&str] = &["收益", "回报", "年化"];

lazy_static! {
    static ref CLAUSE_SPLIT: Regex = Regex::new(r"[，。,.;；！!？?\n]").expect("valid clause pattern");
    static ref PERCENT: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*[%％]").expect("valid percent pattern");
    static ref DRAWDOWN: Regex =
        Regex::new(r"回撤[^\d]{0,8}(\d+(?:\.\d+)?)\s*[%％]").expect("valid drawdown pattern");
    static ref AMOUNT_WAN: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*万").expect("valid amount pattern");
    static ref AMOUNT_YUAN: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*元").expect("valid amount pattern");
    // one or two digits standing alone, so calendar years and 年化 are skipped
    static ref YEARS: Regex = Regex::new(r"(?:^|[^\d.])(\d{1,2})\s*年(?:[^化]|$)").expect("valid horizon pattern");
}

/// Extract every element the message states.
pub fn extract_elements(message: &str, turn: u32) -> Vec<InvestmentElement> {
    let mut elements = Vec::new();
    let clauses = split_clauses(message);

    if let Some((label, confidence)) = extract_risk(&clauses) {
        elements.push(InvestmentElement::new(
            ElementField::RiskTolerance,
            ElementValue::Text(label.to_string()),
            confidence,
            turn,
        ));
    }

    let drawdown = DRAWDOWN.captures(message).and_then(|c| {
        let m = c.get(1)?;
        Some((m.start(), m.as_str().parse::<f64>().ok()?))
    });
    if let Some((_, value)) = drawdown {
        elements.push(InvestmentElement::new(
            ElementField::MaxDrawdown,
            ElementValue::Number(value),
            DRAWDOWN_CONFIDENCE,
            turn,
        ));
    }

    if RETURN_CONTEXT.iter().any(|kw| message.contains(kw)) {
        let target = PERCENT
            .captures_iter(message)
            .filter_map(|c| c.get(1))
            .find(|m| drawdown.map(|(pos, _)| pos != m.start()).unwrap_or(true))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        if let Some(value) = target {
            elements.push(InvestmentElement::new(
                ElementField::TargetReturn,
                ElementValue::Number(value),
                RETURN_CONFIDENCE,
                turn,
            ));
        }
    }

    if let Some(amount) = extract_amount(message) {
        elements.push(InvestmentElement::new(
            ElementField::Amount,
            ElementValue::Number(amount),
            AMOUNT_CONFIDENCE,
            turn,
        ));
    }

    if let Some(horizon) = extract_horizon(message) {
        elements.push(InvestmentElement::new(
            ElementField::Horizon,
            ElementValue::Text(horizon),
            HORIZON_CONFIDENCE,
            turn,
        ));
    }

    let (preferred, forbidden) = extract_assets(&clauses);
    if !preferred.is_empty() {
        elements.push(InvestmentElement::new(
            ElementField::PreferredAssetClasses,
            ElementValue::List(preferred),
            ASSET_CONFIDENCE,
            turn,
        ));
    }
    if !forbidden.is_empty() {
        elements.push(InvestmentElement::new(
            ElementField::ForbiddenAssets,
            ElementValue::List(forbidden),
            ASSET_CONFIDENCE,
            turn,
        ));
    }

    elements
}

fn split_clauses(message: &str) -> Vec<&str> {
    CLAUSE_SPLIT
        .split(message)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Whether `term` occurs in `clause` after a negation marker.
fn is_negated(clause: &str, term: &str) -> bool {
    let Some(term_pos) = clause.find(term) else {
        return false;
    };
    NEGATION_MARKERS
        .iter()
        .filter_map(|marker| clause.find(marker).map(|pos| pos + marker.len()))
        .any(|end| end <= term_pos)
}

fn affirmed(clauses: &[&str], term: &str) -> bool {
    clauses.iter().any(|c| c.contains(term) && !is_negated(c, term))
}

fn extract_risk(clauses: &[&str]) -> Option<(&'static str, f64)> {
    for (label, _) in RISK_SYNONYMS {
        if affirmed(clauses, label) {
            return Some((*label, DIRECT_RISK_CONFIDENCE));
        }
    }
    for (label, synonyms) in RISK_SYNONYMS {
        if synonyms.iter().any(|s| affirmed(clauses, s)) {
            return Some((*label, SYNONYM_RISK_CONFIDENCE));
        }
    }
    None
}

fn extract_amount(message: &str) -> Option<f64> {
    if let Some(value) = first_number(&AMOUNT_WAN, message) {
        return Some(value * 10_000.0);
    }
    first_number(&AMOUNT_YUAN, message)
}

fn extract_horizon(message: &str) -> Option<String> {
    for term in ["短期", "中期", "长期"] {
        if message.contains(term) {
            return Some(term.to_string());
        }
    }
    YEARS
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| format!("{}年", m.as_str()))
}

fn extract_assets(clauses: &[&str]) -> (Vec<String>, Vec<String>) {
    let mut preferred = Vec::new();
    let mut forbidden = Vec::new();

    for term in ASSET_VOCABULARY {
        let mentioned: Vec<&&str> = clauses.iter().filter(|c| c.contains(term)).collect();
        if mentioned.is_empty() {
            continue;
        }
        if mentioned.iter().any(|c| is_negated(c, term)) {
            forbidden.push(term.to_string());
        } else {
            preferred.push(term.to_string());
        }
    }

    (preferred, forbidden)
}

fn first_number(pattern: &Regex, message: &str) -> Option<f64> {
    pattern
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(elements: &[InvestmentElement], field: ElementField) -> Option<&InvestmentElement> {
        elements.iter().find(|e| e.field == field)
    }

    #[test]
    fn test_full_profile() {
        let elements = extract_elements("我的风险偏好是稳健，打算投10万，偏好股票和债券，期望年化收益8%", 1);

        let risk = find(&elements, ElementField::RiskTolerance).unwrap();
        assert_eq!(risk.value, ElementValue::Text("稳健".into()));
        assert_eq!(risk.confidence, DIRECT_RISK_CONFIDENCE);

        assert_eq!(
            find(&elements, ElementField::Amount).unwrap().value,
            ElementValue::Number(100_000.0)
        );
        assert_eq!(
            find(&elements, ElementField::PreferredAssetClasses).unwrap().value,
            ElementValue::List(vec!["股票".into(), "债券".into()])
        );
        assert_eq!(
            find(&elements, ElementField::TargetReturn).unwrap().value,
            ElementValue::Number(8.0)
        );
    }

    #[test]
    fn test_negated_assets_are_forbidden() {
        let elements = extract_elements("想买消费和医药，不要科技", 2);
        assert_eq!(
            find(&elements, ElementField::PreferredAssetClasses).unwrap().value,
            ElementValue::List(vec!["医药".into(), "消费".into()])
        );
        assert_eq!(
            find(&elements, ElementField::ForbiddenAssets).unwrap().value,
            ElementValue::List(vec!["科技".into()])
        );
    }

    #[test]
    fn test_negated_risk_word_is_skipped() {
        let elements = extract_elements("我比较稳健，不要太激进", 1);
        let risk = find(&elements, ElementField::RiskTolerance).unwrap();
        assert_eq!(risk.value, ElementValue::Text("稳健".into()));
    }

    #[test]
    fn test_synonym_has_lower_confidence() {
        let elements = extract_elements("我希望资金安全一些", 1);
        let risk = find(&elements, ElementField::RiskTolerance).unwrap();
        assert_eq!(risk.value, ElementValue::Text("保守".into()));
        assert_eq!(risk.confidence, SYNONYM_RISK_CONFIDENCE);
    }

    #[test]
    fn test_drawdown_is_not_target_return() {
        let elements = extract_elements("最大回撤不超过10%，目标收益12%", 1);
        assert_eq!(
            find(&elements, ElementField::MaxDrawdown).unwrap().value,
            ElementValue::Number(10.0)
        );
        assert_eq!(
            find(&elements, ElementField::TargetReturn).unwrap().value,
            ElementValue::Number(12.0)
        );
    }

    #[test]
    fn test_horizon_years() {
        let elements = extract_elements("计划投资3年", 1);
        assert_eq!(
            find(&elements, ElementField::Horizon).unwrap().value,
            ElementValue::Text("3年".into())
        );
    }

    #[test]
    fn test_calendar_year_is_not_a_horizon() {
        let elements = extract_elements("我2024年开始接触基金，偏好债券", 1);
        assert!(find(&elements, ElementField::Horizon).is_none());

        let elements = extract_elements("2024年开始接触基金，打算拿5年", 1);
        assert_eq!(
            find(&elements, ElementField::Horizon).unwrap().value,
            ElementValue::Text("5年".into())
        );
    }

    #[test]
    fn test_plain_chat_extracts_nothing() {
        assert!(extract_elements("你好", 1).is_empty());
    }
}
