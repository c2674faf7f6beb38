//! Compliance rules
//!
//! Each rule scans text for one violation category. Rules whose findings
//! can be softened provide a `rewrite`.

use crate::models::{ContentType, RiskLevel, Violation, ViolationCategory};
use lazy_static::lazy_static;
use regex::Regex;

/// Trait for compliance rules
pub trait SafetyRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Severity of every violation this rule reports
    fn severity(&self) -> RiskLevel;

    fn applies_to(&self, _content_type: ContentType) -> bool {
        true
    }

    fn check(&self, text: &str) -> Vec<Violation>;

    /// Softened text, when this rule knows how to fix its own findings
    fn rewrite(&self, _text: &str) -> Option<String> {
        None
    }
}

lazy_static! {
    static ref GUARANTEE_PATTERN: Regex =
        Regex::new(r"保[证障].{0,6}(收益|回报|盈利|本金)|稳赚不赔|稳赚|包赚|(无|零)风险|只赚不赔")
            .expect("valid guarantee pattern");
}

const MISLEADING_PHRASES: &[&str] = &["内幕消息", "操纵市场", "非法集资", "小道消息", "庄家消息"];

const PROHIBITED_REQUESTS: &[&str] = &[
    "内幕消息", "内幕交易", "操纵市场", "操纵股价", "老鼠仓", "洗钱", "非法集资", "绕过监管",
];

/// Absolute wording and its softened replacement
const ABSOLUTE_REPLACEMENTS: &[(&str, &str)] = &[
    ("一定会", "可能会"),
    ("必然", "或将"),
    ("绝对", "相对"),
    ("百分之百", "较大概率"),
    ("肯定", "预计"),
];

const RISK_WORDING: &[&str] = &["风险", "谨慎", "波动", "不代表"];

fn find_phrases(text: &str, phrases: &[&str], category: ViolationCategory, severity: RiskLevel) -> Vec<Violation> {
    phrases
        .iter()
        .filter_map(|phrase| {
            text.find(phrase).map(|position| Violation {
                category,
                severity,
                matched_text: phrase.to_string(),
                position: Some(char_offset(text, position)),
            })
        })
        .collect()
}

fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

/// Guaranteed-return phrasing. Always high severity.
pub struct GuaranteedReturnRule;

impl SafetyRule for GuaranteedReturnRule {
    fn name(&self) -> &'static str {
        "guaranteed_return"
    }

    fn severity(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn check(&self, text: &str) -> Vec<Violation> {
        GUARANTEE_PATTERN
            .find_iter(text)
            .map(|m| Violation {
                category: ViolationCategory::GuaranteedReturn,
                severity: self.severity(),
                matched_text: m.as_str().to_string(),
                position: Some(char_offset(text, m.start())),
            })
            .collect()
    }
}

/// Insider tips, manipulation and similar misleading claims
pub struct MisleadingContentRule;

impl SafetyRule for MisleadingContentRule {
    fn name(&self) -> &'static str {
        "misleading_content"
    }

    fn severity(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn check(&self, text: &str) -> Vec<Violation> {
        find_phrases(text, MISLEADING_PHRASES, ViolationCategory::Misleading, self.severity())
    }
}

/// Absolute predictions, softened by rewrite
pub struct AbsoluteStatementRule;

impl SafetyRule for AbsoluteStatementRule {
    fn name(&self) -> &'static str {
        "absolute_statement"
    }

    fn severity(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn check(&self, text: &str) -> Vec<Violation> {
        let phrases: Vec<&str> = ABSOLUTE_REPLACEMENTS.iter().map(|(from, _)| *from).collect();
        find_phrases(text, &phrases, ViolationCategory::AbsoluteStatement, self.severity())
    }

    fn rewrite(&self, text: &str) -> Option<String> {
        let mut out = text.to_string();
        for (from, to) in ABSOLUTE_REPLACEMENTS {
            out = out.replace(from, to);
        }
        (out != text).then_some(out)
    }
}

/// Advice that never mentions risk
pub struct MissingRiskWarningRule;

impl SafetyRule for MissingRiskWarningRule {
    fn name(&self) -> &'static str {
        "missing_risk_warning"
    }

    fn severity(&self) -> RiskLevel {
        RiskLevel::Low
    }

    fn applies_to(&self, content_type: ContentType) -> bool {
        matches!(content_type, ContentType::InvestmentAdvice | ContentType::StrategyRecommendation)
    }

    fn check(&self, text: &str) -> Vec<Violation> {
        if RISK_WORDING.iter().any(|w| text.contains(w)) {
            return Vec::new();
        }
        vec![Violation {
            category: ViolationCategory::MissingRiskWarning,
            severity: self.severity(),
            matched_text: String::new(),
            position: None,
        }]
    }
}

/// Requests the assistant must refuse outright. Applied to user input.
pub struct ProhibitedRequestRule;

impl SafetyRule for ProhibitedRequestRule {
    fn name(&self) -> &'static str {
        "prohibited_request"
    }

    fn severity(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn check(&self, text: &str) -> Vec<Violation> {
        find_phrases(text, PROHIBITED_REQUESTS, ViolationCategory::ProhibitedRequest, self.severity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarantee_variants() {
        let rule = GuaranteedReturnRule;
        assert_eq!(rule.check("本产品保证收益")[0].matched_text, "保证收益");
        assert!(!rule.check("保证每年都有收益").is_empty());
        assert!(!rule.check("无风险高收益").is_empty());
        assert!(rule.check("投资有风险").is_empty());
        assert_eq!(rule.check("本产品保证收益")[0].position, Some(3));
    }

    #[test]
    fn test_absolute_rewrite() {
        let rule = AbsoluteStatementRule;
        let rewritten = rule.rewrite("明年一定会上涨").unwrap();
        assert_eq!(rewritten, "明年可能会上涨");
        assert!(rule.check(&rewritten).is_empty());
        assert!(rule.rewrite("温和上涨").is_none());
    }

    #[test]
    fn test_missing_risk_warning_only_for_advice() {
        let rule = MissingRiskWarningRule;
        assert!(rule.applies_to(ContentType::InvestmentAdvice));
        assert!(!rule.applies_to(ContentType::General));
        assert_eq!(rule.check("建议配置沪深300").len(), 1);
        assert!(rule.check("注意控制风险").is_empty());
    }
}
