//! Safety reviewer
//!
//! Two phases: user input is screened before any tool runs, generated
//! output is screened before it is returned. High severity blocks,
//! medium is rewritten and re-checked once, and advice-like content
//! always carries a risk disclaimer.

pub mod rules;

pub use rules::SafetyRule;

use crate::audit::compute_hash;
use crate::models::{ContentType, RiskLevel, SafetyReview, Violation};
use chrono::Utc;
use rules::{
    AbsoluteStatementRule, GuaranteedReturnRule, MisleadingContentRule, MissingRiskWarningRule,
    ProhibitedRequestRule,
};
use tracing::{info, warn};

pub const BLOCKED_INPUT_RESPONSE: &str =
    "抱歉，您的请求涉及违规内容，我无法提供相关帮助。我们可以继续讨论合规的ETF配置方案。";

pub const BLOCKED_OUTPUT_RESPONSE: &str =
    "抱歉，生成的内容未通过合规审核，已被拦截。任何投资都无法确保收益，请理性看待市场波动。";

pub fn disclaimer(content_type: ContentType) -> Option<&'static str> {
    match content_type {
        ContentType::InvestmentAdvice => {
            Some("风险提示：以上内容仅供参考，不构成投资建议。投资有风险，入市需谨慎。")
        }
        ContentType::StrategyRecommendation => Some(
            "风险提示：策略基于历史数据和模型估算生成，过往表现不代表未来，请结合自身风险承受能力审慎决策。",
        ),
        ContentType::MarketAnalysis => {
            Some("风险提示：市场分析基于公开信息整理，可能存在偏差，仅供参考。")
        }
        ContentType::BacktestResults => Some(
            "风险提示：回测结果基于历史数据模拟，未完全计入交易成本与市场冲击，不代表未来表现。",
        ),
        ContentType::General => None,
    }
}

/// Rule-based reviewer for inbound and outbound text
pub struct SafetyReviewer {
    input_rules: Vec<Box<dyn SafetyRule>>,
    output_rules: Vec<Box<dyn SafetyRule>>,
}

impl SafetyReviewer {
    pub fn new() -> Self {
        Self {
            input_rules: Vec::new(),
            output_rules: Vec::new(),
        }
    }

    pub fn add_input_rule(&mut self, rule: Box<dyn SafetyRule>) {
        self.input_rules.push(rule);
    }

    pub fn add_output_rule(&mut self, rule: Box<dyn SafetyRule>) {
        self.output_rules.push(rule);
    }

    /// Screen a user message. A blocked input carries the refusal text.
    pub fn check_input(&self, text: &str) -> SafetyReview {
        let violations = scan(&self.input_rules, text, ContentType::General);
        let risk_level = max_severity(&violations);
        let blocked = risk_level == RiskLevel::High;

        let review = SafetyReview {
            content_hash: compute_hash(text),
            content_type: ContentType::General,
            safe: !blocked,
            blocked,
            rewritten: false,
            processed_content: if blocked {
                BLOCKED_INPUT_RESPONSE.to_string()
            } else {
                text.to_string()
            },
            violations,
            risk_level,
            reviewed_at: Utc::now(),
        };
        log_review("input", &review);
        review
    }

    /// Screen generated text and produce the content to show the user.
    pub fn check_output(&self, text: &str, content_type: ContentType) -> SafetyReview {
        let violations = scan(&self.output_rules, text, content_type);
        let risk_level = max_severity(&violations);

        let (body, blocked, rewritten) = match risk_level {
            RiskLevel::High => (BLOCKED_OUTPUT_RESPONSE.to_string(), true, false),
            RiskLevel::Medium => match self.rewrite(text, content_type) {
                Some(softened) => (softened, false, true),
                None => {
                    warn!("Rewrite did not clear medium violations, blocking");
                    (BLOCKED_OUTPUT_RESPONSE.to_string(), true, false)
                }
            },
            RiskLevel::Low => (text.to_string(), false, false),
        };

        let processed_content = match disclaimer(content_type) {
            Some(notice) => format!("{}\n\n{}", body, notice),
            None => body,
        };

        let review = SafetyReview {
            content_hash: compute_hash(text),
            content_type,
            violations,
            risk_level,
            processed_content,
            safe: !blocked,
            blocked,
            rewritten,
            reviewed_at: Utc::now(),
        };
        log_review("output", &review);
        review
    }

    /// Apply every rule's rewrite, then re-check once.
    /// Returns the softened text only when it is left with low findings.
    fn rewrite(&self, text: &str, content_type: ContentType) -> Option<String> {
        let softened = self
            .output_rules
            .iter()
            .filter(|rule| rule.applies_to(content_type))
            .fold(text.to_string(), |acc, rule| rule.rewrite(&acc).unwrap_or(acc));

        let recheck = scan(&self.output_rules, &softened, content_type);
        (max_severity(&recheck) == RiskLevel::Low).then_some(softened)
    }
}

impl Default for SafetyReviewer {
    fn default() -> Self {
        create_default_safety_reviewer()
    }
}

fn scan(rules: &[Box<dyn SafetyRule>], text: &str, content_type: ContentType) -> Vec<Violation> {
    rules
        .iter()
        .filter(|rule| rule.applies_to(content_type))
        .flat_map(|rule| rule.check(text))
        .collect()
}

fn max_severity(violations: &[Violation]) -> RiskLevel {
    violations
        .iter()
        .map(|v| v.severity)
        .max()
        .unwrap_or(RiskLevel::Low)
}

fn log_review(phase: &str, review: &SafetyReview) {
    info!(
        phase = phase,
        content_hash = %review.content_hash,
        risk_level = ?review.risk_level,
        violations = review.violations.len(),
        blocked = review.blocked,
        rewritten = review.rewritten,
        "Safety review completed"
    );
}

/// Reviewer with the standard compliance rule set
pub fn create_default_safety_reviewer() -> SafetyReviewer {
    let mut reviewer = SafetyReviewer::new();
    reviewer.add_input_rule(Box::new(ProhibitedRequestRule));
    reviewer.add_output_rule(Box::new(GuaranteedReturnRule));
    reviewer.add_output_rule(Box::new(MisleadingContentRule));
    reviewer.add_output_rule(Box::new(AbsoluteStatementRule));
    reviewer.add_output_rule(Box::new(MissingRiskWarningRule));
    reviewer
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViolationCategory;

    #[test]
    fn test_guarantee_is_always_high() {
        let reviewer = create_default_safety_reviewer();
        for text in [
            "保证收益",
            "这只基金风险适中，历史稳健，保证收益，仅供参考",
            "市场有风险，但本策略保证收益",
        ] {
            let review = reviewer.check_output(text, ContentType::General);
            assert_eq!(review.risk_level, RiskLevel::High, "{}", text);
            assert!(review.blocked);
        }
    }

    #[test]
    fn test_no_risk_high_return_advice_is_blocked() {
        let reviewer = create_default_safety_reviewer();
        let review = reviewer.check_output(
            "近期新闻显示该板块无风险高收益，建议重仓。",
            ContentType::InvestmentAdvice,
        );

        assert_eq!(review.risk_level, RiskLevel::High);
        assert!(review.blocked);
        assert!(!review.safe);
        assert!(review.processed_content.starts_with(BLOCKED_OUTPUT_RESPONSE));
        assert!(review.processed_content.contains("入市需谨慎"));
        assert!(review
            .violations
            .iter()
            .any(|v| v.category == ViolationCategory::GuaranteedReturn));
    }

    #[test]
    fn test_absolute_statement_is_rewritten() {
        let reviewer = create_default_safety_reviewer();
        let review = reviewer.check_output("该指数明年一定会上涨，注意波动风险。", ContentType::MarketAnalysis);

        assert_eq!(review.risk_level, RiskLevel::Medium);
        assert!(review.rewritten);
        assert!(!review.blocked);
        assert!(review.processed_content.contains("可能会上涨"));
        assert!(!review.processed_content.contains("一定会"));
    }

    #[test]
    fn test_advice_always_gets_disclaimer() {
        let reviewer = create_default_safety_reviewer();
        let review = reviewer.check_output("建议关注宽基指数ETF。", ContentType::InvestmentAdvice);

        assert!(review.safe);
        assert_eq!(review.risk_level, RiskLevel::Low);
        assert_eq!(review.violations.len(), 1);
        assert!(review.processed_content.ends_with(disclaimer(ContentType::InvestmentAdvice).unwrap()));
    }

    #[test]
    fn test_disclaimers_pass_review() {
        let reviewer = create_default_safety_reviewer();
        for ct in [
            ContentType::InvestmentAdvice,
            ContentType::StrategyRecommendation,
            ContentType::MarketAnalysis,
            ContentType::BacktestResults,
        ] {
            let review = reviewer.check_output(disclaimer(ct).unwrap(), ct);
            assert!(review.violations.is_empty(), "{:?}", ct);
        }
        assert!(reviewer.check_output(BLOCKED_OUTPUT_RESPONSE, ContentType::General).violations.is_empty());
    }

    #[test]
    fn test_input_screen() {
        let reviewer = create_default_safety_reviewer();
        let blocked = reviewer.check_input("有没有内幕消息可以透露");
        assert!(blocked.blocked);
        assert_eq!(blocked.processed_content, BLOCKED_INPUT_RESPONSE);

        let fine = reviewer.check_input("我想要保证收益的产品");
        assert!(fine.safe);
    }
}
