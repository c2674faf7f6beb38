//! Turn Intent Classifier
//!
//! Maps a user message to a typed `TurnIntent`. The business-flow state
//! machine only ever sees the typed intent, never the raw keywords.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnIntent {
    /// Regress one stage
    StartOver,
    /// Accept the current strategy
    Save,
    /// Adjust the current strategy
    Feedback,
    Exit,
    /// Ask for a strategy now
    Generate,
    /// Anything else: answers, preferences, small talk
    Inform,
}

/// Static keyword lists
const START_OVER_KEYWORDS: &[&str] = &[
    "重新开始", "重来", "从头", "重新填写", "推倒重来", "返回上一步", "start over",
];

const SAVE_KEYWORDS: &[&str] = &[
    "保存", "就这个", "就用这个", "确认策略", "采纳", "满意", "save",
];

const FEEDBACK_KEYWORDS: &[&str] = &[
    // Directional adjustments
    "降低", "减少", "提高", "增加", "少一点", "多一点", "减仓", "加仓",
    // Judgements on the current strategy
    "太高", "太低", "太多", "太少", "不满意",
    // Explicit change requests
    "调整", "优化", "修改", "换成", "reduce", "increase", "lower", "raise",
];

const EXIT_KEYWORDS: &[&str] = &["退出", "结束", "再见", "拜拜", "不用了", "exit", "bye"];

const GENERATE_KEYWORDS: &[&str] = &[
    "生成", "推荐", "出个策略", "制定", "给我方案", "开始吧", "配置方案", "generate",
];

/// Turn intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify one message. Priority when several lists match:
    /// start-over, save, feedback, exit, generate.
    pub fn classify(message: &str) -> TurnIntent {
        let text = message.to_lowercase();

        if contains_any(&text, START_OVER_KEYWORDS) {
            TurnIntent::StartOver
        } else if contains_any(&text, SAVE_KEYWORDS) && !text.contains("不满意") {
            TurnIntent::Save
        } else if contains_any(&text, FEEDBACK_KEYWORDS) {
            TurnIntent::Feedback
        } else if contains_any(&text, EXIT_KEYWORDS) {
            TurnIntent::Exit
        } else if contains_any(&text, GENERATE_KEYWORDS) {
            TurnIntent::Generate
        } else {
            TurnIntent::Inform
        }
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}
