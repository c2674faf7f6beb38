//! Business-flow state machine
//!
//! Stage changes are driven by the typed turn intent and by guard
//! predicates over the collected elements. Forward moves must satisfy
//! their guard; a start-over request regresses exactly one stage.

use crate::classifier::TurnIntent;
use crate::config::OrchestratorConfig;
use crate::error::EngineError;
use crate::models::{BusinessStage, ElementField, ExtractedElements, StageProgress};
use crate::Result;

/// Facts about the session the guards are evaluated against
#[derive(Debug, Clone, Copy)]
pub struct FlowGuards<'a> {
    pub intent: TurnIntent,
    pub elements: &'a ExtractedElements,
    pub has_strategy: bool,
    pub has_prior_strategies: bool,
    pub first_turn: bool,
    pub elements_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BusinessStage,
    pub to: BusinessStage,
    pub regressed: bool,
}

/// Stages reachable from `stage` in one move
pub fn valid_transitions(stage: BusinessStage) -> &'static [BusinessStage] {
    use BusinessStage::*;
    match stage {
        Intro => &[ElementCollection, ReturningUser],
        ElementCollection => &[StrategyGeneration, Intro],
        StrategyGeneration => &[ReviewFeedback, ElementCollection],
        ReviewFeedback => &[StrategyGeneration, SaveOrExit, ElementCollection],
        SaveOrExit => &[ReviewFeedback, StrategyGeneration],
        ReturningUser => &[ReviewFeedback, Intro],
    }
}

pub fn can_transition(from: BusinessStage, to: BusinessStage) -> bool {
    from == to || valid_transitions(from).contains(&to)
}

/// One stage back. Review regresses to collection because generation is
/// not a resting stage.
pub fn regress(stage: BusinessStage) -> BusinessStage {
    use BusinessStage::*;
    match stage {
        Intro => Intro,
        ElementCollection => Intro,
        StrategyGeneration | ReviewFeedback => ElementCollection,
        SaveOrExit => ReviewFeedback,
        ReturningUser => Intro,
    }
}

/// Resolve the stage this turn works in.
///
/// Advances forward while guards allow, up to `max_stage_hops` moves, and
/// stops at stages that need a plan to run before they can be left.
pub fn advance(current: BusinessStage, guards: &FlowGuards<'_>, config: &OrchestratorConfig) -> Result<Transition> {
    if guards.intent == TurnIntent::StartOver {
        return checked(current, regress(current), true);
    }

    let mut stage = current;
    for _ in 0..config.max_stage_hops {
        let next = step_forward(stage, guards, config.element_confidence_gate);
        if next == stage {
            break;
        }
        if !can_transition(stage, next) {
            return Err(EngineError::StateTransition(format!("{:?} -> {:?}", stage, next)));
        }
        stage = next;
        if matches!(stage, BusinessStage::StrategyGeneration | BusinessStage::ReturningUser) {
            break;
        }
    }

    checked(current, stage, false)
}

fn checked(from: BusinessStage, to: BusinessStage, regressed: bool) -> Result<Transition> {
    if regressed && !(from == to || valid_transitions(from).contains(&to)) {
        return Err(EngineError::StateTransition(format!("cannot regress {:?} -> {:?}", from, to)));
    }
    Ok(Transition { from, to, regressed })
}

fn step_forward(stage: BusinessStage, g: &FlowGuards<'_>, gate: f64) -> BusinessStage {
    use BusinessStage::*;
    let ready = g.elements.missing_required(gate).is_empty();

    match stage {
        Intro if g.first_turn && g.has_prior_strategies => ReturningUser,
        Intro => ElementCollection,
        // a generate request without the gating elements is just another collection turn
        ElementCollection if ready => StrategyGeneration,
        ElementCollection => ElementCollection,
        ReviewFeedback => match g.intent {
            TurnIntent::Save | TurnIntent::Exit => SaveOrExit,
            TurnIntent::Generate if ready => StrategyGeneration,
            TurnIntent::Inform if g.elements_changed && ready => StrategyGeneration,
            _ => ReviewFeedback,
        },
        SaveOrExit => match g.intent {
            TurnIntent::Feedback if g.has_strategy => ReviewFeedback,
            TurnIntent::Generate if ready => StrategyGeneration,
            _ => SaveOrExit,
        },
        StrategyGeneration | ReturningUser => stage,
    }
}

/// Stage after the turn's plan ran. `halted_with` is the error that
/// stopped the plan, if any.
pub fn settle(stage: BusinessStage, has_strategy: bool, halted_with: Option<&EngineError>) -> BusinessStage {
    use BusinessStage::*;
    match (stage, halted_with) {
        (StrategyGeneration, None) if has_strategy => ReviewFeedback,
        (StrategyGeneration, Some(EngineError::NoEligibleAssets(_))) => ElementCollection,
        (ReturningUser, None) if has_strategy => ReviewFeedback,
        (ReturningUser, None) => ElementCollection,
        _ => stage,
    }
}

pub fn progress(stage: BusinessStage, elements: &ExtractedElements, gate: f64) -> StageProgress {
    use BusinessStage::*;
    let missing = elements.missing_required(gate);
    let missing_elements: Vec<String> = missing.iter().map(|f| f.label().to_string()).collect();

    let (completion_pct, description, next_actions): (u8, &str, Vec<&str>) = match stage {
        Intro => (0, "了解您的投资需求", vec!["告诉我您的风险偏好", "告诉我您想配置的资产类别"]),
        ElementCollection => {
            let collected = 2 - missing.len().min(2);
            let mut actions = Vec::new();
            if missing.contains(&ElementField::RiskTolerance) {
                actions.push("说明风险偏好：保守、稳健、积极或激进");
            }
            if missing.contains(&ElementField::PreferredAssetClasses) {
                actions.push("说明偏好的资产类别，例如股票、债券、黄金");
            }
            if actions.is_empty() {
                actions.push("可以让我生成策略了");
            }
            (20 + 20 * collected as u8, "收集投资要素", actions)
        }
        StrategyGeneration => (70, "生成并回测策略", vec!["等待策略生成"]),
        ReturningUser => (80, "恢复历史策略", vec!["查看上次的策略", "提出调整意见"]),
        ReviewFeedback => (85, "评审与优化策略", vec!["提出调整意见", "满意可以保存策略"]),
        SaveOrExit => (100, "保存或结束", vec!["如需继续调整可以直接告诉我"]),
    };

    StageProgress {
        stage,
        description: description.to_string(),
        completion_pct,
        missing_elements,
        next_actions: next_actions.into_iter().map(String::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::extract_elements;

    fn elements(message: &str) -> ExtractedElements {
        let mut e = ExtractedElements::new();
        e.merge_all(extract_elements(message, 1));
        e
    }

    fn guards(intent: TurnIntent, elements: &ExtractedElements) -> FlowGuards<'_> {
        FlowGuards {
            intent,
            elements,
            has_strategy: false,
            has_prior_strategies: false,
            first_turn: false,
            elements_changed: false,
        }
    }

    #[test]
    fn test_full_profile_reaches_generation_in_one_turn() {
        let e = elements("我的风险偏好是稳健，偏好股票和债券");
        let t = advance(BusinessStage::Intro, &guards(TurnIntent::Inform, &e), &OrchestratorConfig::default()).unwrap();
        assert_eq!(t.to, BusinessStage::StrategyGeneration);
    }

    #[test]
    fn test_generate_without_elements_stays_in_collection() {
        let e = elements("我偏好债券");
        let t = advance(
            BusinessStage::ElementCollection,
            &guards(TurnIntent::Generate, &e),
            &OrchestratorConfig::default(),
        )
        .unwrap();
        assert_eq!(t.to, BusinessStage::ElementCollection);
    }

    #[test]
    fn test_returning_user_branch() {
        let e = ExtractedElements::new();
        let mut g = guards(TurnIntent::Inform, &e);
        g.first_turn = true;
        g.has_prior_strategies = true;

        let t = advance(BusinessStage::Intro, &g, &OrchestratorConfig::default()).unwrap();
        assert_eq!(t.to, BusinessStage::ReturningUser);
        assert_eq!(settle(t.to, true, None), BusinessStage::ReviewFeedback);
    }

    #[test]
    fn test_start_over_regresses_one_stage() {
        let e = ExtractedElements::new();
        let g = guards(TurnIntent::StartOver, &e);
        let config = OrchestratorConfig::default();

        assert_eq!(advance(BusinessStage::ReviewFeedback, &g, &config).unwrap().to, BusinessStage::ElementCollection);
        assert_eq!(advance(BusinessStage::SaveOrExit, &g, &config).unwrap().to, BusinessStage::ReviewFeedback);
        assert_eq!(advance(BusinessStage::ElementCollection, &g, &config).unwrap().to, BusinessStage::Intro);
        assert!(advance(BusinessStage::ReviewFeedback, &g, &config).unwrap().regressed);
    }

    #[test]
    fn test_review_feedback_loops() {
        let e = elements("我的风险偏好是稳健，偏好股票和债券");
        let config = OrchestratorConfig::default();

        let t = advance(BusinessStage::ReviewFeedback, &guards(TurnIntent::Feedback, &e), &config).unwrap();
        assert_eq!(t.to, BusinessStage::ReviewFeedback);

        let t = advance(BusinessStage::ReviewFeedback, &guards(TurnIntent::Save, &e), &config).unwrap();
        assert_eq!(t.to, BusinessStage::SaveOrExit);
    }

    #[test]
    fn test_settle_after_generation() {
        let failed = EngineError::NoEligibleAssets("none".into());
        assert_eq!(settle(BusinessStage::StrategyGeneration, true, None), BusinessStage::ReviewFeedback);
        assert_eq!(
            settle(BusinessStage::StrategyGeneration, false, Some(&failed)),
            BusinessStage::ElementCollection
        );
    }

    #[test]
    fn test_progress_counts_collected_elements() {
        let none = ExtractedElements::new();
        let half = elements("我是稳健型投资者");
        let all = elements("我的风险偏好是稳健，偏好股票和债券");

        assert_eq!(progress(BusinessStage::ElementCollection, &none, 0.6).completion_pct, 20);
        assert_eq!(progress(BusinessStage::ElementCollection, &half, 0.6).completion_pct, 40);
        assert_eq!(progress(BusinessStage::ElementCollection, &all, 0.6).completion_pct, 60);
        assert!(progress(BusinessStage::ElementCollection, &all, 0.6).missing_elements.is_empty());
    }

    #[test]
    fn test_every_regression_is_a_valid_transition() {
        use BusinessStage::*;
        for stage in [Intro, ElementCollection, StrategyGeneration, ReviewFeedback, SaveOrExit, ReturningUser] {
            assert!(can_transition(stage, regress(stage)), "{:?}", stage);
        }
    }
}
