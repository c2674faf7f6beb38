//! Reply composition
//!
//! Turns the turn context into the text shown to the user. Everything
//! composed here still goes through the safety reviewer.

use crate::classifier::TurnIntent;
use crate::derivation::{assess_market_valuation, MarketImpact};
use crate::derivation::valuation::ValuationLevel;
use crate::error::EngineError;
use crate::execution::TurnContext;
use crate::models::{BacktestResult, BusinessStage, ContentType, ElementField, Strategy, StrategyStatus};
use crate::safety::BLOCKED_INPUT_RESPONSE;
use std::fmt::Write;

pub const GENERIC_FAILURE_REPLY: &str = "抱歉，处理您的请求时遇到了问题，请稍后再试。";

const FEEDBACK_EXAMPLES: &str = "例如：“降低股票比例”、“多配一些债券”或“风险再低一些”。";

pub fn compose_reply(ctx: &TurnContext) -> (String, ContentType) {
    let mut content_type = ContentType::General;
    let mut text = match ctx.stage {
        BusinessStage::Intro => intro(ctx),
        BusinessStage::ElementCollection => collection(ctx),
        BusinessStage::StrategyGeneration => match &ctx.strategy {
            Some(strategy) => {
                content_type = ContentType::StrategyRecommendation;
                generated(ctx, strategy)
            }
            None => "暂时没能生成策略，请稍后再试或补充您的投资要素。".to_string(),
        },
        BusinessStage::ReviewFeedback => match &ctx.strategy {
            Some(strategy) => {
                content_type = ContentType::StrategyRecommendation;
                review(ctx, strategy)
            }
            None => collection(ctx),
        },
        BusinessStage::ReturningUser => match &ctx.strategy {
            Some(strategy) => {
                content_type = ContentType::StrategyRecommendation;
                format!(
                    "欢迎回来！这是您上次的策略（版本 {}）：\n\n{}{}\n可以继续提出调整意见，或者说“生成”按当前要素重新配置。",
                    strategy.version,
                    allocation_table(strategy, ctx.elements.amount()),
                    backtest_section(strategy)
                )
            }
            None => intro(ctx),
        },
        BusinessStage::SaveOrExit => save_or_exit(ctx),
    };

    if ctx.nudge {
        text.push_str(
            "\n\n我们已经连续调整了多次。如果当前方案大体符合预期，可以说“保存”；\
             也可以重新说明风险偏好或偏好资产，我会按新的要素重新生成。",
        );
    }

    (text, content_type)
}

/// User-visible text for a turn that stopped on an error. Raw error
/// content is never included.
pub fn failure_reply(error: &EngineError) -> String {
    match error {
        EngineError::NoEligibleAssets(_) => {
            "按您当前的偏好和排除条件，没有找到可以配置的ETF。可以放宽排除条件，或者补充其他资产类别。".to_string()
        }
        EngineError::StateTransition(_) => {
            "当前策略的状态不允许这个操作。您可以先查看策略，或者说“生成”重新配置。".to_string()
        }
        EngineError::SafetyBlocked(_) => BLOCKED_INPUT_RESPONSE.to_string(),
        EngineError::Cancelled(_) => "上一条消息的处理已被您的新消息取代。".to_string(),
        _ => GENERIC_FAILURE_REPLY.to_string(),
    }
}

fn intro(_ctx: &TurnContext) -> String {
    "您好！我是ETF配置助手。请告诉我您的风险偏好（保守、稳健、积极或激进）、想配置的资产类别，以及大致的投资金额和期限。"
        .to_string()
}

fn collection(ctx: &TurnContext) -> String {
    let mut text = String::new();
    if ctx.intent == TurnIntent::StartOver {
        text.push_str("好的，我们重新开始。");
    }

    if !ctx.extracted.is_empty() {
        let noted: Vec<String> = ctx
            .extracted
            .iter()
            .filter(|e| ctx.elements.get(e.field).map(|kept| kept.value == e.value).unwrap_or(false))
            .map(|e| format!("{}：{}", e.field.label(), e.value))
            .collect();
        if !noted.is_empty() {
            let _ = write!(text, "已记录 {}。", noted.join("，"));
        }
    }

    let missing = ctx.elements.missing_required(ctx.confidence_gate);
    if missing.is_empty() {
        text.push_str("要素已经齐全，可以说“生成”让我为您配置策略。");
        return text;
    }

    let asks: Vec<&str> = missing
        .iter()
        .map(|field| match field {
            ElementField::RiskTolerance => "您的风险偏好（保守、稳健、积极或激进）",
            ElementField::PreferredAssetClasses => "想配置的资产类别（如股票、债券、黄金，或科技、消费等行业）",
            _ => field.label(),
        })
        .collect();
    let _ = write!(text, "还需要了解{}。", asks.join("，以及"));
    text
}

fn generated(ctx: &TurnContext, strategy: &Strategy) -> String {
    let mut text = format!(
        "根据您的{}风险偏好，为您生成了以下ETF配置（版本 {}）：\n\n{}",
        strategy.risk_level.label(),
        strategy.version,
        allocation_table(strategy, ctx.elements.amount())
    );

    let estimate = &strategy.performance_estimate;
    let _ = write!(
        text,
        "\n预估年化收益约 {}，预估波动率约 {}。\n",
        pct(estimate.expected_return),
        pct(estimate.expected_volatility)
    );

    text.push_str(&backtest_section(strategy));

    for note in &strategy.generation_context.notes {
        let _ = write!(text, "\n说明：{}", note);
    }

    let observations = market_observations(ctx);
    if !observations.is_empty() {
        text.push_str("\n\n市场观察：");
        for line in observations {
            let _ = write!(text, "\n- {}", line);
        }
    }

    let _ = write!(text, "\n\n如需调整，可以直接告诉我，{}", FEEDBACK_EXAMPLES);
    text
}

fn review(ctx: &TurnContext, strategy: &Strategy) -> String {
    if ctx.strategy_updated {
        let mut text = format!("已根据您的反馈调整策略（版本 {}）：\n", strategy.version);
        for change in &strategy.generation_context.changes {
            let _ = write!(text, "\n- {}", change);
        }
        let _ = write!(
            text,
            "\n\n{}{}",
            allocation_table(strategy, ctx.elements.amount()),
            backtest_section(strategy)
        );
        return text;
    }

    match ctx.intent {
        TurnIntent::Feedback if strategy.status == StrategyStatus::Generated => {
            "当前策略还没有完成回测，暂时无法调整。历史行情恢复后可以再提调整意见，也可以说“生成”重新配置一次。".to_string()
        }
        TurnIntent::Feedback => format!("我没有完全理解需要调整的方向，{}", FEEDBACK_EXAMPLES),
        _ => format!(
            "当前策略（版本 {}）：\n\n{}{}\n满意的话可以说“保存”，也可以继续提出调整意见。",
            strategy.version,
            allocation_table(strategy, ctx.elements.amount()),
            backtest_section(strategy)
        ),
    }
}

fn save_or_exit(ctx: &TurnContext) -> String {
    match (ctx.intent, &ctx.strategy) {
        (TurnIntent::Save, Some(strategy)) if strategy.status == StrategyStatus::Saved => format!(
            "策略（版本 {}）已保存。之后回来时可以在此基础上继续调整。",
            strategy.version
        ),
        (TurnIntent::Save, Some(_)) if ctx.save_requested => {
            "当前策略还没有完成回测，暂时无法保存。行情数据恢复后可以再说“保存”，也可以继续提出调整意见。".to_string()
        }
        (TurnIntent::Save, _) => "当前还没有可以保存的策略。".to_string(),
        (TurnIntent::Exit, _) => "好的，本次对话到此结束。欢迎随时回来继续。".to_string(),
        _ => "当前策略已保存。如需调整，直接告诉我您的想法，我会基于它创建新版本。".to_string(),
    }
}

fn market_observations(ctx: &TurnContext) -> Vec<String> {
    let mut lines = Vec::new();

    if !ctx.enriched.is_empty() {
        let valuation = assess_market_valuation(&ctx.enriched);
        if valuation.level != ValuationLevel::Unknown {
            lines.push(valuation.analysis);
        }
    }

    if let Some(report) = &ctx.sectors {
        lines.push(report.rotation_suggestion.clone());
    }

    let held = ctx.strategy.as_ref().map(|s| s.codes()).unwrap_or_default();
    for analysis in &ctx.news_analyses {
        if analysis.market_impact == MarketImpact::Neutral {
            continue;
        }
        if analysis.related_etfs.iter().any(|code| held.contains(code)) {
            lines.push(analysis.implications.clone());
        }
    }

    if !ctx.degraded.is_empty() {
        lines.push("部分市场数据暂时不可用，以上分析基于可获得的数据。".to_string());
    }

    lines
}

pub fn allocation_table(strategy: &Strategy, amount: Option<f64>) -> String {
    let mut table = match amount {
        Some(_) => String::from("| 代码 | 名称 | 类别 | 权重 | 金额 |\n|---|---|---|---|---|\n"),
        None => String::from("| 代码 | 名称 | 类别 | 权重 |\n|---|---|---|---|\n"),
    };
    for a in &strategy.allocations {
        let _ = write!(table, "| {} | {} | {} | {} |", a.etf_code, a.etf_name, a.asset_class, pct(a.weight));
        if let Some(total) = amount {
            let _ = write!(table, " {:.0}元 |", total * a.weight);
        }
        table.push('\n');
    }
    table
}

fn backtest_section(strategy: &Strategy) -> String {
    match &strategy.backtest_result {
        Some(result) => format!("\n{}", backtest_table(result)),
        None => "\n暂无回测结果（历史行情不足）。\n".to_string(),
    }
}

pub fn backtest_table(result: &BacktestResult) -> String {
    let s = &result.summary;
    let sharpe = s.sharpe_ratio.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string());
    let mut table = format!(
        "回测区间 {} 至 {}（{} 个交易日），历史表现不代表未来收益：\n\n\
         | 年化收益 | 波动率 | 最大回撤 | 夏普比率 | 胜率 |\n|---|---|---|---|---|\n\
         | {} | {} | {} | {} | {} |\n",
        result.period.start,
        result.period.end,
        s.trading_days,
        pct(s.annualized_return),
        pct(s.volatility),
        pct(s.max_drawdown),
        sharpe,
        pct(s.win_rate)
    );
    if !result.excluded.is_empty() {
        let _ = write!(table, "\n{} 缺少历史行情，未计入回测。\n", result.excluded.join("、"));
    }
    table
}

fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
