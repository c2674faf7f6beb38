//! Planner trait and implementations
//!
//! The planner turns the resolved stage into an ordered list of tool
//! calls. Steps are declared with named dependencies and then sorted so
//! that every step follows its dependencies, ties broken by the
//! pipeline order of the tool's capability.

use crate::classifier::TurnIntent;
use crate::error::EngineError;
use crate::execution::TurnContext;
use crate::models::{BusinessStage, Plan, PlanStep, StrategyStatus};
use crate::strategy::parse_directives;
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan run on every turn before the stage is resolved
    async fn intake_plan(&self, ctx: &TurnContext) -> Result<Plan>;

    /// Plan for the stage the turn resolved to
    async fn create_plan(&self, ctx: &TurnContext) -> Result<Plan>;
}

/// A step before ordering. Dependencies name other steps by key, which is
/// the tool name unless the same tool runs twice in one plan.
#[derive(Debug, Clone)]
struct StepSpec {
    key: &'static str,
    tool_name: &'static str,
    depends_on: Vec<&'static str>,
    optional: bool,
    description: &'static str,
}

fn spec(tool_name: &'static str, depends_on: &[&'static str], description: &'static str) -> StepSpec {
    keyed(tool_name, tool_name, depends_on, description)
}

fn keyed(
    key: &'static str,
    tool_name: &'static str,
    depends_on: &[&'static str],
    description: &'static str,
) -> StepSpec {
    StepSpec {
        key,
        tool_name,
        depends_on: depends_on.to_vec(),
        optional: false,
        description,
    }
}

fn optional(tool_name: &'static str, depends_on: &[&'static str], description: &'static str) -> StepSpec {
    StepSpec {
        optional: true,
        ..spec(tool_name, depends_on, description)
    }
}

/// Fixed per-stage plans over the registered tools
pub struct StagePlanner {
    registry: Arc<ToolRegistry>,
}

impl StagePlanner {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    fn specs_for(&self, ctx: &TurnContext) -> Vec<StepSpec> {
        match ctx.stage {
            BusinessStage::StrategyGeneration => vec![
                spec("fetch_etf_universe", &[], "获取ETF列表"),
                spec("fetch_price_history", &["fetch_etf_universe"], "获取历史行情"),
                optional("fetch_news", &[], "获取相关资讯"),
                spec("enrich_etfs", &["fetch_etf_universe", "fetch_price_history"], "补全ETF分类与估值"),
                optional("score_news", &["fetch_news", "fetch_etf_universe"], "分析资讯相关性"),
                optional("build_sectors", &["enrich_etfs"], "构建虚拟板块"),
                spec("generate_strategy", &["enrich_etfs"], "生成配置策略"),
                spec("backtest_strategy", &["generate_strategy", "fetch_price_history"], "回测策略"),
                spec("safety_check", &[], "合规审核"),
            ],
            BusinessStage::ReviewFeedback | BusinessStage::SaveOrExit => {
                let pending = awaits_backtest(ctx);
                let optimize = ctx.stage == BusinessStage::ReviewFeedback && wants_optimization(ctx);
                let mut specs = Vec::new();
                if pending || optimize {
                    specs.push(spec("fetch_price_history", &[], "获取历史行情"));
                }
                if pending {
                    specs.push(keyed("pending_backtest", "backtest_strategy", &["fetch_price_history"], "补做回测"));
                }
                if optimize {
                    let after: &[&'static str] = if pending { &["pending_backtest"] } else { &[] };
                    specs.push(spec("optimize_strategy", after, "根据反馈调整策略"));
                    specs.push(spec(
                        "backtest_strategy",
                        &["optimize_strategy", "fetch_price_history"],
                        "回测调整后的策略",
                    ));
                }
                specs.push(spec("safety_check", &[], "合规审核"));
                specs
            }
            _ => vec![spec("safety_check", &[], "合规审核")],
        }
    }

    fn build(&self, ctx: &TurnContext, stage: BusinessStage, specs: Vec<StepSpec>) -> Result<Plan> {
        let steps = order_steps(&self.registry, specs)?;
        debug!(
            session_id = %ctx.session_id,
            stage = ?stage,
            tools = ?steps.iter().map(|s| s.tool_name.as_str()).collect::<Vec<_>>(),
            "Plan created"
        );
        Ok(Plan {
            plan_id: Uuid::new_v4(),
            session_id: ctx.session_id,
            stage,
            steps,
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Planner for StagePlanner {
    async fn intake_plan(&self, ctx: &TurnContext) -> Result<Plan> {
        self.build(ctx, ctx.stage, vec![spec("extract_elements", &[], "提取投资要素")])
    }

    async fn create_plan(&self, ctx: &TurnContext) -> Result<Plan> {
        self.build(ctx, ctx.stage, self.specs_for(ctx))
    }
}

/// Optimization needs feedback it can act on and a current strategy. One
/// that was never backtested gets its backtest earlier in the same plan.
fn wants_optimization(ctx: &TurnContext) -> bool {
    ctx.intent == TurnIntent::Feedback && ctx.strategy.is_some() && !parse_directives(&ctx.message).is_empty()
}

/// A strategy committed before its backtest succeeded
fn awaits_backtest(ctx: &TurnContext) -> bool {
    ctx.strategy
        .as_ref()
        .map(|s| matches!(s.status, StrategyStatus::Generated | StrategyStatus::Optimizing))
        .unwrap_or(false)
}

/// Kahn's algorithm. Among ready steps the lowest capability rank goes
/// first, then declaration order.
fn order_steps(registry: &ToolRegistry, specs: Vec<StepSpec>) -> Result<Vec<PlanStep>> {
    let index: HashMap<&str, usize> = specs.iter().enumerate().map(|(i, s)| (s.key, i)).collect();
    if index.len() != specs.len() {
        return Err(EngineError::Orchestration("duplicate step in plan".into()));
    }

    let mut capabilities = Vec::with_capacity(specs.len());
    for s in &specs {
        let tool = registry
            .get(s.tool_name)
            .ok_or_else(|| EngineError::ToolNotFound(s.tool_name.to_string()))?;
        capabilities.push(tool.capability());
    }

    let mut indegree = vec![0usize; specs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
    for (i, s) in specs.iter().enumerate() {
        for dep in &s.depends_on {
            let &d = index.get(dep).ok_or_else(|| {
                EngineError::Orchestration(format!("{} depends on {} which is not planned", s.key, dep))
            })?;
            indegree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..specs.len()).filter(|&i| indegree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(specs.len());
    while !ready.is_empty() {
        ready.sort_by_key(|&i| (capabilities[i].rank(), i));
        let next = ready.remove(0);
        sorted.push(next);
        for &dependent in &dependents[next] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if sorted.len() != specs.len() {
        return Err(EngineError::Orchestration("dependency cycle in plan".into()));
    }

    let order_of: HashMap<&str, u32> = sorted
        .iter()
        .enumerate()
        .map(|(pos, &i)| (specs[i].key, pos as u32 + 1))
        .collect();

    Ok(sorted
        .iter()
        .enumerate()
        .map(|(pos, &i)| {
            let s = &specs[i];
            PlanStep {
                order: pos as u32 + 1,
                tool_name: s.tool_name.to_string(),
                capability: capabilities[i],
                dependencies: s.depends_on.iter().filter_map(|d| order_of.get(d).copied()).collect(),
                optional: s.optional,
                description: s.description.to_string(),
            }
        })
        .collect())
}
