//! Execution engine for deterministic plan execution
//!
//! Steps run one at a time in plan order against the turn context.
//! Transport failures are retried with backoff, insufficient data and
//! optional steps degrade, and anything else halts the plan.

pub mod context;

pub use context::TurnContext;

use crate::audit::compute_hash;
use crate::config::OrchestratorConfig;
use crate::error::EngineError;
use crate::models::{ExecutionStatus, Observation, Plan, PlanStep, StatusEvent, StatusKind};
use crate::status::StatusSink;
use crate::tools::{ToolInput, ToolOutput, ToolRegistry};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Maximum steps allowed per plan
const MAX_STEPS_PER_PLAN: usize = 50;

/// Cooperative cancellation. A token is cancelled once the session's
/// generation counter moves past the value it was issued with.
#[derive(Debug, Clone)]
pub struct CancelToken {
    current: Arc<AtomicU64>,
    issued: u64,
}

impl CancelToken {
    pub fn new(current: Arc<AtomicU64>, issued: u64) -> Self {
        Self { current, issued }
    }

    /// A token nothing can cancel
    pub fn never() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)), 0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.issued
    }
}

/// Result of running one plan
#[derive(Debug)]
pub struct PlanOutcome {
    pub observations: Vec<Observation>,
    /// Set when the plan stopped early
    pub halted: Option<EngineError>,
}

impl PlanOutcome {
    pub fn completed(&self) -> bool {
        self.halted.is_none()
    }
}

enum Disposition {
    Degrade,
    Halt(EngineError),
}

pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    status: Arc<dyn StatusSink>,
    config: OrchestratorConfig,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>, status: Arc<dyn StatusSink>, config: OrchestratorConfig) -> Self {
        Self { registry, status, config }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute all steps in order (dependency-safe, fail-fast on hard errors).
    pub async fn execute_plan(&self, plan: &Plan, ctx: &mut TurnContext, cancel: &CancelToken) -> PlanOutcome {
        if plan.steps.len() > MAX_STEPS_PER_PLAN {
            return PlanOutcome {
                observations: Vec::new(),
                halted: Some(EngineError::Orchestration(format!(
                    "Plan exceeds maximum allowed steps ({})",
                    MAX_STEPS_PER_PLAN
                ))),
            };
        }

        let total_steps = plan.steps.len() as u32;
        let mut observations = Vec::with_capacity(plan.steps.len());
        let mut settled: HashMap<u32, ExecutionStatus> = HashMap::with_capacity(plan.steps.len());
        let mut halted = None;

        debug!(plan_id = %plan.plan_id, stage = ?plan.stage, steps = total_steps, "Starting plan execution");

        for step in &plan.steps {
            if cancel.is_cancelled() {
                warn!(session_id = %ctx.session_id, plan_id = %plan.plan_id, step_order = step.order, "Plan cancelled by a newer message");
                self.publish(ctx.session_id, StatusEvent::new(StatusKind::Cancelled, "已被新的消息取代"));
                halted = Some(EngineError::Cancelled(format!("plan {} superseded", plan.plan_id)));
                break;
            }

            let missing_dependencies: Vec<u32> = step
                .dependencies
                .iter()
                .filter(|dep| {
                    !matches!(
                        settled.get(dep),
                        Some(ExecutionStatus::Success) | Some(ExecutionStatus::Degraded)
                    )
                })
                .cloned()
                .collect();

            if !missing_dependencies.is_empty() {
                warn!(
                    step_order = step.order,
                    tool_name = %step.tool_name,
                    ?missing_dependencies,
                    "Skipping step due to unmet dependencies"
                );
                settled.insert(step.order, ExecutionStatus::Skipped);
                observations.push(observation(
                    plan,
                    step,
                    String::new(),
                    ExecutionStatus::Skipped,
                    0,
                    0,
                    Some(format!("Unmet dependencies: {:?}", missing_dependencies)),
                ));
                continue;
            }

            self.publish(
                ctx.session_id,
                StatusEvent {
                    tool_name: Some(step.tool_name.clone()),
                    step: Some(step.order),
                    total_steps: Some(total_steps),
                    ..StatusEvent::new(step.capability.into(), step.description.clone())
                },
            );

            let start = Instant::now();
            let input = ctx.input_for(step);
            let inputs_hash = match &input {
                Ok(input) => compute_hash(input),
                Err(_) => compute_hash(&step.tool_name),
            };

            let (result, attempts) = match input {
                Ok(input) => self.run_with_retry(step, &input).await,
                Err(e) => (Err(e), 0),
            };
            let result = result.and_then(|output| ctx.apply(output));
            let execution_time_ms = start.elapsed().as_millis() as u64;

            let (status, error_text) = match result {
                Ok(()) => (ExecutionStatus::Success, None),
                Err(e) => match self.disposition(step, e, ctx, &inputs_hash) {
                    Disposition::Degrade => {
                        ctx.degraded.push(step.tool_name.clone());
                        (ExecutionStatus::Degraded, Some("degraded".to_string()))
                    }
                    Disposition::Halt(e) => {
                        let text = e.to_string();
                        halted = Some(e);
                        (ExecutionStatus::Failed, Some(text))
                    }
                },
            };

            settled.insert(step.order, status.clone());
            observations.push(observation(
                plan,
                step,
                inputs_hash,
                status,
                attempts,
                execution_time_ms,
                error_text,
            ));

            if halted.is_some() {
                warn!(plan_id = %plan.plan_id, step_order = step.order, "Halting execution due to step failure");
                break;
            }
        }

        debug!(plan_id = %plan.plan_id, observation_count = observations.len(), "Plan execution completed");

        PlanOutcome { observations, halted }
    }

    /// Run one step, retrying retryable failures with linear backoff.
    async fn run_with_retry(&self, step: &PlanStep, input: &ToolInput) -> (Result<ToolOutput>, u32) {
        let max_attempts = self.config.max_step_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.registry.execute(&step.tool_name, input).await {
                Ok(output) => return (Ok(output), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.retry_backoff_ms * attempt as u64;
                    warn!(
                        tool_name = %step.tool_name,
                        attempt,
                        backoff_ms = backoff,
                        error = %e,
                        "Retrying step"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    fn disposition(&self, step: &PlanStep, e: EngineError, ctx: &TurnContext, inputs_hash: &str) -> Disposition {
        if e.is_user_facing() || matches!(e, EngineError::Cancelled(_)) {
            return Disposition::Halt(e);
        }

        if matches!(e, EngineError::InsufficientData(_)) || step.optional {
            warn!(
                session_id = %ctx.session_id,
                tool_name = %step.tool_name,
                error = %e,
                "Step degraded"
            );
            return Disposition::Degrade;
        }

        error!(
            session_id = %ctx.session_id,
            stage = ?ctx.stage,
            tool_name = %step.tool_name,
            inputs_hash = %inputs_hash,
            error = %e,
            "Tool failed"
        );
        Disposition::Halt(EngineError::Orchestration(format!("step '{}' failed", step.tool_name)))
    }

    fn publish(&self, session_id: Uuid, event: StatusEvent) {
        self.status.publish(session_id, event);
    }
}

fn observation(
    plan: &Plan,
    step: &PlanStep,
    inputs_hash: String,
    status: ExecutionStatus,
    attempts: u32,
    execution_time_ms: u64,
    error: Option<String>,
) -> Observation {
    Observation {
        observation_id: Uuid::new_v4(),
        plan_id: plan.plan_id,
        step_order: step.order,
        tool_name: step.tool_name.clone(),
        inputs_hash,
        status,
        attempts,
        execution_time_ms,
        error,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TurnIntent;
    use crate::models::{BusinessStage, Capability, ConversationSession, EtfRecord};
    use crate::status::ChannelStatusSink;
    use crate::tools::{InputSchema, Tool};
    use std::sync::atomic::AtomicU32;

    /// Universe tool that fails with a transport error a fixed number of times
    struct FlakyUniverseTool {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Tool for FlakyUniverseTool {
        fn name(&self) -> &'static str {
            "fetch_etf_universe"
        }

        fn description(&self) -> &'static str {
            "flaky"
        }

        fn capability(&self) -> Capability {
            Capability::DataFetch
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::default()
        }

        async fn execute(&self, _input: &ToolInput) -> Result<ToolOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(EngineError::DataProvider("connection reset".into()));
            }
            Ok(ToolOutput::EtfUniverse(vec![EtfRecord::new("510300", "沪深300ETF")]))
        }
    }

    fn engine(failures: u32) -> (ExecutionEngine, tokio::sync::mpsc::Receiver<(Uuid, StatusEvent)>) {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FlakyUniverseTool { failures, calls: AtomicU32::new(0) }));
        registry.register(Arc::new(crate::tools::analysis::ExtractElementsTool));

        let (sink, rx) = ChannelStatusSink::new(64);
        let config = OrchestratorConfig { retry_backoff_ms: 1, ..OrchestratorConfig::default() };
        (ExecutionEngine::new(Arc::new(registry), Arc::new(sink), config), rx)
    }

    fn step(order: u32, tool_name: &str, dependencies: Vec<u32>, optional: bool) -> PlanStep {
        PlanStep {
            order,
            tool_name: tool_name.to_string(),
            capability: Capability::DataFetch,
            dependencies,
            optional,
            description: format!("run {}", tool_name),
        }
    }

    fn plan(steps: Vec<PlanStep>) -> Plan {
        Plan {
            plan_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            stage: BusinessStage::StrategyGeneration,
            steps,
            created_at: Utc::now(),
        }
    }

    fn context() -> TurnContext {
        let session = ConversationSession::new(Uuid::new_v4(), Uuid::new_v4());
        TurnContext::new(&session, "我是稳健型投资者", TurnIntent::Inform, &crate::config::EngineConfig::default())
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let (engine, mut rx) = engine(2);
        let mut ctx = context();

        let outcome = engine
            .execute_plan(&plan(vec![step(1, "fetch_etf_universe", vec![], false)]), &mut ctx, &CancelToken::never())
            .await;

        assert!(outcome.completed());
        assert_eq!(outcome.observations[0].status, ExecutionStatus::Success);
        assert_eq!(outcome.observations[0].attempts, 3);
        assert_eq!(ctx.universe.len(), 1);

        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(event.kind, StatusKind::FetchingData);
        assert_eq!(event.step, Some(1));
    }

    #[tokio::test]
    async fn test_exhausted_retries_halt_with_orchestration_error() {
        let (engine, _rx) = engine(10);
        let mut ctx = context();

        let outcome = engine
            .execute_plan(
                &plan(vec![
                    step(1, "fetch_etf_universe", vec![], false),
                    step(2, "extract_elements", vec![], false),
                ]),
                &mut ctx,
                &CancelToken::never(),
            )
            .await;

        assert!(matches!(outcome.halted, Some(EngineError::Orchestration(_))));
        assert_eq!(outcome.observations.len(), 1);
        assert_eq!(outcome.observations[0].status, ExecutionStatus::Failed);
        assert_eq!(outcome.observations[0].attempts, 3);
        // raw provider text stays out of the observation
        assert!(!outcome.observations[0].error.as_deref().unwrap_or("").contains("connection reset"));
    }

    #[tokio::test]
    async fn test_optional_step_degrades() {
        let (engine, _rx) = engine(10);
        let mut ctx = context();

        let outcome = engine
            .execute_plan(
                &plan(vec![
                    step(1, "fetch_etf_universe", vec![], true),
                    step(2, "extract_elements", vec![1], false),
                ]),
                &mut ctx,
                &CancelToken::never(),
            )
            .await;

        assert!(outcome.completed());
        assert_eq!(outcome.observations[0].status, ExecutionStatus::Degraded);
        assert_eq!(outcome.observations[1].status, ExecutionStatus::Success);
        assert_eq!(ctx.degraded, vec!["fetch_etf_universe".to_string()]);
    }

    #[tokio::test]
    async fn test_unmet_dependency_is_skipped() {
        let (engine, _rx) = engine(0);
        let mut ctx = context();

        let outcome = engine
            .execute_plan(
                &plan(vec![
                    step(1, "extract_elements", vec![9], false),
                    step(2, "fetch_etf_universe", vec![], false),
                ]),
                &mut ctx,
                &CancelToken::never(),
            )
            .await;

        assert!(outcome.completed());
        assert_eq!(outcome.observations[0].status, ExecutionStatus::Skipped);
        assert_eq!(outcome.observations[1].status, ExecutionStatus::Success);
        assert!(ctx.extracted.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let (engine, _rx) = engine(0);
        let mut ctx = context();
        let generation = Arc::new(AtomicU64::new(1));
        let token = CancelToken::new(generation.clone(), 1);
        generation.fetch_add(1, Ordering::SeqCst);

        let outcome = engine
            .execute_plan(&plan(vec![step(1, "fetch_etf_universe", vec![], false)]), &mut ctx, &token)
            .await;

        assert!(matches!(outcome.halted, Some(EngineError::Cancelled(_))));
        assert!(outcome.observations.is_empty());
        assert!(ctx.universe.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_plan_is_rejected() {
        let (engine, _rx) = engine(0);
        let mut ctx = context();
        let steps = (1..=51).map(|i| step(i, "extract_elements", vec![], false)).collect();

        let outcome = engine.execute_plan(&plan(steps), &mut ctx, &CancelToken::never()).await;
        assert!(matches!(outcome.halted, Some(EngineError::Orchestration(_))));
    }
}
