//! Main orchestrator - one conversational turn end to end
//!
//! INPUT → VERIFY(input) → PLAN(intake) → EXECUTE → STAGE → PLAN(stage)
//! → EXECUTE → OBSERVE → VERIFY(output) → COMMIT

pub mod reply;

use crate::audit::{turn_inputs_hash, AuditLog};
use crate::classifier::{IntentClassifier, TurnIntent};
use crate::config::EngineConfig;
use crate::data::DataProvider;
use crate::error::EngineError;
use crate::execution::{CancelToken, ExecutionEngine, TurnContext};
use crate::flow::{self, FlowGuards, Transition};
use crate::models::{
    BusinessStage, ContentType, ConversationSession, ExecutionStatus, ExtractedElements, Observation,
    Plan, SafetyReview, StatusEvent, StatusKind, TurnRecord, TurnReply,
};
use crate::planner::{Planner, StagePlanner};
use crate::safety::SafetyReviewer;
use crate::state::Persistence;
use crate::status::StatusSink;
use crate::tools::create_default_registry;
use crate::Result;
use chrono::Utc;
use dashmap::DashMap;
use reply::{allocation_table, backtest_table, compose_reply, failure_reply};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Single-writer discipline for one session. `generation` counts inbound
/// messages so an older in-flight turn can see it was superseded.
#[derive(Default)]
struct SessionGate {
    lock: Mutex<()>,
    generation: Arc<AtomicU64>,
}

/// Everything a turn produced, for the reply and the audit record
struct TurnTrail {
    started: Instant,
    plans: Vec<Plan>,
    observations: Vec<Observation>,
    trace: Vec<String>,
}

impl TurnTrail {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            plans: Vec::new(),
            observations: Vec::new(),
            trace: vec!["INPUT: message received".to_string()],
        }
    }

    fn observe(&mut self, plan: Plan, observations: Vec<Observation>) {
        self.trace.push(format!("EXECUTE: {:?} plan with {} step(s)", plan.stage, plan.steps.len()));
        for obs in &observations {
            self.trace.push(format!(
                "OBSERVE: step {} ({}) - {:?} - {} ms",
                obs.step_order, obs.tool_name, obs.status, obs.execution_time_ms
            ));
        }
        self.plans.push(plan);
        self.observations.extend(observations);
    }
}

/// Main orchestrator that coordinates conversational turns
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    executor: ExecutionEngine,
    reviewer: Arc<SafetyReviewer>,
    store: Arc<dyn Persistence>,
    status: Arc<dyn StatusSink>,
    audit: AuditLog,
    gates: DashMap<Uuid, Arc<SessionGate>>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: ExecutionEngine,
        reviewer: Arc<SafetyReviewer>,
        store: Arc<dyn Persistence>,
        status: Arc<dyn StatusSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            planner,
            executor,
            reviewer,
            store,
            status,
            audit: AuditLog::new(),
            gates: DashMap::new(),
            config,
        }
    }

    /// Orchestrator over the built-in tools, stage planner and compliance rules
    pub fn with_defaults(
        provider: Arc<dyn DataProvider>,
        store: Arc<dyn Persistence>,
        status: Arc<dyn StatusSink>,
        config: EngineConfig,
    ) -> Self {
        let reviewer = Arc::new(SafetyReviewer::default());
        let registry = Arc::new(create_default_registry(provider, reviewer.clone(), &config));
        let planner = Arc::new(StagePlanner::new(registry.clone()));
        let executor = ExecutionEngine::new(registry, status.clone(), config.orchestrator.clone());
        Self::new(planner, executor, reviewer, store, status, config)
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    /// Handle one message. A new session is owned by a user with the
    /// session's own id.
    pub async fn handle_turn(&self, session_id: Uuid, message: &str) -> TurnReply {
        self.handle_turn_for_user(session_id, None, message).await
    }

    /// Handle one message for a known user. Never fails: errors become a
    /// user-facing reply and leave the session at its last committed state.
    pub async fn handle_turn_for_user(&self, session_id: Uuid, user_id: Option<Uuid>, message: &str) -> TurnReply {
        let gate = self.gate(session_id);
        let issued = gate.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelToken::new(gate.generation.clone(), issued);
        let result = {
            let _guard = gate.lock.lock().await;
            if cancel.is_cancelled() {
                Err(EngineError::Cancelled(format!("message superseded before start in session {}", session_id)))
            } else {
                self.run_turn(session_id, user_id, message, &cancel).await
            }
        };
        self.release_gate(session_id);

        match result {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_user_facing() || matches!(e, EngineError::Cancelled(_)) {
                    info!(session_id = %session_id, kind = e.kind(), "Turn ended without commit");
                } else {
                    error!(session_id = %session_id, kind = e.kind(), error = %e, "Turn failed");
                }
                self.status.publish(session_id, StatusEvent::new(StatusKind::Failed, "处理失败"));
                self.failure(session_id, &e).await
            }
        }
    }

    async fn run_turn(
        &self,
        session_id: Uuid,
        user_id: Option<Uuid>,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<TurnReply> {
        let mut trail = TurnTrail::new();
        self.status.publish(session_id, StatusEvent::new(StatusKind::Thinking, "正在理解您的需求"));

        let mut session = match self.store.load_session(session_id).await? {
            Some(session) => session,
            None => ConversationSession::new(session_id, user_id.unwrap_or(session_id)),
        };
        let stage_before = session.stage;

        info!(
            session_id = %session_id,
            user_id = %session.user_id,
            stage = ?stage_before,
            turn = session.turn_count + 1,
            "Orchestrator: turn received"
        );

        // === VERIFY (input) ===
        let input_review = self.reviewer.check_input(message);
        trail.trace.push(format!("VERIFY: input risk level {:?}", input_review.risk_level));
        if input_review.blocked {
            warn!(session_id = %session_id, "Input blocked by safety review");
            let text = input_review.processed_content.clone();
            let audit_id = self
                .record(&session, message, stage_before, stage_before, trail, Some(input_review.clone()), &text)
                .await?;
            self.status.publish(session_id, StatusEvent::new(StatusKind::Completed, "完成"));
            return Ok(TurnReply {
                strategy: session.current_strategy.clone(),
                safety: Some(input_review),
                audit_id: Some(audit_id),
                ..self.reply(session_id, text, stage_before, &session.elements)
            });
        }

        let intent = IntentClassifier::classify(message);
        let mut ctx = TurnContext::new(&session, message, intent, &self.config);
        debug!(session_id = %session_id, intent = ?intent, "Intent classified");

        // === PLAN + EXECUTE (intake) ===
        let intake = self.planner.intake_plan(&ctx).await?;
        trail.trace.push(format!("PLAN: intake with {} step(s)", intake.steps.len()));
        let outcome = self.executor.execute_plan(&intake, &mut ctx, cancel).await;
        trail.observe(intake, outcome.observations);
        if let Some(e) = outcome.halted {
            return Err(e);
        }

        // === STAGE ===
        if session.turn_count == 0 {
            ctx.prior_strategies = self.store.load_prior_strategies(session.user_id).await?;
        }
        let guards = FlowGuards {
            intent,
            elements: &ctx.elements,
            has_strategy: ctx.strategy.is_some(),
            has_prior_strategies: !ctx.prior_strategies.is_empty(),
            first_turn: session.turn_count == 0,
            elements_changed: ctx.elements_changed,
        };
        let hop = flow::advance(ctx.stage, &guards, &self.config.orchestrator)?;
        trail.trace.push(format!(
            "PLAN: stage {:?} -> {:?} on {:?}",
            hop.from, hop.to, intent
        ));
        self.enter_stage(&mut ctx, &mut session, &hop).await?;

        // === PLAN + EXECUTE (stage) ===
        let plan = self.planner.create_plan(&ctx).await?;
        trail.trace.push(format!("PLAN: {} step(s) for {:?}", plan.steps.len(), plan.stage));
        let outcome = self.executor.execute_plan(&plan, &mut ctx, cancel).await;
        trail.observe(plan, outcome.observations);

        let halted = match outcome.halted {
            Some(e) if !e.is_user_facing() => return Err(e),
            other => other,
        };

        // === VERIFY (output) ===
        let review = match (&halted, ctx.safety.take()) {
            (None, Some(review)) => review,
            (Some(e), _) => self.reviewer.check_output(&failure_reply(e), ContentType::General),
            (None, None) => {
                let (text, content_type) = compose_reply(&ctx);
                self.reviewer.check_output(&text, content_type)
            }
        };
        trail.trace.push(format!(
            "VERIFY: output risk level {:?}, {} violation(s), blocked={}",
            review.risk_level,
            review.violations.len(),
            review.blocked
        ));

        // === COMMIT ===
        let stage_after = if ctx.save_requested {
            // the backtest a save was waiting on did not land
            BusinessStage::ReviewFeedback
        } else {
            flow::settle(ctx.stage, ctx.strategy.is_some(), halted.as_ref())
        };
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled(format!("turn in session {} superseded", session_id)));
        }

        session.stage = stage_after;
        session.elements = ctx.elements.clone();
        session.current_strategy = ctx.strategy.clone();
        session.turn_count += 1;
        session.updated_at = Utc::now();
        let saved = ctx.strategy.as_ref().filter(|_| ctx.strategy_saved);
        self.store.commit_turn(&session, saved).await?;
        if let Some(strategy) = saved {
            info!(session_id = %session_id, strategy_id = %strategy.id, version = strategy.version, "Strategy saved");
        }

        if ctx.strategy_updated {
            if let Some(strategy) = &ctx.strategy {
                trail.trace.push(format!("RESULT: strategy v{}\n{}", strategy.version, allocation_table(strategy, None)));
                if let Some(result) = &strategy.backtest_result {
                    trail.trace.push(format!("RESULT: backtest\n{}", backtest_table(result)));
                }
            }
        }
        trail.trace.push(format!("COMPLETE: stage {:?}", stage_after));

        let text = review.processed_content.clone();
        let audit_id = self
            .record(&session, message, stage_before, stage_after, trail, Some(review.clone()), &text)
            .await?;

        info!(
            session_id = %session_id,
            stage_before = ?stage_before,
            stage_after = ?stage_after,
            strategy_updated = ctx.strategy_updated,
            "Orchestrator: turn committed"
        );
        self.status.publish(session_id, StatusEvent::new(StatusKind::Completed, "完成"));

        Ok(TurnReply {
            strategy_updated: ctx.strategy_updated,
            strategy: ctx.strategy,
            safety: Some(review),
            audit_id: Some(audit_id),
            ..self.reply(session_id, text, stage_after, &session.elements)
        })
    }

    /// Side effects of entering the resolved stage, applied before its plan
    async fn enter_stage(
        &self,
        ctx: &mut TurnContext,
        session: &mut ConversationSession,
        hop: &Transition,
    ) -> Result<()> {
        use BusinessStage::*;

        if hop.regressed {
            session.rejection_count = 0;
            if matches!(hop.to, Intro | ElementCollection) && hop.from != SaveOrExit {
                ctx.elements = ExtractedElements::new();
                ctx.strategy = None;
            }
        }

        match hop.to {
            ReturningUser => {
                ctx.strategy = ctx.prior_strategies.last().cloned();
            }
            SaveOrExit if ctx.intent == TurnIntent::Save => {
                ctx.request_save()?;
                session.rejection_count = 0;
            }
            ReviewFeedback if ctx.intent == TurnIntent::Feedback && !hop.regressed => {
                session.rejection_count += 1;
                ctx.nudge = session.rejection_count >= self.config.orchestrator.rejection_nudge_threshold;
            }
            _ => {}
        }

        ctx.stage = hop.to;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        session: &ConversationSession,
        message: &str,
        stage_before: BusinessStage,
        stage_after: BusinessStage,
        trail: TurnTrail,
        safety_review: Option<SafetyReview>,
        reply: &str,
    ) -> Result<Uuid> {
        let failed_steps = trail
            .observations
            .iter()
            .filter(|o| o.status == ExecutionStatus::Failed)
            .count();
        debug!(session_id = %session.id, failed_steps, "Recording turn");

        self.audit
            .record(TurnRecord {
                audit_id: Uuid::new_v4(),
                session_id: session.id,
                user_id: session.user_id,
                user_message: message.to_string(),
                inputs_hash: turn_inputs_hash(session.id, message),
                stage_before,
                stage_after,
                plans: trail.plans,
                observations: trail.observations,
                safety_review,
                reply: reply.to_string(),
                reasoning_trace: trail.trace,
                created_at: Utc::now(),
                execution_time_ms: trail.started.elapsed().as_millis() as u64,
            })
            .await
    }

    async fn failure(&self, session_id: Uuid, e: &EngineError) -> TurnReply {
        let committed = self.store.load_session(session_id).await.ok().flatten();
        let (stage, elements, strategy) = match committed {
            Some(s) => (s.stage, s.elements, s.current_strategy),
            None => (BusinessStage::Intro, ExtractedElements::new(), None),
        };

        TurnReply {
            strategy,
            retry_available: !(e.is_user_facing() || matches!(e, EngineError::Cancelled(_))),
            ..self.reply(session_id, failure_reply(e), stage, &elements)
        }
    }

    fn reply(&self, session_id: Uuid, text: String, stage: BusinessStage, elements: &ExtractedElements) -> TurnReply {
        TurnReply {
            session_id,
            reply: text,
            strategy_updated: false,
            strategy: None,
            stage,
            progress: flow::progress(stage, elements, self.config.orchestrator.element_confidence_gate),
            safety: None,
            retry_available: false,
            audit_id: None,
        }
    }

    fn gate(&self, session_id: Uuid) -> Arc<SessionGate> {
        self.gates.entry(session_id).or_default().clone()
    }

    /// Drop the session's gate unless another message holds or waits on it.
    /// Called while the caller still owns one reference.
    fn release_gate(&self, session_id: Uuid) {
        self.gates.remove_if(&session_id, |_, gate| Arc::strong_count(gate) <= 2);
    }

    /// Sessions with a turn in flight
    pub fn active_sessions(&self) -> usize {
        self.gates.len()
    }
}
