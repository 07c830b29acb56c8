//! Orchestrate use case
//!
//! Takes an [`OrchestrationRequest`] through the run lifecycle:
//!
//! ```text
//! ids ─▶ run_started ─▶ idempotency check ──hit──▶ replay
//!                            │ miss
//!                            ▼
//!          explicit tool ─or─ planner (circuit states, budget)
//!                            │ candidates = [chosen, fallbacks...]
//!                            ▼
//!     for each candidate: reliability.call(breaker key)
//!        bundle tool ─▶ BundleEngine        single tool ─▶ Tool::execute
//!                            │
//!            success ─▶ post-hoc budget check ─▶ store ─▶ run_completed
//!            failure ─▶ errors[tool], next fallback
//! ```
//!
//! The base variant makes one attempt per tool and has no breakers or
//! idempotency; the reliable variant routes every attempt through a
//! [`ReliabilityManager`].
//!
//! Tool failures never surface as `Err`: the run ends with
//! `status = failed` and an `errors` map. `Err` is reserved for caller
//! mistakes (unknown tool, invalid ids) and for budget overruns and
//! idempotency conflicts when the settings make them strict.

use crate::config::{BudgetEnforcement, OrchestratorSettings};
use crate::error::OrchestratorError;
use crate::ports::event_sink::{EventEmitter, EventSink, NoEventSink};
use crate::ports::idempotency_store::IdempotencyStore;
use crate::ports::tool::Tool;
use crate::registry::ToolRegistry;
use crate::reliability::{ReliabilityManager, RetryOutcome};
use crate::use_cases::run_bundle::{BundleCall, BundleEngine};
use orchestra_domain::{
    BundleDigest, BundleOptions, ErrorClassifier, ErrorCode, EventKind, IdempotencyCheck,
    OrchestrationConfig, OrchestrationOutput, OrchestrationRequest, OutputMetadata, PlanDecision,
    PlanRequest, Planner, RunLifecycle, RunPhase, RunStatus, ToolError, ToolErrorReport,
    ToolMetadata, Usage, orchestration::validate_id, payload_fingerprint,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key used in `errors` for idempotency failures
pub const IDEMPOTENCY_ERROR_KEY: &str = "idempotency";

/// What a successful tool call produced
struct Produced {
    content: Value,
    usage: Usage,
    bundle: Option<BundleDigest>,
}

/// Mutable per-run state
struct RunContext<'a> {
    trace_id: String,
    request_id: String,
    events: EventEmitter,
    lifecycle: RunLifecycle,
    started: Instant,
    deadline: Option<Instant>,
    cancel: &'a CancellationToken,
    warnings: Vec<String>,
}

impl RunContext<'_> {
    fn advance(&mut self, next: RunPhase) {
        if let Err(e) = self.lifecycle.advance(next) {
            warn!(trace_id = %self.trace_id, "{}", e);
        }
    }

    fn warn(&mut self, message: String, payload: Value) {
        warn!(trace_id = %self.trace_id, "{}", message);
        self.events.emit(EventKind::Warning, payload);
        self.warnings.push(message);
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// A failed output carrying `errors`
    fn failed_output(
        &mut self,
        errors: BTreeMap<String, ToolErrorReport>,
        metadata: OutputMetadata,
    ) -> OrchestrationOutput {
        self.advance(RunPhase::Failed);
        OrchestrationOutput {
            content: Value::Null,
            usage: Usage::default().with_time_ms(self.elapsed_ms()),
            metadata: OutputMetadata {
                warnings: std::mem::take(&mut self.warnings),
                ..metadata
            },
            trace_id: self.trace_id.clone(),
            request_id: self.request_id.clone(),
            elapsed_ms: self.elapsed_ms(),
            status: RunStatus::Failed,
            errors,
        }
    }
}

/// Tool chosen for a run plus its fallbacks
struct Selection {
    candidates: Vec<String>,
    options: Value,
    rule: Option<String>,
}

/// Ownership of an idempotency key for the length of one run.
///
/// Dropped unsettled (the run future was abandoned), it releases the key so a
/// retry is not refused as in progress until the TTL runs out.
struct Reservation {
    store: Arc<dyn IdempotencyStore>,
    key: String,
    settled: bool,
}

impl Reservation {
    fn new(store: Arc<dyn IdempotencyStore>, key: String) -> Self {
        Self {
            store,
            key,
            settled: false,
        }
    }

    /// Store a completed output, release the key otherwise.
    fn settle(mut self, result: &Result<OrchestrationOutput, OrchestratorError>) {
        self.settled = true;
        match result {
            Ok(output) if output.is_completed() => self.store.store(&self.key, output.clone()),
            _ => self.store.release(&self.key),
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            debug!(key = %self.key, "Run abandoned, releasing idempotency key");
            self.store.release(&self.key);
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    planner: Planner,
    engine: BundleEngine,
    reliability: Option<Arc<ReliabilityManager>>,
    classifier: ErrorClassifier,
    events: Arc<dyn EventSink>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Base orchestrator: single attempt per tool, no breakers, no idempotency.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            planner: Planner::default(),
            engine: BundleEngine::default(),
            reliability: None,
            classifier: ErrorClassifier::default(),
            events: Arc::new(NoEventSink),
            settings: OrchestratorSettings::default(),
        }
    }

    /// Reliable orchestrator: retries, circuit breakers and idempotency.
    pub fn reliable(registry: Arc<ToolRegistry>, reliability: Arc<ReliabilityManager>) -> Self {
        let classifier = reliability.retry().classifier().clone();
        Self {
            reliability: Some(reliability),
            classifier,
            ..Self::new(registry)
        }
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_engine(mut self, engine: BundleEngine) -> Self {
        self.engine = engine.with_enforcement(self.settings.budget_enforcement);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.engine = std::mem::take(&mut self.engine).with_enforcement(settings.budget_enforcement);
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn reliability(&self) -> Option<&Arc<ReliabilityManager>> {
        self.reliability.as_ref()
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability.is_some()
    }

    pub async fn run(
        &self,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationOutput, OrchestratorError> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run with an external cancellation token.
    pub async fn run_with_cancel(
        &self,
        request: OrchestrationRequest,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationOutput, OrchestratorError> {
        let started = Instant::now();
        let trace_id = resolve_id("trace_id", request.config.trace_id.as_deref())?;
        let request_id = resolve_id("request_id", request.config.request_id.as_deref())?;
        if let Some(options) = &request.bundle_options {
            options
                .validate()
                .map_err(|e| OrchestratorError::InvalidRequest(format!("bundle_options: {}", e)))?;
        }
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let timeout_ms = request.config.timeout_ms.or(self.settings.default_timeout_ms);
        let mut ctx = RunContext {
            events: EventEmitter::new(Arc::clone(&self.events), &trace_id, &request_id),
            trace_id,
            request_id,
            lifecycle: RunLifecycle::new(),
            started,
            deadline: timeout_ms.map(|ms| started + Duration::from_millis(ms)),
            cancel,
            warnings: Vec::new(),
        };

        info!(
            trace_id = %ctx.trace_id,
            request_id = %ctx.request_id,
            tool = ?request.tool_name,
            "Run started"
        );
        ctx.events.emit(
            EventKind::RunStarted,
            json!({
                "tool": request.tool_name,
                "idempotency_key": request.config.idempotency_key,
                "reliable": self.is_reliable(),
                "streaming": request.config.streaming,
            }),
        );

        let result = self.run_idempotent(request, &mut ctx).await;

        match &result {
            Ok(output) => {
                info!(
                    trace_id = %ctx.trace_id,
                    status = %output.status,
                    elapsed_ms = output.elapsed_ms,
                    "Run finished"
                );
                ctx.events.emit(
                    EventKind::RunCompleted,
                    json!({
                        "status": output.status,
                        "tool": output.metadata.tool,
                        "elapsed_ms": output.elapsed_ms,
                        "retry_count": output.metadata.retry_count,
                        "idempotent_replay": output.metadata.idempotent_replay,
                        "phase": ctx.lifecycle.phase(),
                    }),
                );
            }
            Err(error) => {
                ctx.advance(RunPhase::Failed);
                warn!(trace_id = %ctx.trace_id, "Run failed: {}", error);
                ctx.events.emit(
                    EventKind::Error,
                    json!({"code": error.code(), "message": error.to_string()}),
                );
                ctx.events.emit(
                    EventKind::RunCompleted,
                    json!({
                        "status": RunStatus::Failed,
                        "code": error.code(),
                        "elapsed_ms": ctx.elapsed_ms(),
                        "phase": ctx.lifecycle.phase(),
                    }),
                );
            }
        }
        result
    }

    /// Idempotency wrapper around [`Self::execute`].
    async fn run_idempotent(
        &self,
        request: OrchestrationRequest,
        ctx: &mut RunContext<'_>,
    ) -> Result<OrchestrationOutput, OrchestratorError> {
        let Some(key) = request.config.idempotency_key.clone() else {
            return self.execute(request, ctx).await;
        };
        let Some(reliability) = &self.reliability else {
            ctx.warn(
                "idempotency_key ignored: orchestrator has no idempotency store".to_string(),
                json!({"idempotency_key": key}),
            );
            return self.execute(request, ctx).await;
        };

        let store = Arc::clone(reliability.idempotency());
        let fingerprint = payload_fingerprint(
            request.tool_name.as_deref(),
            &json!({
                "tool_options": request.tool_options,
                "bundle_options": request.bundle_options,
            }),
            &request.payload,
        );

        match store.check_or_reserve(&key, &fingerprint) {
            IdempotencyCheck::Hit(mut stored) => {
                info!(trace_id = %ctx.trace_id, key = %key, "Idempotent replay");
                ctx.advance(RunPhase::Completed);
                stored.metadata.idempotent_replay = true;
                Ok(stored)
            }
            IdempotencyCheck::Conflict { stored_fingerprint } => {
                debug!(key = %key, stored = %stored_fingerprint, "Idempotency conflict");
                if self.settings.strict_conflict {
                    return Err(OrchestratorError::Conflict { key });
                }
                let message = OrchestratorError::Conflict { key }.to_string();
                Ok(ctx.failed_output(conflict_errors(message), OutputMetadata::default()))
            }
            IdempotencyCheck::InProgress => {
                if self.settings.strict_conflict {
                    return Err(OrchestratorError::InProgress { key });
                }
                let message = OrchestratorError::InProgress { key }.to_string();
                Ok(ctx.failed_output(conflict_errors(message), OutputMetadata::default()))
            }
            IdempotencyCheck::Miss => {
                let reservation = Reservation::new(store, key);
                let result = self.execute(request, ctx).await;
                reservation.settle(&result);
                result
            }
        }
    }

    /// Select candidates and run them until one succeeds.
    async fn execute(
        &self,
        request: OrchestrationRequest,
        ctx: &mut RunContext<'_>,
    ) -> Result<OrchestrationOutput, OrchestratorError> {
        let OrchestrationRequest {
            payload,
            tool_name,
            tool_options,
            bundle_options,
            config,
        } = request;

        let selection = self.select(&payload, tool_name, tool_options, &config, ctx)?;
        let bundle_options = self.bundle_options(bundle_options, &config, &ctx.request_id);

        let mut errors = BTreeMap::new();
        let mut fallbacks_tried = Vec::new();
        let mut retry_count = 0u32;

        for (position, name) in selection.candidates.iter().enumerate() {
            if position > 0 && ctx.deadline.is_some_and(|d| Instant::now() >= d) {
                ctx.warn(
                    format!("run deadline passed, fallback '{}' not attempted", name),
                    json!({"tool": name, "reason": "deadline"}),
                );
                break;
            }
            let tool = match self.registry.get(name) {
                Ok(tool) => tool,
                Err(e) => {
                    ctx.warn(e.to_string(), json!({"tool": name, "reason": "not_registered"}));
                    continue;
                }
            };
            let meta = tool.metadata();
            let events = ctx.events.for_tool(name);

            ctx.advance(RunPhase::Executing);
            events.emit(
                EventKind::ToolStarted,
                json!({
                    "version": meta.version,
                    "bundle": meta.supports_bundle,
                    "fallback": position > 0,
                }),
            );
            debug!(trace_id = %ctx.trace_id, tool = %name, "Executing tool");

            let outcome = self
                .invoke(&tool, &meta, &payload, &selection.options, &bundle_options, ctx, &events)
                .await;
            retry_count += outcome.retries();

            let error = match outcome.result {
                Ok(produced) => {
                    let metadata = OutputMetadata {
                        tool: Some(name.clone()),
                        tool_version: Some(meta.version.clone()),
                        retry_count,
                        circuit_states: self.circuit_snapshot(),
                        rule: selection.rule.clone(),
                        fallbacks_tried,
                        bundle: produced.bundle.clone(),
                        idempotent_replay: false,
                        warnings: Vec::new(),
                    };
                    return self.finish(produced, metadata, errors, &config, ctx);
                }
                Err(error) => error,
            };

            let retryable = outcome
                .classification
                .map(|c| c.retryable)
                .unwrap_or_else(|| self.classifier.classify(&error).retryable);
            let cancelled = error.is_cancelled();
            let report = ToolErrorReport::from_tool_error(&error, retryable);
            let failure = OrchestratorError::ToolExecution {
                tool: name.clone(),
                source: error,
            };
            warn!(trace_id = %ctx.trace_id, "{}", failure);
            events.emit(EventKind::Error, json!(report));
            if cancelled {
                events.emit(EventKind::Cancelled, json!({"tool": name}));
            } else if report.code == ErrorCode::Timeout {
                events.emit(EventKind::Timeout, json!({"tool": name, "message": report.message}));
            }
            errors.insert(name.clone(), report);
            fallbacks_tried.push(name.clone());

            if cancelled {
                break;
            }
        }

        let metadata = OutputMetadata {
            retry_count,
            circuit_states: self.circuit_snapshot(),
            rule: selection.rule,
            fallbacks_tried,
            ..Default::default()
        };
        Ok(ctx.failed_output(errors, metadata))
    }

    /// Explicit tool, or the planner's choice plus fallbacks.
    fn select(
        &self,
        payload: &Value,
        tool_name: Option<String>,
        tool_options: Value,
        config: &OrchestrationConfig,
        ctx: &mut RunContext<'_>,
    ) -> Result<Selection, OrchestratorError> {
        if let Some(name) = tool_name {
            self.registry.get(&name)?;
            return Ok(Selection {
                candidates: vec![name],
                options: tool_options,
                rule: None,
            });
        }

        ctx.advance(RunPhase::Planning);
        let catalog = self.registry.list();
        let mut plan_request = PlanRequest::new(payload.clone()).with_budget(config.budget);
        if let Some(reliability) = &self.reliability {
            for meta in &catalog {
                plan_request = plan_request
                    .with_circuit_state(&meta.name, reliability.circuit_state(meta.breaker_key()));
            }
        }
        let decision = self.planner.plan(&plan_request.with_catalog(catalog));

        for rejected in decision.rejected() {
            ctx.warn(
                format!("planner skipped '{}': {}", rejected.tool, rejected.reason),
                json!({"tool": rejected.tool, "rule": rejected.rule, "reason": rejected.reason}),
            );
        }

        match decision {
            PlanDecision::Selected {
                tool,
                options,
                fallbacks,
                rule,
                ..
            } => {
                info!(trace_id = %ctx.trace_id, tool = %tool, rule = ?rule, "Planner selected tool");
                let mut candidates = vec![tool];
                candidates.extend(fallbacks);
                Ok(Selection {
                    candidates,
                    // caller-supplied options win over the rule's
                    options: if tool_options.is_null() { options } else { tool_options },
                    rule,
                })
            }
            PlanDecision::NoViableTool { reason, .. } => {
                Err(OrchestratorError::NoViableTool { reason })
            }
        }
    }

    /// Effective bundle options for this run
    fn bundle_options(
        &self,
        requested: Option<BundleOptions>,
        config: &OrchestrationConfig,
        request_id: &str,
    ) -> BundleOptions {
        let mut options = requested.unwrap_or_else(|| self.settings.default_bundle.clone());
        if options.max_parallel.is_none() {
            options.max_parallel = config.max_parallel;
        }
        if options.task_id.is_none() {
            options.task_id = Some(request_id.to_string());
        }
        if self.settings.budget_enforcement == BudgetEnforcement::Preemptive
            && options.global_budget.is_none()
        {
            options.global_budget = config.budget;
        }
        options
    }

    /// One tool, through the reliability layer when there is one.
    #[allow(clippy::too_many_arguments)]
    async fn invoke(
        &self,
        tool: &Arc<dyn Tool>,
        meta: &ToolMetadata,
        payload: &Value,
        tool_options: &Value,
        bundle_options: &BundleOptions,
        ctx: &RunContext<'_>,
        events: &EventEmitter,
    ) -> RetryOutcome<Produced> {
        let deadline = ctx.deadline;
        let cancel = ctx.cancel;
        let run_once = |attempt: u32| {
            let tool = Arc::clone(tool);
            async move {
                if attempt > 1 {
                    debug!(tool = tool.name(), attempt, "Retrying tool");
                }
                if tool.supports_bundle() {
                    let call = BundleCall::new(payload.clone(), bundle_options.clone())
                        .with_tool_options(tool_options.clone())
                        .with_deadline(deadline);
                    let bundle = self.engine.execute_bundle(tool, call, events, cancel).await?;
                    let content = serde_json::to_value(&bundle).map_err(|e| {
                        ToolError::other(format!("failed to serialize evidence bundle: {}", e))
                    })?;
                    Ok(Produced {
                        content,
                        usage: bundle.total_usage(),
                        bundle: Some(BundleDigest::from(&bundle)),
                    })
                } else {
                    let call = async {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Err(ToolError::cancelled(tool.name())),
                            result = tool.execute(payload, tool_options, events) => result,
                        }
                    };
                    let response = within(deadline, call)
                        .await
                        .unwrap_or_else(|| Err(ToolError::timeout(tool.name())))?;
                    Ok(Produced {
                        content: response.content,
                        usage: response.usage,
                        bundle: None,
                    })
                }
            }
        };

        let Some(reliability) = &self.reliability else {
            return RetryOutcome {
                result: run_once(1).await,
                attempts: 1,
                delays: Vec::new(),
                classification: None,
            };
        };

        // the deadline also bounds backoff sleeps between attempts
        let guarded = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = reliability.call(meta.breaker_key(), run_once) => Some(outcome),
            }
        };
        match within(deadline, guarded).await {
            Some(Some(outcome)) => outcome,
            Some(None) => RetryOutcome {
                result: Err(ToolError::cancelled(&meta.name)),
                attempts: 1,
                delays: Vec::new(),
                classification: None,
            },
            None => RetryOutcome {
                result: Err(ToolError::timeout(format!("run deadline for '{}'", meta.name))),
                attempts: 1,
                delays: Vec::new(),
                classification: None,
            },
        }
    }

    /// Post-hoc budget check and output assembly for a successful call.
    fn finish(
        &self,
        produced: Produced,
        metadata: OutputMetadata,
        mut errors: BTreeMap<String, ToolErrorReport>,
        config: &OrchestrationConfig,
        ctx: &mut RunContext<'_>,
    ) -> Result<OrchestrationOutput, OrchestratorError> {
        if produced.bundle.is_some() {
            ctx.advance(RunPhase::Aggregating);
        }
        let elapsed_ms = ctx.elapsed_ms();
        let mut usage = produced.usage;
        usage.time_ms = elapsed_ms;

        let tool = metadata.tool.clone().unwrap_or_default();
        let mut status = RunStatus::Completed;
        if let Some(budget) = &config.budget
            && let Err(violation) = budget.check(&usage)
        {
            if self.settings.strict_budget {
                return Err(OrchestratorError::BudgetExceeded(violation));
            }
            warn!(trace_id = %ctx.trace_id, tool = %tool, "{}", violation);
            let report = ToolErrorReport {
                error_type: "budget_exceeded".to_string(),
                message: violation.to_string(),
                is_retryable: false,
                code: ErrorCode::BudgetExceeded,
                details: None,
            }
            .with_details(json!({
                "resource": violation.resource,
                "limit": violation.limit,
                "actual": violation.actual,
            }));
            ctx.events.for_tool(&tool).emit(EventKind::Error, json!(report));
            errors.insert(tool, report);
            status = RunStatus::Failed;
        }

        ctx.advance(match status {
            RunStatus::Completed => RunPhase::Completed,
            RunStatus::Failed => RunPhase::Failed,
        });
        Ok(OrchestrationOutput {
            content: produced.content,
            usage,
            metadata: OutputMetadata {
                warnings: std::mem::take(&mut ctx.warnings),
                ..metadata
            },
            trace_id: ctx.trace_id.clone(),
            request_id: ctx.request_id.clone(),
            elapsed_ms,
            status,
            errors,
        })
    }

    fn circuit_snapshot(&self) -> BTreeMap<String, orchestra_domain::CircuitState> {
        self.reliability
            .as_ref()
            .map(|r| r.circuit_snapshot())
            .unwrap_or_default()
    }
}

/// Validate a caller id or generate a fresh one.
fn resolve_id(label: &str, supplied: Option<&str>) -> Result<String, OrchestratorError> {
    match supplied {
        Some(id) => {
            validate_id(label, id).map_err(OrchestratorError::InvalidRequest)?;
            Ok(id.to_string())
        }
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

fn conflict_errors(message: String) -> BTreeMap<String, ToolErrorReport> {
    BTreeMap::from([(
        IDEMPOTENCY_ERROR_KEY.to_string(),
        ToolErrorReport {
            error_type: "conflict".to_string(),
            message,
            is_retryable: false,
            code: ErrorCode::Conflict,
            details: None,
        },
    )])
}

async fn within<F: std::future::Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::event_sink::CollectingEventSink;
    use crate::ports::tool::{BundleTool, ReplicaContext, ToolResponse};
    use crate::reliability::ReliabilityConfig;
    use async_trait::async_trait;
    use orchestra_domain::{
        Budget, CircuitBreakerConfig, CircuitState, EvidenceBundle, Generation, PlanRule,
        RetryPolicy, RuleAction, RuleCondition,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Script = fn(usize) -> Result<ToolResponse, ToolError>;

    /// Single-shot tool driven by a call-number script
    struct Scripted {
        name: &'static str,
        script: Script,
        delay: Duration,
        /// Call number that never returns
        stall_on: Option<usize>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                delay: Duration::ZERO,
                stall_on: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn stalling(name: &'static str, script: Script, stall_on: usize) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                delay: Duration::ZERO,
                stall_on: Some(stall_on),
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: |_| Ok(ToolResponse::new(json!("late"))),
                delay,
                stall_on: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Tool for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn description(&self) -> &str {
            "scripted tool"
        }
        async fn execute(
            &self,
            request: &Value,
            _options: &Value,
            _events: &EventEmitter,
        ) -> Result<ToolResponse, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall_on == Some(n) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.script)(n).map(|r| {
                if r.content == json!("echo") {
                    ToolResponse::new(request.clone()).with_usage(r.usage)
                } else {
                    r
                }
            })
        }
    }

    /// Bundle tool whose replica `i` returns `{"value": f(i)}`
    struct Replicas {
        value: fn(usize) -> i64,
        tokens: u64,
    }

    #[async_trait]
    impl Tool for Replicas {
        fn name(&self) -> &str {
            "replicas"
        }
        fn version(&self) -> &str {
            "2.0.0"
        }
        fn description(&self) -> &str {
            "bundle tool"
        }
        fn as_bundle(&self) -> Option<&dyn BundleTool> {
            Some(self)
        }
    }

    #[async_trait]
    impl BundleTool for Replicas {
        async fn generate(
            &self,
            _request: &Value,
            replica: &ReplicaContext,
        ) -> Result<Generation, ToolError> {
            tokio::time::sleep(Duration::from_millis(10 * (replica.index as u64 + 1))).await;
            Ok(Generation::new(json!({"value": (self.value)(replica.index)}))
                .with_usage(Usage::tokens(self.tokens)))
        }
    }

    fn echo() -> Arc<Scripted> {
        Scripted::new("echo", |_| {
            Ok(ToolResponse::new(json!("echo")).with_usage(Usage::tokens(3)))
        })
    }

    fn unavailable() -> Arc<Scripted> {
        Scripted::new("flaky", |_| Err(ToolError::backend("503 service unavailable")))
    }

    fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        for tool in tools {
            registry.register(tool).unwrap();
        }
        registry
    }

    fn reliability(max_attempts: u32, failure_threshold: u32) -> Arc<ReliabilityManager> {
        Arc::new(ReliabilityManager::from_config(
            &ReliabilityConfig::default()
                .with_retry(
                    RetryPolicy::default()
                        .with_max_attempts(max_attempts)
                        .with_initial_delay(Duration::from_millis(50))
                        .with_jitter(0.0),
                )
                .with_circuit_breaker(
                    CircuitBreakerConfig::default()
                        .with_failure_threshold(failure_threshold)
                        .with_timeout(Duration::from_secs(30))
                        .with_success_threshold(1),
                ),
        ))
    }

    fn with_fallback_rule() -> Planner {
        Planner::new(vec![PlanRule::new(
            "everything",
            RuleCondition::Always,
            RuleAction::new("flaky").with_fallbacks(&["echo"]),
        )])
    }

    #[tokio::test]
    async fn test_explicit_tool_runs() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator =
            Orchestrator::new(registry(vec![echo()])).with_event_sink(sink.clone());
        let output = orchestrator
            .run(OrchestrationRequest::new(json!({"text": "hi"})).with_tool("echo"))
            .await
            .unwrap();

        assert!(output.is_completed());
        assert_eq!(output.content, json!({"text": "hi"}));
        assert_eq!(output.usage.tokens, 3);
        assert_eq!(output.metadata.tool.as_deref(), Some("echo"));
        assert_eq!(output.metadata.tool_version.as_deref(), Some("1.0.0"));
        assert_eq!(output.metadata.retry_count, 0);
        assert!(output.errors.is_empty());
        assert!(!output.trace_id.is_empty());
        assert_eq!(
            sink.kinds(),
            vec![EventKind::RunStarted, EventKind::ToolStarted, EventKind::RunCompleted]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error() {
        let orchestrator = Orchestrator::new(registry(vec![echo()]));
        let err = orchestrator
            .run(OrchestrationRequest::new(json!({})).with_tool("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::NotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_supplied_ids_are_kept_and_validated() {
        let orchestrator = Orchestrator::new(registry(vec![echo()]));
        let config = OrchestrationConfig::default()
            .with_trace_id("trace-7")
            .with_request_id("req-7");
        let output = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("echo")
                    .with_config(config),
            )
            .await
            .unwrap();
        assert_eq!(output.trace_id, "trace-7");
        assert_eq!(output.request_id, "req-7");

        let err = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("echo")
                    .with_config(OrchestrationConfig::default().with_trace_id("bad id")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_invalid_bundle_options_rejected() {
        let orchestrator = Orchestrator::new(registry(vec![echo()]));
        let err = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("echo")
                    .with_bundle_options(BundleOptions::default().with_k(0)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_no_rules_means_no_viable_tool() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator =
            Orchestrator::new(registry(vec![echo()])).with_event_sink(sink.clone());
        let err = orchestrator
            .run(OrchestrationRequest::new(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoViableTool { .. }));
        assert_eq!(err.code(), ErrorCode::AgentFailed);
        assert_eq!(sink.count(EventKind::RunCompleted), 1);
    }

    #[tokio::test]
    async fn test_planner_options_used_unless_request_overrides() {
        let orchestrator = Orchestrator::new(registry(vec![echo()])).with_planner(Planner::new(
            vec![PlanRule::new(
                "summaries",
                RuleCondition::RequestType {
                    value: "summary".into(),
                },
                RuleAction::new("echo").with_options(json!({"style": "short"})),
            )],
        ));
        let output = orchestrator
            .run(OrchestrationRequest::new(json!({"type": "summary"})))
            .await
            .unwrap();
        assert_eq!(output.metadata.rule.as_deref(), Some("summaries"));
        assert_eq!(output.metadata.tool.as_deref(), Some("echo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundle_with_disagreeing_replicas() {
        let sink = Arc::new(CollectingEventSink::new());
        let tool: Arc<dyn Tool> = Arc::new(Replicas { value: |i| i as i64, tokens: 10 });
        let orchestrator = Orchestrator::new(registry(vec![tool])).with_event_sink(sink.clone());
        let output = orchestrator
            .run(
                OrchestrationRequest::new(json!({"prompt": "count"}))
                    .with_tool("replicas")
                    .with_bundle_options(BundleOptions::default().with_k(3).with_epsilon(Some(0.0))),
            )
            .await
            .unwrap();

        assert!(output.is_completed());
        let bundle: EvidenceBundle = serde_json::from_value(output.content.clone()).unwrap();
        assert_eq!(bundle.replicates.len(), 3);
        assert!(bundle.summary.consensus.is_empty());
        assert_eq!(
            bundle.summary.disagreements[0].values,
            vec![json!(0), json!(1), json!(2)]
        );
        assert_eq!(output.usage.tokens, 30);

        let digest = output.metadata.bundle.unwrap();
        assert_eq!(digest.valid, 3);
        assert!(!digest.early_stopped);
        assert_eq!(sink.count(EventKind::BundleReady), 1);
        assert_eq!(sink.count(EventKind::PartialSummary), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundle_consensus_stops_early() {
        let tool: Arc<dyn Tool> = Arc::new(Replicas { value: |_| 7, tokens: 10 });
        let orchestrator = Orchestrator::new(registry(vec![tool]));
        let output = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("replicas")
                    .with_bundle_options(BundleOptions::default().with_k(3).with_epsilon(Some(0.1))),
            )
            .await
            .unwrap();

        let digest = output.metadata.bundle.clone().unwrap();
        assert!(digest.early_stopped);
        assert_eq!(digest.launched, 2);
        assert_eq!(digest.confidence, 1.0);
        assert_eq!(output.content["summary"]["consensus"]["value"], json!(7));
        // task id defaults to the request id
        assert_eq!(digest.task_id, output.request_id);
    }

    #[tokio::test]
    async fn test_budget_overrun_is_reported_in_output() {
        let costly = Scripted::new("costly", |_| {
            Ok(ToolResponse::new(json!({"answer": 42})).with_usage(Usage::tokens(150)))
        });
        let orchestrator = Orchestrator::new(registry(vec![costly]));
        let output = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("costly")
                    .with_config(OrchestrationConfig::default().with_budget(Budget::tokens(100))),
            )
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(output.content, json!({"answer": 42}));
        let report = &output.errors["costly"];
        assert_eq!(report.code, ErrorCode::BudgetExceeded);
        assert!(report.message.contains("limit=100"));
        assert!(report.message.contains("actual=150"));
        assert_eq!(report.details.as_ref().unwrap()["limit"], json!(100.0));
    }

    #[tokio::test]
    async fn test_strict_budget_overrun_is_an_error() {
        let costly = Scripted::new("costly", |_| {
            Ok(ToolResponse::new(json!(1)).with_usage(Usage::tokens(150)))
        });
        let orchestrator = Orchestrator::new(registry(vec![costly]))
            .with_settings(OrchestratorSettings::default().with_strict_budget(true));
        let err = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("costly")
                    .with_config(OrchestrationConfig::default().with_budget(Budget::tokens(100))),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::BudgetExceeded);
        let message = err.to_string();
        assert!(message.contains("limit=100"));
        assert!(message.contains("actual=150"));
    }

    #[tokio::test]
    async fn test_idempotent_replay_skips_tool() {
        let tool = echo();
        let orchestrator = Orchestrator::reliable(registry(vec![tool.clone()]), reliability(1, 5));
        let request = || {
            OrchestrationRequest::new(json!({"q": 1}))
                .with_tool("echo")
                .with_config(OrchestrationConfig::default().with_idempotency_key("order-1"))
        };

        let first = orchestrator.run(request()).await.unwrap();
        let second = orchestrator.run(request()).await.unwrap();

        assert_eq!(tool.calls(), 1);
        assert!(!first.metadata.idempotent_replay);
        assert!(second.metadata.idempotent_replay);
        assert_eq!(second.content, first.content);
        assert_eq!(second.trace_id, first.trace_id);
    }

    #[tokio::test]
    async fn test_idempotency_conflict() {
        let orchestrator = Orchestrator::reliable(registry(vec![echo()]), reliability(1, 5));
        let config = OrchestrationConfig::default().with_idempotency_key("order-1");
        orchestrator
            .run(
                OrchestrationRequest::new(json!({"q": 1}))
                    .with_tool("echo")
                    .with_config(config.clone()),
            )
            .await
            .unwrap();

        let err = orchestrator
            .run(
                OrchestrationRequest::new(json!({"q": 2}))
                    .with_tool("echo")
                    .with_config(config.clone()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::Conflict { key: "order-1".into() });
        assert_eq!(err.code(), ErrorCode::Conflict);

        let lenient = Orchestrator::reliable(registry(vec![echo()]), reliability(1, 5))
            .with_settings(OrchestratorSettings::default().with_strict_conflict(false));
        for q in [1, 2] {
            let output = lenient
                .run(
                    OrchestrationRequest::new(json!({"q": q}))
                        .with_tool("echo")
                        .with_config(config.clone()),
                )
                .await
                .unwrap();
            if q == 2 {
                assert_eq!(output.status, RunStatus::Failed);
                assert_eq!(output.errors[IDEMPOTENCY_ERROR_KEY].code, ErrorCode::Conflict);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_run_does_not_poison_key() {
        let orchestrator =
            Orchestrator::reliable(registry(vec![unavailable(), echo()]), reliability(1, 5));
        let config = OrchestrationConfig::default().with_idempotency_key("k");
        let failed = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("flaky")
                    .with_config(config.clone()),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, RunStatus::Failed);

        let retried = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("flaky")
                    .with_config(config),
            )
            .await
            .unwrap();
        assert!(!retried.metadata.idempotent_replay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let tool = Scripted::new("bumpy", |n| {
            if n < 2 {
                Err(ToolError::backend("429 rate limit exceeded"))
            } else {
                Ok(ToolResponse::new(json!("ok")))
            }
        });
        let orchestrator = Orchestrator::reliable(registry(vec![tool.clone()]), reliability(3, 5));
        let output = orchestrator
            .run(OrchestrationRequest::new(json!({})).with_tool("bumpy"))
            .await
            .unwrap();

        assert!(output.is_completed());
        assert_eq!(tool.calls(), 3);
        assert_eq!(output.metadata.retry_count, 2);
        assert_eq!(output.metadata.circuit_states["bumpy"], CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_variant_makes_single_attempt() {
        let tool = unavailable();
        let orchestrator = Orchestrator::new(registry(vec![tool.clone()]));
        let output = orchestrator
            .run(OrchestrationRequest::new(json!({})).with_tool("flaky"))
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(tool.calls(), 1);
        assert_eq!(output.content, Value::Null);
        assert!(output.metadata.circuit_states.is_empty());
        let report = &output.errors["flaky"];
        assert_eq!(report.code, ErrorCode::AgentFailed);
        assert!(report.is_retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_failure() {
        let flaky = unavailable();
        let orchestrator = Orchestrator::new(registry(vec![flaky.clone(), echo()]))
            .with_planner(with_fallback_rule());
        let output = orchestrator
            .run(OrchestrationRequest::new(json!({"n": 1})))
            .await
            .unwrap();

        assert!(output.is_completed());
        assert_eq!(output.metadata.tool.as_deref(), Some("echo"));
        assert_eq!(output.metadata.fallbacks_tried, vec!["flaky".to_string()]);
        assert_eq!(output.metadata.rule.as_deref(), Some("everything"));
        // a recovered failure is still reported
        assert!(output.errors.contains_key("flaky"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_excludes_tool_until_half_open() {
        let flaky = unavailable();
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator =
            Orchestrator::reliable(registry(vec![flaky.clone(), echo()]), reliability(1, 2))
                .with_planner(with_fallback_rule())
                .with_event_sink(sink.clone());
        let run = || orchestrator.run(OrchestrationRequest::new(json!({})));

        run().await.unwrap();
        let second = run().await.unwrap();
        assert_eq!(flaky.calls(), 2);
        assert_eq!(second.metadata.circuit_states["flaky"], CircuitState::Open);

        let third = run().await.unwrap();
        assert_eq!(flaky.calls(), 2);
        assert_eq!(third.metadata.tool.as_deref(), Some("echo"));
        assert!(third.metadata.fallbacks_tried.is_empty());
        assert_eq!(third.metadata.warnings.len(), 1);
        assert!(third.metadata.warnings[0].contains("circuit open"));

        tokio::time::advance(Duration::from_secs(31)).await;
        let reliability = orchestrator.reliability().unwrap();
        assert_eq!(reliability.circuit_state("flaky"), CircuitState::HalfOpen);

        run().await.unwrap();
        assert_eq!(flaky.calls(), 3);
        assert_eq!(reliability.circuit_state("flaky"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_yields_failed_output() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator =
            Orchestrator::new(registry(vec![Scripted::slow("slow", Duration::from_secs(5))]))
                .with_event_sink(sink.clone());
        let output = orchestrator
            .run(
                OrchestrationRequest::new(json!({}))
                    .with_tool("slow")
                    .with_config(OrchestrationConfig::default().with_timeout_ms(100)),
            )
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(output.errors["slow"].code, ErrorCode::Timeout);
        assert_eq!(sink.count(EventKind::Timeout), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_run() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = Orchestrator::reliable(
            registry(vec![Scripted::slow("slow", Duration::from_secs(5))]),
            reliability(3, 5),
        )
        .with_event_sink(sink.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let output = orchestrator
            .run_with_cancel(OrchestrationRequest::new(json!({})).with_tool("slow"), &cancel)
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(output.errors["slow"].error_type, "cancelled");
        assert_eq!(sink.count(EventKind::Cancelled), 1);
    }

    #[tokio::test]
    async fn test_base_orchestrator_ignores_idempotency_key_with_warning() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator =
            Orchestrator::new(registry(vec![echo()])).with_event_sink(sink.clone());
        let request = OrchestrationRequest::new(json!({}))
            .with_tool("echo")
            .with_config(OrchestrationConfig::default().with_idempotency_key("k"));
        let output = orchestrator.run(request).await.unwrap();
        assert!(output.is_completed());
        assert_eq!(output.metadata.warnings.len(), 1);
        assert_eq!(sink.count(EventKind::Warning), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orchestrator = Orchestrator::new(registry(vec![echo()]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator
            .run_with_cancel(OrchestrationRequest::new(json!({})).with_tool("echo"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    fn costly_bundle_request() -> OrchestrationRequest {
        OrchestrationRequest::new(json!({}))
            .with_tool("replicas")
            .with_bundle_options(BundleOptions::default().with_k(3).with_epsilon(None))
            .with_config(OrchestrationConfig::default().with_budget(Budget::tokens(100)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundle_budget_counts_every_replica() {
        let tool: Arc<dyn Tool> = Arc::new(Replicas { value: |_| 1, tokens: 50 });
        let orchestrator = Orchestrator::new(registry(vec![tool]));
        let output = orchestrator.run(costly_bundle_request()).await.unwrap();

        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(output.usage.tokens, 150);
        assert_eq!(output.metadata.bundle.as_ref().unwrap().completed, 3);
        let report = &output.errors["replicas"];
        assert_eq!(report.code, ErrorCode::BudgetExceeded);
        assert!(report.message.contains("limit=100"));
        assert!(report.message.contains("actual=150"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_bundle_budget_overrun_is_an_error() {
        let tool: Arc<dyn Tool> = Arc::new(Replicas { value: |_| 1, tokens: 50 });
        let orchestrator = Orchestrator::new(registry(vec![tool]))
            .with_settings(OrchestratorSettings::default().with_strict_budget(true));
        let err = orchestrator.run(costly_bundle_request()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::BudgetExceeded);
        assert!(err.to_string().contains("actual=150"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_frees_idempotency_key() {
        let slow = Scripted::slow("slow", Duration::from_secs(5));
        let orchestrator = Orchestrator::reliable(registry(vec![slow.clone()]), reliability(1, 5));
        let request = || {
            OrchestrationRequest::new(json!({}))
                .with_tool("slow")
                .with_config(OrchestrationConfig::default().with_idempotency_key("k1"))
        };

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), orchestrator.run(request())).await;
        assert!(abandoned.is_err());

        let retried = orchestrator.run(request()).await.unwrap();
        assert!(retried.is_completed());
        assert!(!retried.metadata.idempotent_replay);
        assert_eq!(slow.calls(), 2);

        let replayed = orchestrator.run(request()).await.unwrap();
        assert!(replayed.metadata.idempotent_replay);
        assert_eq!(slow.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_probe_does_not_jam_breaker() {
        let phased = Scripted::stalling(
            "phased",
            |n| match n {
                0 => Err(ToolError::backend("503 service unavailable")),
                _ => Ok(ToolResponse::new(json!("ok"))),
            },
            1,
        );
        let orchestrator = Orchestrator::reliable(registry(vec![phased.clone()]), reliability(1, 1));
        let request = || OrchestrationRequest::new(json!({})).with_tool("phased");

        let opened = orchestrator.run(request()).await.unwrap();
        assert_eq!(opened.status, RunStatus::Failed);
        tokio::time::advance(Duration::from_secs(31)).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let probe = orchestrator.run_with_cancel(request(), &cancel).await.unwrap();
        assert_eq!(probe.errors["phased"].error_type, "cancelled");

        let recovered = orchestrator.run(request()).await.unwrap();
        assert!(recovered.is_completed());
        assert_eq!(phased.calls(), 3);
        let reliability = orchestrator.reliability().unwrap();
        assert_eq!(reliability.circuit_state("phased"), CircuitState::Closed);
    }
}
