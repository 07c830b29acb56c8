//! Bundle Execution Engine
//!
//! Runs K replicas of a bundle-capable tool and reduces them into an
//! [`EvidenceBundle`].
//!
//! ```text
//!  BundleOptions ──▶ seeds[0..k], semaphore(max_parallel), child token
//!
//!  early stop enabled (epsilon set, k > 2):
//!     wave 1: replicas 0,1 ──▶ partial_summary ──▶ distance ≤ ε ? stop
//!     wave 2: replicas 2..k                                   : continue
//!
//!  otherwise:
//!     single wave: replicas 0..k ──▶ partial_summary after the 2nd completion
//!
//!  replicas (index order) ──▶ summarize() ──▶ bundle_ready
//! ```
//!
//! A replica never aborts the bundle. Failures, timeouts, cancellations,
//! schema violations and budget overruns are recorded as invalid replicates;
//! the bundle fails only when no valid replicate remains.

use crate::config::BudgetEnforcement;
use crate::ports::event_sink::EventEmitter;
use crate::ports::schema_validator::SchemaValidator;
use crate::ports::tool::{ReplicaContext, Tool};
use crate::schemas::SchemaRegistry;
use orchestra_domain::{
    Budget, BundleDigest, BundleMeta, BundleOptions, DistanceConfig, EventKind, EvidenceBundle,
    QualityFlag, Replicate, ReplicateQuality, ToolError, ToolErrorKind, Usage,
    bundle::{replicate_distance, summarize},
};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inputs of one bundle execution
#[derive(Debug, Clone)]
pub struct BundleCall {
    pub request: Value,
    pub tool_options: Value,
    pub options: BundleOptions,
    /// Hard stop for every replica (the run's timeout)
    pub deadline: Option<Instant>,
}

impl BundleCall {
    pub fn new(request: Value, options: BundleOptions) -> Self {
        Self {
            request,
            tool_options: Value::Null,
            options,
            deadline: None,
        }
    }

    pub fn with_tool_options(mut self, tool_options: Value) -> Self {
        self.tool_options = tool_options;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

pub struct BundleEngine {
    validator: Arc<dyn SchemaValidator>,
    enforcement: BudgetEnforcement,
}

impl Default for BundleEngine {
    fn default() -> Self {
        Self::new(Arc::new(SchemaRegistry::new()))
    }
}

impl BundleEngine {
    pub fn new(validator: Arc<dyn SchemaValidator>) -> Self {
        Self {
            validator,
            enforcement: BudgetEnforcement::default(),
        }
    }

    pub fn with_enforcement(mut self, enforcement: BudgetEnforcement) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub fn enforcement(&self) -> BudgetEnforcement {
        self.enforcement
    }

    /// Run the replicas of `tool` and aggregate them.
    ///
    /// `events` should already be attributed to the tool. Cancelling `cancel`
    /// stops in-flight replicas cooperatively; they are recorded as cancelled.
    pub async fn execute_bundle(
        &self,
        tool: Arc<dyn Tool>,
        call: BundleCall,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<EvidenceBundle, ToolError> {
        let BundleCall {
            request,
            tool_options,
            options,
            deadline,
        } = call;

        options.validate().map_err(ToolError::invalid_input)?;
        let Some(bundle_tool) = tool.as_bundle() else {
            return Err(ToolError::unsupported(format!(
                "tool '{}' does not support bundles",
                tool.name()
            )));
        };
        let model = bundle_tool.model().map(str::to_string);

        let k = options.k;
        let seeds = options.effective_seeds();
        let started = Instant::now();
        let global_budget = options.global_budget;
        let replica_budget = match (options.replica_budget, self.enforcement) {
            (Some(budget), _) => Some(budget),
            (None, BudgetEnforcement::Preemptive) => global_budget.map(|b| b.divide(k)),
            (None, BudgetEnforcement::PostHoc) => None,
        };
        let deadline = earliest(
            deadline,
            global_budget
                .and_then(|b| b.time_ms)
                .map(|ms| started + Duration::from_millis(ms)),
        );

        info!(
            "Bundle '{}': k={}, max_parallel={}, epsilon={:?}",
            tool.name(),
            k,
            options.effective_parallelism(),
            options.epsilon
        );

        let bundle_cancel = cancel.child_token();
        let _stop_stragglers = bundle_cancel.clone().drop_guard();

        let shared = Arc::new(SharedRun {
            tool: Arc::clone(&tool),
            request,
            tool_options,
            replica_budget,
            global_budget,
            spent: Mutex::new(Usage::default()),
            semaphore: Semaphore::new(options.effective_parallelism()),
            validator: Arc::clone(&self.validator),
            schema_uri: options.schema_uri.clone(),
            deadline,
            cancel: bundle_cancel.clone(),
            events: events.clone(),
        });

        let threshold = options.early_stop_threshold();
        let mut collector = Collector::new(k, options.distance.clone(), threshold, events.clone());

        let first_wave: Vec<usize> = match threshold {
            Some(_) => vec![0, 1],
            None => (0..k).collect(),
        };
        run_wave(&shared, &seeds, &first_wave, &mut collector).await;

        let mut early_stopped = false;
        if let Some(epsilon) = threshold {
            match collector.provisional_distance(0, 1) {
                Some(distance) if distance <= epsilon => {
                    info!(
                        "Bundle '{}': early stop, distance {:.3} <= epsilon {}",
                        tool.name(),
                        distance,
                        epsilon
                    );
                    early_stopped = true;
                }
                _ => {
                    let second_wave: Vec<usize> = (2..k).collect();
                    run_wave(&shared, &seeds, &second_wave, &mut collector).await;
                }
            }
        }

        let outcomes = collector.into_outcomes();
        let launched = outcomes.iter().filter(|o| o.launched).count();
        let replicates: Vec<Replicate> = outcomes.into_iter().map(|o| o.replicate).collect();

        if !replicates.iter().any(Replicate::is_valid) {
            let error = no_valid_error(&replicates, cancel);
            warn!("Bundle '{}' failed: {}", tool.name(), error);
            return Err(error);
        }

        let summary = summarize(&replicates, &options.distance);
        let bundle = EvidenceBundle {
            meta: BundleMeta {
                task_id: options
                    .task_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                k,
                model,
                seeds,
                early_stopped,
                launched,
                completed: replicates.len(),
            },
            replicates,
            summary,
        };

        info!(
            "Bundle '{}' ready: {}/{} valid, confidence {:.3}",
            tool.name(),
            bundle.valid_count(),
            bundle.replicates.len(),
            bundle.summary.confidence
        );
        events.emit(
            EventKind::BundleReady,
            json!({
                "bundle": BundleDigest::from(&bundle),
                "consensus": bundle.summary.consensus,
                "disagreements": bundle.summary.disagreements.len(),
            }),
        );
        Ok(bundle)
    }
}

/// Error for a bundle that produced nothing usable
fn no_valid_error(replicates: &[Replicate], cancel: &CancellationToken) -> ToolError {
    let all_flagged =
        |flag: QualityFlag| !replicates.is_empty() && replicates.iter().all(|r| r.quality.has_flag(flag));

    if cancel.is_cancelled() {
        return ToolError::cancelled("bundle");
    }
    if all_flagged(QualityFlag::Timeout) {
        return ToolError::timeout(format!("all {} replicas", replicates.len()));
    }
    if all_flagged(QualityFlag::BudgetExceeded) {
        return ToolError::budget_exceeded("every replica exceeded its budget");
    }
    let first_error = replicates
        .iter()
        .find_map(|r| r.quality.errors.first())
        .map(String::as_str)
        .unwrap_or("no output");
    ToolError::new(
        ToolErrorKind::NoValidReplicates,
        format!(
            "no valid replicates out of {}: {}",
            replicates.len(),
            first_error
        ),
    )
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Await `fut`, giving up at `deadline`.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn lock(usage: &Mutex<Usage>) -> MutexGuard<'_, Usage> {
    usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State every replica task of one bundle reads
struct SharedRun {
    tool: Arc<dyn Tool>,
    request: Value,
    tool_options: Value,
    replica_budget: Option<Budget>,
    global_budget: Option<Budget>,
    /// Usage of every finished replica
    spent: Mutex<Usage>,
    semaphore: Semaphore,
    validator: Arc<dyn SchemaValidator>,
    schema_uri: Option<String>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    events: EventEmitter,
}

struct ReplicaOutcome {
    replicate: Replicate,
    /// The generation step was actually invoked
    launched: bool,
}

async fn run_wave(
    shared: &Arc<SharedRun>,
    seeds: &[u64],
    indices: &[usize],
    collector: &mut Collector,
) {
    let mut join_set = JoinSet::new();
    for &index in indices {
        let shared = Arc::clone(shared);
        let seed = seeds.get(index).copied().unwrap_or(index as u64);
        join_set.spawn(async move { (index, run_replica(shared, index, seed).await) });
    }

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((index, outcome)) => collector.record(index, outcome),
            Err(e) => warn!("Replica task failed: {}", e),
        }
    }

    for &index in indices {
        if !collector.has(index) {
            let seed = seeds.get(index).copied().unwrap_or(index as u64);
            collector.record(
                index,
                ReplicaOutcome {
                    replicate: Replicate {
                        id: index,
                        seed,
                        data: Value::Null,
                        quality: ReplicateQuality::invalid(
                            QualityFlag::Failed,
                            "replica task terminated abnormally",
                        ),
                        usage: Usage::default(),
                        elapsed_ms: 0,
                    },
                    launched: true,
                },
            );
        }
    }
}

async fn run_replica(shared: Arc<SharedRun>, index: usize, seed: u64) -> ReplicaOutcome {
    let unlaunched = |flag: QualityFlag, reason: &str| {
        debug!(replica = index, flag = %flag, "Replica not launched: {}", reason);
        let kind = match flag {
            QualityFlag::Timeout => Some(EventKind::Timeout),
            QualityFlag::Cancelled => Some(EventKind::Cancelled),
            _ => None,
        };
        if let Some(kind) = kind {
            shared
                .events
                .emit(kind, json!({"replicate_id": index, "launched": false}));
        }
        ReplicaOutcome {
            replicate: Replicate {
                id: index,
                seed,
                data: Value::Null,
                quality: ReplicateQuality::invalid(flag, reason),
                usage: Usage::default(),
                elapsed_ms: 0,
            },
            launched: false,
        }
    };

    let acquired = within(shared.deadline, async {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => None,
            permit = shared.semaphore.acquire() => permit.ok(),
        }
    })
    .await;
    let _permit = match acquired {
        None => return unlaunched(QualityFlag::Timeout, "deadline passed before launch"),
        Some(None) => return unlaunched(QualityFlag::Cancelled, "cancelled before launch"),
        Some(Some(permit)) => permit,
    };

    if let Some(budget) = &shared.global_budget {
        let spent = *lock(&shared.spent);
        if budget.is_exhausted_by(&spent) {
            return unlaunched(QualityFlag::BudgetExceeded, "global budget exhausted");
        }
    }

    shared.events.emit(
        EventKind::ReplicateStarted,
        json!({"replicate_id": index, "seed": seed}),
    );
    let started = Instant::now();
    let replica_deadline = earliest(
        shared.deadline,
        shared
            .replica_budget
            .and_then(|b| b.time_ms)
            .map(|ms| started + Duration::from_millis(ms)),
    );
    let context = ReplicaContext {
        index,
        seed,
        budget: shared.replica_budget,
        options: shared.tool_options.clone(),
        cancel: shared.cancel.clone(),
    };

    let generation = match shared.tool.as_bundle() {
        Some(bundle_tool) => {
            let attempt = async {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => Err(ToolError::cancelled(format!("replica {}", index))),
                    result = bundle_tool.generate(&shared.request, &context) => result,
                }
            };
            within(replica_deadline, attempt)
                .await
                .unwrap_or_else(|| Err(ToolError::timeout(format!("replica {}", index))))
        }
        None => Err(ToolError::unsupported("bundle capability disappeared")),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let (data, usage, quality) = match generation {
        Ok(generation) => {
            let mut usage = generation.usage;
            if usage.time_ms == 0 {
                usage.time_ms = elapsed_ms;
            }
            let quality = assess(&shared, &generation.data, generation.quality, &usage);
            (generation.data, usage, quality)
        }
        Err(error) => {
            let flag = match error.kind {
                ToolErrorKind::Timeout => QualityFlag::Timeout,
                ToolErrorKind::Cancelled => QualityFlag::Cancelled,
                ToolErrorKind::BudgetExceeded => QualityFlag::BudgetExceeded,
                _ => QualityFlag::Failed,
            };
            match flag {
                QualityFlag::Timeout => shared.events.emit(
                    EventKind::Timeout,
                    json!({"replicate_id": index, "elapsed_ms": elapsed_ms}),
                ),
                QualityFlag::Cancelled => shared
                    .events
                    .emit(EventKind::Cancelled, json!({"replicate_id": index})),
                _ => debug!(replica = index, error = %error, "Replica failed"),
            }
            (
                Value::Null,
                Usage::default().with_time_ms(elapsed_ms),
                ReplicateQuality::invalid(flag, error.to_string()),
            )
        }
    };

    lock(&shared.spent).add(&usage);

    shared.events.emit(
        EventKind::ReplicateDone,
        json!({
            "replicate_id": index,
            "valid": quality.valid,
            "flags": quality.flags,
            "elapsed_ms": elapsed_ms,
            "usage": usage,
        }),
    );

    ReplicaOutcome {
        replicate: Replicate {
            id: index,
            seed,
            data,
            quality,
            usage,
            elapsed_ms,
        },
        launched: true,
    }
}

/// Combine the backend verdict with schema and replica budget checks.
fn assess(
    shared: &SharedRun,
    data: &Value,
    backend: Option<ReplicateQuality>,
    usage: &Usage,
) -> ReplicateQuality {
    let mut quality = backend.unwrap_or_default();
    if !quality.valid && quality.flags.is_empty() {
        quality = quality.mark_invalid(QualityFlag::Rejected, "rejected by backend");
    }

    if let Some(uri) = &shared.schema_uri
        && let Err(errors) = shared.validator.validate(uri, data)
    {
        for error in errors {
            quality = quality.mark_invalid(QualityFlag::SchemaInvalid, error);
        }
    }

    if let Some(budget) = &shared.replica_budget
        && let Err(violation) = budget.check(usage)
    {
        quality = quality.mark_invalid(QualityFlag::BudgetExceeded, violation.to_string());
    }

    quality
}

/// Gathers replica outcomes into index slots and emits the partial summary
/// once, after the second completion.
struct Collector {
    slots: Vec<Option<ReplicaOutcome>>,
    completion_order: Vec<usize>,
    distance: DistanceConfig,
    epsilon: Option<f64>,
    events: EventEmitter,
    partial_emitted: bool,
}

impl Collector {
    fn new(k: usize, distance: DistanceConfig, epsilon: Option<f64>, events: EventEmitter) -> Self {
        Self {
            slots: (0..k).map(|_| None).collect(),
            completion_order: Vec::new(),
            distance,
            epsilon,
            events,
            partial_emitted: false,
        }
    }

    fn has(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }

    fn record(&mut self, index: usize, outcome: ReplicaOutcome) {
        let Some(slot) = self.slots.get_mut(index) else {
            warn!("Replica index {} out of range", index);
            return;
        };
        *slot = Some(outcome);
        self.completion_order.push(index);

        if self.completion_order.len() == 2 && !self.partial_emitted {
            self.partial_emitted = true;
            self.emit_partial(self.completion_order[0], self.completion_order[1]);
        }
    }

    fn replicate(&self, index: usize) -> Option<&Replicate> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .map(|o| &o.replicate)
    }

    /// Distance between two recorded replicates, when both are valid.
    fn provisional_distance(&self, a: usize, b: usize) -> Option<f64> {
        let a = self.replicate(a).filter(|r| r.is_valid())?;
        let b = self.replicate(b).filter(|r| r.is_valid())?;
        Some(replicate_distance(&a.data, &b.data, &self.distance))
    }

    fn emit_partial(&self, a: usize, b: usize) {
        let pair: Vec<Replicate> = [a, b]
            .iter()
            .filter_map(|&i| self.replicate(i).cloned())
            .collect();
        let summary = summarize(&pair, &self.distance);
        let distance = self.provisional_distance(a, b);
        debug!(
            "Partial summary over replicas {} and {}: distance {:?}",
            a, b, distance
        );
        self.events.emit(
            EventKind::PartialSummary,
            json!({
                "replicate_ids": [a, b],
                "distance": distance,
                "epsilon": self.epsilon,
                "summary": summary,
            }),
        );
    }

    /// Recorded outcomes in index order
    fn into_outcomes(self) -> Vec<ReplicaOutcome> {
        self.slots.into_iter().flatten().collect()
    }
}
