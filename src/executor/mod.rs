//! Phase executor.
//!
//! Drives a task through its phase plan: one assistant invocation per
//! iteration, transcript/activity/token events streamed out through the
//! attached publisher, per-phase policy enforced inline, retries up to the
//! configured cap, timeouts, human gates, and cancellation that pauses the
//! task instead of failing it.
//!
//! Per-phase state machine:
//!
//! ```text
//! pending ──start──▶ running ──success──▶ completed
//!                       │
//!                       ├─retryable-fail─▶ running (iteration+1), while ≤ cap
//!                       ├─fatal-fail─────▶ failed
//!                       └─cancel─────────▶ failed (error = "cancelled", task → paused)
//! ```
//!
//! All events for one task are emitted serially from its executor loop;
//! cross-task interleaving is bounded by the project concurrency cap.

pub mod assistant;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{OrcConfig, PhaseConfig, PhaseKind};
use crate::cost::CostEntry;
use crate::errors::{ErrorCode, OrcError, OrcResult};
use crate::event::{DecisionResolver, Event, EventPayload, TranscriptKind};
use crate::executor::assistant::{Assistant, AssistantRecord, AssistantRequest, TokenUsage};
use crate::pipeline::Publisher;
use crate::policy::hook::GUARDED_TOOLS;
use crate::policy::{PhasePolicy, check_write};
use crate::session::SessionTracker;
use crate::store::ProjectStore;
use crate::task::{PhaseStatus, Task, TaskStatus};

/// How a human gate was answered.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub approved: bool,
    pub reason: Option<String>,
    pub resolver: DecisionResolver,
}

struct PendingDecision {
    task_id: String,
    tx: oneshot::Sender<DecisionOutcome>,
}

/// Suspended human gates waiting for a `decision_resolved`.
#[derive(Default)]
pub struct DecisionRegistry {
    pending: Mutex<HashMap<String, PendingDecision>>,
}

impl DecisionRegistry {
    fn register(&self, decision_id: &str, task_id: &str) -> oneshot::Receiver<DecisionOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("decision registry lock poisoned")
            .insert(
                decision_id.to_string(),
                PendingDecision {
                    task_id: task_id.to_string(),
                    tx,
                },
            );
        rx
    }

    fn remove(&self, decision_id: &str) -> Option<PendingDecision> {
        self.pending
            .lock()
            .expect("decision registry lock poisoned")
            .remove(decision_id)
    }

    pub fn task_for(&self, decision_id: &str) -> Option<String> {
        self.pending
            .lock()
            .expect("decision registry lock poisoned")
            .get(decision_id)
            .map(|p| p.task_id.clone())
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending
            .lock()
            .expect("decision registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Deliver an outcome to the waiting gate. `false` when no gate with
    /// that id is suspended.
    pub fn resolve(&self, decision_id: &str, outcome: DecisionOutcome) -> bool {
        match self.remove(decision_id) {
            Some(pending) => pending.tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Internal classification of a phase failure.
enum PhaseFailure {
    Cancelled,
    Retryable(OrcError),
    Fatal(OrcError),
}

pub struct PhaseExecutor {
    store: Arc<ProjectStore>,
    publisher: Arc<dyn Publisher>,
    assistant: Arc<dyn Assistant>,
    config: OrcConfig,
    workdir: PathBuf,
    session: Arc<SessionTracker>,
    decisions: Arc<DecisionRegistry>,
    running: Mutex<HashMap<String, CancellationToken>>,
    permits: Arc<Semaphore>,
}

impl PhaseExecutor {
    pub fn new(
        store: Arc<ProjectStore>,
        publisher: Arc<dyn Publisher>,
        assistant: Arc<dyn Assistant>,
        config: OrcConfig,
        workdir: PathBuf,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            store,
            publisher,
            assistant,
            config,
            workdir,
            session: Arc::new(SessionTracker::new()),
            decisions: Arc::new(DecisionRegistry::default()),
            running: Mutex::new(HashMap::new()),
            permits,
        }
    }

    pub fn session(&self) -> Arc<SessionTracker> {
        Arc::clone(&self.session)
    }

    pub fn decisions(&self) -> Arc<DecisionRegistry> {
        Arc::clone(&self.decisions)
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .expect("running table lock poisoned")
            .contains_key(task_id)
    }

    /// Request cancellation. The executor aborts at its next suspension
    /// point; the current phase fails with `error = "cancelled"` and the
    /// task lands in `paused` for later resumption.
    pub fn cancel(&self, task_id: &str) -> bool {
        let running = self.running.lock().expect("running table lock poisoned");
        match running.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Answer a suspended human gate. Publishes the `decision_resolved`
    /// event and wakes the waiting executor. `false` when the decision id
    /// is unknown (already resolved, timed out, or never issued).
    pub fn resolve_decision(
        &self,
        decision_id: &str,
        approved: bool,
        reason: Option<String>,
        resolver: DecisionResolver,
    ) -> bool {
        let Some(task_id) = self.decisions.task_for(decision_id) else {
            return false;
        };
        let now = Utc::now();
        self.publisher.publish(&Event::at(
            task_id,
            now,
            EventPayload::DecisionResolved {
                decision_id: decision_id.to_string(),
                approved,
                reason: reason.clone(),
                resolved_by: resolver,
                resolved_at: now,
            },
        ));
        self.decisions.resolve(
            decision_id,
            DecisionOutcome {
                approved,
                reason,
                resolver,
            },
        )
    }

    /// Drive a task through every pending phase of the plan.
    pub async fn run_task(&self, task_id: &str) -> OrcResult<()> {
        let token = {
            let mut running = self.running.lock().expect("running table lock poisoned");
            if running.contains_key(task_id) {
                return Err(OrcError::task_running(task_id));
            }
            let token = CancellationToken::new();
            running.insert(task_id.to_string(), token.clone());
            token
        };
        let _guard = RunningGuard {
            executor: self,
            task_id: task_id.to_string(),
        };

        // Respect the concurrency cap, but stay cancellable while queued.
        let _permit = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| OrcError::new(ErrorCode::Unknown, "Executor is shut down"))?,
        };

        self.drive(task_id, &token).await
    }

    async fn drive(&self, task_id: &str, token: &CancellationToken) -> OrcResult<()> {
        let mut task = self.store.load_task(task_id)?;
        if task.is_terminal() {
            return Err(OrcError::task_invalid_state(
                task_id,
                task.status.as_str(),
                "a non-terminal status",
            ));
        }
        for name in self.config.plan() {
            task.execution_state.ensure_phase(&name);
        }
        task.status = TaskStatus::Running;
        self.store.save_task(&task)?;
        self.session.task_started();
        self.session.publish_update(self.publisher.as_ref());

        let run_started = Utc::now();
        let mut last_commit: Option<String> = None;

        let phases = self.config.phases.clone();
        for cfg in &phases {
            let status = task
                .execution_state
                .phase(&cfg.name)
                .map(|p| p.status)
                .unwrap_or_default();
            if matches!(status, PhaseStatus::Completed | PhaseStatus::Skipped) {
                continue;
            }
            match self.run_phase(&mut task, cfg, token).await {
                Ok(commit) => last_commit = commit,
                Err(PhaseFailure::Cancelled) => {
                    task.status = TaskStatus::Paused;
                    self.store.save_task(&task)?;
                    self.session.task_finished();
                    self.session.publish_update(self.publisher.as_ref());
                    info!(task_id, phase = %cfg.name, "task paused by cancellation");
                    return Ok(());
                }
                Err(PhaseFailure::Fatal(e)) | Err(PhaseFailure::Retryable(e)) => {
                    task.status = TaskStatus::Failed;
                    self.store.save_task(&task)?;
                    self.session.task_finished();
                    self.session.publish_update(self.publisher.as_ref());
                    return Err(e);
                }
            }
        }

        task.status = TaskStatus::Completed;
        task.current_phase = None;
        self.store.save_task(&task)?;
        let duration_ms = (Utc::now() - run_started).num_milliseconds().max(0) as u64;
        self.publisher.publish(&Event::new(
            task_id,
            EventPayload::Complete {
                status: TaskStatus::Completed,
                duration_ms,
                commit_sha: last_commit,
            },
        ));
        self.session.task_finished();
        self.session.publish_update(self.publisher.as_ref());
        Ok(())
    }

    async fn run_phase(
        &self,
        task: &mut Task,
        cfg: &PhaseConfig,
        token: &CancellationToken,
    ) -> Result<Option<String>, PhaseFailure> {
        let phase = cfg.name.clone();
        {
            let entry = task.execution_state.ensure_phase(&phase);
            entry.status = PhaseStatus::Running;
            entry.error_message = None;
        }
        task.current_phase = Some(phase.clone());
        self.store.save_task(task).map_err(PhaseFailure::Fatal)?;
        self.publisher.publish(&Event::phase_started(&task.id, &phase));

        let result = match cfg.kind {
            PhaseKind::Human => self.run_human_gate(task, cfg, token).await,
            PhaseKind::Assistant => self.run_assistant_phase(task, cfg, token).await,
        };

        match result {
            Ok(commit) => {
                let entry = task.execution_state.ensure_phase(&phase);
                entry.status = PhaseStatus::Completed;
                entry.commit_sha = commit.clone();
                self.store.save_task(task).map_err(PhaseFailure::Fatal)?;
                self.publisher
                    .publish(&Event::phase_completed(&task.id, &phase, commit.clone()));
                Ok(commit)
            }
            Err(failure) => {
                let message = match &failure {
                    PhaseFailure::Cancelled => "cancelled".to_string(),
                    PhaseFailure::Retryable(e) | PhaseFailure::Fatal(e) => e.to_string(),
                };
                let entry = task.execution_state.ensure_phase(&phase);
                entry.status = PhaseStatus::Failed;
                entry.error_message = Some(message.clone());
                self.store.save_task(task).map_err(PhaseFailure::Fatal)?;
                self.publisher
                    .publish(&Event::phase_failed(&task.id, &phase, message));
                Err(failure)
            }
        }
    }

    async fn run_assistant_phase(
        &self,
        task: &mut Task,
        cfg: &PhaseConfig,
        token: &CancellationToken,
    ) -> Result<Option<String>, PhaseFailure> {
        let cap = cfg.max_iterations.max(1);
        let mut iteration = 1u32;
        loop {
            task.execution_state.ensure_phase(&cfg.name).iteration_count = iteration;
            self.store.save_task(task).map_err(PhaseFailure::Fatal)?;

            match self.run_iteration(task, cfg, iteration, token).await {
                Ok(commit) => return Ok(commit),
                Err(PhaseFailure::Retryable(e)) if iteration < cap => {
                    self.publisher.publish(&Event::warning(
                        &task.id,
                        Some(cfg.name.as_str()),
                        format!("iteration {iteration} failed: {e}; retrying"),
                    ));
                    iteration += 1;
                }
                Err(PhaseFailure::Retryable(e)) => {
                    return Err(PhaseFailure::Fatal(
                        OrcError::max_retries(&cfg.name, cap).with_cause(e),
                    ));
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn run_iteration(
        &self,
        task: &Task,
        cfg: &PhaseConfig,
        iteration: u32,
        token: &CancellationToken,
    ) -> Result<Option<String>, PhaseFailure> {
        let task_id = task.id.as_str();
        let phase = cfg.name.as_str();

        self.publisher
            .publish(&Event::activity(task_id, phase, "waiting_api"));
        let prompt = self.build_prompt(task, cfg, iteration);
        self.publisher.publish(&Event::transcript(
            task_id,
            phase,
            iteration,
            TranscriptKind::Prompt,
            prompt.clone(),
        ));

        let mut rx = self
            .assistant
            .invoke(AssistantRequest {
                task_id: task_id.to_string(),
                phase: phase.to_string(),
                iteration,
                prompt,
                workdir: self.workdir.clone(),
            })
            .await
            .map_err(PhaseFailure::Fatal)?;

        let started = std::time::Instant::now();
        let deadline = tokio::time::Instant::now() + cfg.timeout();
        let heartbeat_period = self.config.heartbeat();
        let mut heartbeat = tokio::time::interval(heartbeat_period);
        heartbeat.tick().await;
        let mut last_record = tokio::time::Instant::now();
        let mut streaming = false;
        let mut usage_total = TokenUsage::default();

        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(PhaseFailure::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(PhaseFailure::Retryable(
                        OrcError::claude_timeout(phase, cfg.timeout_secs),
                    ));
                }
                _ = heartbeat.tick() => {
                    // Only during silence; records reset the window.
                    if last_record.elapsed() >= heartbeat_period {
                        self.publisher.publish(&Event::heartbeat(task_id, phase, iteration));
                    }
                }
                record = rx.recv() => {
                    last_record = tokio::time::Instant::now();
                    match record {
                        None => {
                            return Err(PhaseFailure::Retryable(
                                OrcError::phase_stuck(phase)
                                    .with_why("The assistant stream ended without a result"),
                            ));
                        }
                        Some(AssistantRecord::Chunk { text }) => {
                            if !streaming {
                                self.publisher.publish(&Event::activity(task_id, phase, "streaming"));
                                streaming = true;
                            }
                            self.publisher.publish(&Event::transcript(
                                task_id, phase, iteration, TranscriptKind::Chunk, text,
                            ));
                        }
                        Some(AssistantRecord::ToolUse { name, input }) => {
                            self.publisher.publish(&Event::activity(task_id, phase, "running_tool"));
                            if let Some(reason) = check_tool_policy(cfg.policy, &name, &input) {
                                self.publisher.publish(&Event::transcript(
                                    task_id, phase, iteration, TranscriptKind::Error, reason.clone(),
                                ));
                                return Err(PhaseFailure::Retryable(
                                    OrcError::new(ErrorCode::Unknown, reason),
                                ));
                            }
                            self.publisher.publish(&Event::transcript(
                                task_id, phase, iteration, TranscriptKind::Tool,
                                describe_tool_use(&name, &input),
                            ));
                        }
                        Some(AssistantRecord::Usage(usage)) => {
                            usage_total.add(&usage);
                            self.session.add_tokens(usage.input, usage.output);
                            self.publisher.publish(&Event::new(
                                task_id,
                                EventPayload::Tokens {
                                    phase: phase.to_string(),
                                    input: usage_total.input,
                                    output: usage_total.output,
                                    cache_creation: usage_total.cache_creation,
                                    cache_read: usage_total.cache_read,
                                    total: usage_total.total(),
                                },
                            ));
                        }
                        Some(AssistantRecord::Error { message }) => {
                            self.publisher.publish(&Event::transcript(
                                task_id, phase, iteration, TranscriptKind::Error, message,
                            ));
                        }
                        Some(AssistantRecord::Completed { result, is_error, cost_usd }) => {
                            if is_error {
                                return Err(PhaseFailure::Retryable(OrcError::new(
                                    ErrorCode::Unknown,
                                    format!("Assistant reported an error in phase {phase}"),
                                )));
                            }
                            if let Some(text) = result {
                                self.publisher.publish(&Event::transcript(
                                    task_id, phase, iteration, TranscriptKind::Response, text,
                                ));
                            }
                            self.record_cost(task_id, phase, iteration, cost_usd, &usage_total, started);
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    async fn run_human_gate(
        &self,
        task: &Task,
        cfg: &PhaseConfig,
        token: &CancellationToken,
    ) -> Result<Option<String>, PhaseFailure> {
        let decision_id = Uuid::new_v4().to_string();
        let rx = self.decisions.register(&decision_id, &task.id);
        let now = Utc::now();
        self.publisher.publish(&Event::at(
            &task.id,
            now,
            EventPayload::DecisionRequired {
                decision_id: decision_id.clone(),
                task_id: task.id.clone(),
                phase: cfg.name.clone(),
                question: format!("Approve phase {} for {}?", cfg.name, task.id),
                context: task.title.clone(),
                requested_at: now,
            },
        ));

        let timeout = async {
            match self.config.decision_timeout() {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = token.cancelled() => {
                let _ = self.decisions.remove(&decision_id);
                Err(PhaseFailure::Cancelled)
            }
            _ = timeout => {
                let _ = self.decisions.remove(&decision_id);
                Err(PhaseFailure::Fatal(
                    OrcError::phase_stuck(&cfg.name)
                        .with_why("No decision arrived before the configured timeout"),
                ))
            }
            outcome = rx => match outcome {
                Ok(outcome) if outcome.approved => Ok(None),
                Ok(outcome) => Err(PhaseFailure::Fatal(OrcError::new(
                    ErrorCode::Unknown,
                    match outcome.reason {
                        Some(reason) => format!("Decision rejected: {reason}"),
                        None => "Decision rejected".to_string(),
                    },
                ))),
                Err(_) => Err(PhaseFailure::Fatal(
                    OrcError::phase_stuck(&cfg.name).with_why("The decision channel closed"),
                )),
            }
        }
    }

    /// Persist per-invocation cost telemetry. Telemetry failures never
    /// disturb the phase outcome.
    fn record_cost(
        &self,
        task_id: &str,
        phase: &str,
        iteration: u32,
        cost_usd: Option<f64>,
        usage: &TokenUsage,
        started: std::time::Instant,
    ) {
        let cost_usd = cost_usd.unwrap_or(0.0);
        let entry = CostEntry {
            project_id: String::new(),
            task_id: task_id.to_string(),
            phase: phase.to_string(),
            model: self.config.assistant.model.clone(),
            iteration,
            cost_usd,
            input_tokens: usage.input,
            output_tokens: usage.output,
            cache_creation_tokens: usage.cache_creation,
            cache_read_tokens: usage.cache_read,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.record_cost(&entry) {
            warn!(task_id, phase, error = %e, "failed to record cost entry");
        }
        self.session.add_cost(cost_usd);
    }

    fn build_prompt(&self, task: &Task, cfg: &PhaseConfig, iteration: u32) -> String {
        let mut prompt = format!(
            "# {}: {}\n\n{}\n\n## Current phase\n\nYou are in the `{}` phase (iteration {}).\n",
            task.id, task.title, task.description, cfg.name, iteration
        );
        if cfg.policy == PhasePolicy::TestsOnly {
            prompt.push_str(
                "\nOnly test files may be created or modified in this phase. \
                 Write failing tests that pin down the specified behavior.\n",
            );
        }
        prompt
    }
}

/// Removes the running-table entry on every exit path, panics included.
struct RunningGuard<'a> {
    executor: &'a PhaseExecutor,
    task_id: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.executor
            .running
            .lock()
            .expect("running table lock poisoned")
            .remove(&self.task_id);
    }
}

/// Policy check for one tool call. `Some(reason)` means denied.
fn check_tool_policy(policy: PhasePolicy, tool: &str, input: &serde_json::Value) -> Option<String> {
    if policy == PhasePolicy::Unrestricted {
        return None;
    }
    if !GUARDED_TOOLS.contains(&tool) {
        return None;
    }
    let path = input.get("file_path").and_then(|v| v.as_str())?;
    check_write(policy, path).err()
}

/// Human-readable one-liner for a tool transcript event.
fn describe_tool_use(name: &str, input: &serde_json::Value) -> String {
    if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
        return format!("{name}: {path}");
    }
    if name == "Bash"
        && let Some(cmd) = input.get("command").and_then(|v| v.as_str())
    {
        return format!("Bash: {}", truncate(cmd, 60));
    }
    name.to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
