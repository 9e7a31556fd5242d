//! Worker loop: heartbeat, claim, run, report, remediate.
//!
//! Store calls are synchronous file I/O and run on the blocking pool; the loop
//! itself only awaits the handler and the poll timer. On shutdown the worker
//! stops claiming, finishes the task in hand, and reports itself idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::Foreman;
use crate::domain::{AgentState, Decision, TaskId, TaskItem};
use crate::error::Result;
use crate::governor::{EscalationOutcome, EscalationRequest};
use crate::queue::TaskState;

/// The work a worker does for its claimed tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task. `Err` carries a human-readable failure description that is
    /// fed to the decision engine.
    async fn handle(&self, task: &TaskItem) -> std::result::Result<(), String>;

    /// Try the remediation `decision.action`. `None` means this handler does
    /// not know the action.
    async fn remediate(&self, _task: &TaskItem, _decision: &Decision) -> Option<bool> {
        None
    }

    /// Hand the failure to the costlier fallback resource. Only called after
    /// the governor permitted it. `None` means unsupported.
    async fn escalate(&self, _task: &TaskItem, _decision: &Decision) -> Option<bool> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRunReport {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated: Option<bool>,
}

pub struct Worker {
    foreman: Foreman,
    handler: Arc<dyn TaskHandler>,
    agent: String,
    pid: u32,
    poll_interval: Duration,
    escalation_class: Option<String>,
}

impl Worker {
    pub fn new(foreman: Foreman, agent: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        let poll_interval = foreman.config().poll_interval();
        Self {
            foreman,
            handler,
            agent: agent.into(),
            pid: std::process::id(),
            poll_interval,
            escalation_class: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Priority class to request escalation under when local remediation fails.
    pub fn with_escalation_class(mut self, class: impl Into<String>) -> Self {
        self.escalation_class = Some(class.into());
        self
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(agent = %self.agent, pid = self.pid, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(err) = self.report(AgentState::Running, None).await {
                warn!(agent = %self.agent, error = %err, "heartbeat failed");
            }

            let idle = match self.run_once().await {
                Ok(Some(report)) => {
                    debug!(agent = %self.agent, task = %report.task_id, state = %report.state, "task processed");
                    false
                }
                Ok(None) => true,
                Err(err) => {
                    error!(agent = %self.agent, error = %err, "worker cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        match self.report(AgentState::Idle, None).await {
            Ok(_) => info!(agent = %self.agent, "worker stopped"),
            Err(err) => warn!(agent = %self.agent, error = %err, "final status update failed"),
        }
    }

    /// Claim and process at most one task.
    pub async fn run_once(&self) -> Result<Option<TaskRunReport>> {
        let agent = self.agent.clone();
        let Some(task) = self.blocking(move |f| f.queue().claim_next(&agent)).await? else {
            return Ok(None);
        };

        // the claim is already persisted; a status hiccup must not strand it
        if let Err(err) = self.report(AgentState::Busy, Some(task.id.clone())).await {
            warn!(agent = %self.agent, task = %task.id, error = %err, "busy report failed, processing anyway");
        }
        let report = self.process(&task).await;
        if let Err(err) = self.report(AgentState::Running, None).await {
            warn!(agent = %self.agent, error = %err, "status update after task failed");
        }
        report.map(Some)
    }

    async fn process(&self, task: &TaskItem) -> Result<TaskRunReport> {
        let mut failure = match self.handler.handle(task).await {
            Ok(()) => return self.finish(task, None, None, None, None).await,
            Err(failure) => failure,
        };
        warn!(agent = %self.agent, task = %task.id, %failure, "task failed");

        let text = failure.clone();
        let decision = self.blocking(move |f| Ok(f.decisions().evaluate(&text, None))).await?;

        let mut remediated = None;
        if decision.auto_execute() {
            let started = Instant::now();
            if let Some(success) = self.handler.remediate(task, &decision).await {
                self.record_outcome(&decision, success, started.elapsed()).await;
                remediated = Some(success);
            }
        }

        // a successful remediation earns exactly one retry
        if remediated == Some(true) {
            match self.handler.handle(task).await {
                Ok(()) => return self.finish(task, None, Some(decision), remediated, None).await,
                Err(again) => {
                    warn!(agent = %self.agent, task = %task.id, failure = %again, "task failed after remediation");
                    failure = again;
                }
            }
        }

        let escalated = self.try_escalate(task, &decision).await;
        let error = if escalated == Some(true) { None } else { Some(failure) };
        self.finish(task, error, Some(decision), remediated, escalated).await
    }

    async fn try_escalate(&self, task: &TaskItem, decision: &Decision) -> Option<bool> {
        let class = self.escalation_class.clone()?;
        let request = EscalationRequest::new(class.clone()).with_signature(decision.signature.key());
        let verdict = self
            .blocking(move |f| Ok(f.governor().evaluate(&request)))
            .await
            .ok()?;
        if !verdict.permitted {
            return None;
        }

        let outcome = self.handler.escalate(task, decision).await;
        let recorded = match outcome {
            Some(true) => EscalationOutcome::Success,
            // permitted but unsupported still counts against the breaker
            Some(false) | None => EscalationOutcome::Failure,
        };
        if let Err(err) = self
            .blocking(move |f| f.governor().record_escalation(&class, recorded))
            .await
        {
            warn!(agent = %self.agent, error = %err, "failed to record escalation outcome");
        }
        outcome
    }

    async fn finish(
        &self,
        task: &TaskItem,
        error: Option<String>,
        decision: Option<Decision>,
        remediated: Option<bool>,
        escalated: Option<bool>,
    ) -> Result<TaskRunReport> {
        let id = task.id.clone();
        let transition = self
            .blocking(move |f| match error {
                None => f.queue().complete(&id),
                Some(reason) => f.queue().fail(&id, reason),
            })
            .await?;
        if !transition.applied() {
            info!(agent = %self.agent, task = %task.id, "task already finished elsewhere");
        }
        Ok(TaskRunReport {
            task_id: task.id.clone(),
            state: transition.task().state,
            decision,
            remediated,
            escalated,
        })
    }

    async fn record_outcome(&self, decision: &Decision, success: bool, elapsed: Duration) {
        let signature = decision.signature;
        let action = decision.action.clone();
        let result = self
            .blocking(move |f| Ok(f.decisions().record_outcome(signature, &action, success, elapsed)))
            .await;
        if !matches!(result, Ok(true)) {
            warn!(agent = %self.agent, %signature, "remediation outcome not fully persisted");
        }
    }

    async fn report(&self, state: AgentState, task: Option<TaskId>) -> Result<()> {
        let agent = self.agent.clone();
        let pid = self.pid;
        self.blocking(move |f| f.status().upsert(&agent, state, Some(pid), task).map(|_| ()))
            .await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Foreman) -> Result<T> + Send + 'static,
    {
        let foreman = self.foreman.clone();
        tokio::task::spawn_blocking(move || op(&foreman)).await?
    }
}

/// Worker group handle.
/// - dropping the group's sender stops every worker
/// - `shutdown_and_join()` waits for their final status updates
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(workers: Vec<Worker>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = workers
            .into_iter()
            .map(|worker| {
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { worker.run(rx).await })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// Stop claiming new tasks. In-flight handlers run to completion.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ForemanBuilder;
    use crate::config::ForemanConfig;
    use crate::domain::{Category, NewTask, Severity, SituationSignature};
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn foreman(dir: &std::path::Path) -> Foreman {
        ForemanBuilder::new(ForemanConfig {
            state_dir: dir.to_path_buf(),
            ..ForemanConfig::default()
        })
        .build()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: &TaskItem) -> std::result::Result<(), String> {
            self.seen.lock().unwrap().push(task.id.to_string());
            if task.description.contains("boom") {
                Err("Build failed: linker error".to_string())
            } else {
                Ok(())
            }
        }
    }

    /// Fails the first run, fixes itself on remediation.
    #[derive(Default)]
    struct Flaky {
        runs: AtomicUsize,
        remediations: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, _task: &TaskItem) -> std::result::Result<(), String> {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("build failed: stale cache".to_string())
            } else {
                Ok(())
            }
        }

        async fn remediate(&self, _task: &TaskItem, decision: &Decision) -> Option<bool> {
            assert_eq!(decision.action, "clean_build");
            self.remediations.fetch_add(1, Ordering::SeqCst);
            Some(true)
        }
    }

    /// Remediation claims success but the task keeps failing.
    #[derive(Default)]
    struct Stubborn {
        runs: AtomicUsize,
        escalations: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Stubborn {
        async fn handle(&self, _task: &TaskItem) -> std::result::Result<(), String> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("build failed: attempt {run}"))
        }

        async fn remediate(&self, _task: &TaskItem, _decision: &Decision) -> Option<bool> {
            Some(true)
        }

        async fn escalate(&self, _task: &TaskItem, _decision: &Decision) -> Option<bool> {
            self.escalations.fetch_add(1, Ordering::SeqCst);
            Some(false)
        }
    }

    fn seed_clean_build(f: &Foreman) {
        let sig = SituationSignature::new(Category::Build, Severity::Medium);
        for _ in 0..10 {
            f.decisions().record_outcome(sig, "clean_build", true, Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn run_once_completes_and_fails_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let f = foreman(dir.path());
        f.queue().enqueue(NewTask::new("build", "ok").with_id("t1").with_priority(2)).unwrap();
        f.queue().enqueue(NewTask::new("build", "boom").with_id("t2")).unwrap();

        let worker = Worker::new(f.clone(), "agent_build.sh", Arc::new(Recorder::default()));

        let first = worker.run_once().await.unwrap().unwrap();
        assert_eq!(first.task_id, TaskId::new("t1"));
        assert_eq!(first.state, TaskState::Completed);

        let second = worker.run_once().await.unwrap().unwrap();
        assert_eq!(second.state, TaskState::Failed);
        let decision = second.decision.unwrap();
        assert_eq!(decision.signature.category, Category::Build);
        assert!(!decision.auto_execute());
        assert_eq!(second.remediated, None);

        assert_eq!(worker.run_once().await.unwrap(), None);
        let status = f.status().read().unwrap();
        assert_eq!(status.get("build").unwrap().state, AgentState::Running);
    }

    #[tokio::test]
    async fn confident_decision_triggers_remediation_and_retry() {
        let dir = tempfile::tempdir().unwrap();
        let f = foreman(dir.path());
        seed_clean_build(&f);
        f.queue().enqueue(NewTask::new("build", "nightly")).unwrap();

        let handler = Arc::new(Flaky::default());
        let worker = Worker::new(f.clone(), "build", handler.clone());
        let report = worker.run_once().await.unwrap().unwrap();

        assert_eq!(report.state, TaskState::Completed);
        assert_eq!(report.remediated, Some(true));
        assert_eq!(handler.remediations.load(Ordering::SeqCst), 1);
        assert_eq!(f.decisions().knowledge().history().unwrap().len(), 11);
    }

    #[tokio::test]
    async fn failed_rerun_after_remediation_escalates_with_latest_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("fallback_policy.json"),
            r#"{"enabled": true, "allowed_priority_classes": ["high"]}"#,
        )
        .unwrap();
        let f = foreman(dir.path());
        seed_clean_build(&f);
        let task = f.queue().enqueue(NewTask::new("build", "nightly")).unwrap();

        let handler = Arc::new(Stubborn::default());
        let worker = Worker::new(f.clone(), "build", handler.clone()).with_escalation_class("high");
        let report = worker.run_once().await.unwrap().unwrap();

        assert_eq!(handler.runs.load(Ordering::SeqCst), 2);
        assert_eq!(handler.escalations.load(Ordering::SeqCst), 1);
        assert_eq!(report.remediated, Some(true));
        assert_eq!(report.escalated, Some(false));
        assert_eq!(report.state, TaskState::Failed);

        let stored = f.queue().get(&task.id).unwrap().unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("build failed: attempt 2"));
        assert_eq!(f.governor().state().unwrap().breakers["high"].failure_count, 1);
    }

    #[tokio::test]
    async fn status_store_failure_does_not_strand_the_claim() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the status document belongs makes every upsert fail
        fs::create_dir(dir.path().join("agent_status.json")).unwrap();
        let f = foreman(dir.path());
        let task = f.queue().enqueue(NewTask::new("build", "ok").with_id("t1")).unwrap();

        let worker = Worker::new(f.clone(), "build", Arc::new(Recorder::default()));
        let report = worker.run_once().await.unwrap().unwrap();

        assert_eq!(report.state, TaskState::Completed);
        assert_eq!(f.queue().get(&task.id).unwrap().unwrap().state, TaskState::Completed);
    }

    #[tokio::test]
    async fn permitted_escalation_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("fallback_policy.json"),
            r#"{"enabled": true, "allowed_priority_classes": ["high"]}"#,
        )
        .unwrap();
        let f = foreman(dir.path());
        f.queue().enqueue(NewTask::new("build", "boom")).unwrap();

        let worker = Worker::new(f.clone(), "build", Arc::new(Recorder::default()))
            .with_escalation_class("high");
        let report = worker.run_once().await.unwrap().unwrap();

        // Recorder cannot escalate, so the permit is spent and counted as a failure
        assert_eq!(report.escalated, None);
        assert_eq!(report.state, TaskState::Failed);
        let state = f.governor().state().unwrap();
        assert_eq!(state.quotas["high"].hourly.used, 1);
        assert_eq!(state.breakers["high"].failure_count, 1);
    }

    #[tokio::test]
    async fn group_drains_queue_and_reports_idle_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let f = foreman(dir.path());
        for n in 0..6 {
            let agent = if n % 2 == 0 { "build" } else { "lint" };
            f.queue().enqueue(NewTask::new(agent, "ok")).unwrap();
        }

        let group = WorkerGroup::spawn(vec![
            Worker::new(f.clone(), "build", Arc::new(Recorder::default()))
                .with_poll_interval(Duration::from_millis(10)),
            Worker::new(f.clone(), "lint_agent", Arc::new(Recorder::default()))
                .with_poll_interval(Duration::from_millis(10)),
        ]);

        let deadline = Instant::now() + Duration::from_secs(10);
        while f.queue().counts().unwrap().completed < 6 {
            assert!(Instant::now() < deadline, "queue not drained");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        group.shutdown_and_join().await;

        let status = f.status().read().unwrap();
        for agent in ["build", "lint"] {
            let s = status.get(agent).unwrap();
            assert_eq!(s.state, AgentState::Idle);
            assert_eq!(s.current_task_id, None);
        }
    }
}
