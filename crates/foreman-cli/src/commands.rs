use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use foreman_core::domain::{AgentState, AgentStatus, NewTask, SituationSignature, TaskId};
use foreman_core::governor::EscalationRequest;
use foreman_core::observability::QueueCounts;
use foreman_core::ports::Clock;
use foreman_core::queue::TaskState;
use foreman_core::{Foreman, ForemanConfig, ForemanError, Worker};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{Cli, Command, EnqueueArgs, WorkArgs};
use crate::shell::ShellHandler;

const TASK_STATES: [TaskState; 4] = [
    TaskState::Pending,
    TaskState::Claimed,
    TaskState::Completed,
    TaskState::Failed,
];

pub async fn run(cli: Cli) -> Result<()> {
    let config = ForemanConfig::discover(cli.config.as_deref(), cli.state_dir.as_deref())?;
    let foreman = Foreman::open(config);

    match cli.command {
        Command::Claim { agent } => emit(&foreman.queue().claim_next(&agent)?),
        Command::ReportStatus {
            agent,
            state,
            pid,
            task_id,
        } => emit(&foreman.status().upsert(&agent, state, pid, task_id.map(TaskId::new))?),
        Command::Decide { situation, severity } => {
            let engine = foreman.decisions();
            let signature = engine.signature_for(&situation.join(" "), severity);
            emit(&engine.evaluate_signature(signature))
        }
        Command::RecordOutcome {
            signature,
            action,
            success,
            duration_sec,
        } => record_outcome(&foreman, &signature, &action, success, duration_sec),
        Command::CanEscalate {
            priority_class,
            signature,
        } => {
            let mut request = EscalationRequest::new(priority_class);
            if let Some(signature) = signature {
                request = request.with_signature(signature);
            }
            emit(&foreman.governor().evaluate(&request))
        }
        Command::RecordEscalation {
            priority_class,
            outcome,
        } => emit(&foreman.governor().record_escalation(&priority_class, outcome)?),
        Command::Enqueue(args) => enqueue(&foreman, args),
        Command::Complete { task_id } => emit(&foreman.queue().complete(&TaskId::new(task_id))?),
        Command::Fail { task_id, reason } => {
            let reason = if reason.is_empty() {
                "failed by operator".to_string()
            } else {
                reason.join(" ")
            };
            emit(&foreman.queue().fail(&TaskId::new(task_id), reason)?)
        }
        Command::Requeue { task_id } => emit(&foreman.queue().requeue(&TaskId::new(task_id))?),
        Command::Status => status(&foreman),
        Command::Queue { state } => queue(&foreman, state.as_deref()),
        Command::Verify { before, after } => emit(&foreman.decisions().verify_outcome(&before, &after)),
        Command::Work(args) => work(foreman, args).await,
    }
}

fn record_outcome(foreman: &Foreman, signature: &str, action: &str, success: bool, duration_sec: f64) -> Result<()> {
    let signature: SituationSignature = signature.parse()?;
    let duration = Duration::try_from_secs_f64(duration_sec).map_err(|_| ForemanError::InvalidArgument {
        field: "duration_sec",
        value: duration_sec.to_string(),
    })?;
    let recorded = foreman
        .decisions()
        .record_outcome(signature, action, success, duration);
    emit(&json!({
        "signature": signature,
        "action": action,
        "success": success,
        "recorded": recorded,
    }))
}

fn enqueue(foreman: &Foreman, args: EnqueueArgs) -> Result<()> {
    let mut request = NewTask::new(args.target_agent, args.description.join(" ")).with_priority(args.priority);
    if let Some(id) = args.id {
        request = request.with_id(TaskId::new(id));
    }
    emit(&foreman.queue().enqueue(request)?)
}

#[derive(Serialize)]
struct AgentRow<'a> {
    #[serde(flatten)]
    status: &'a AgentStatus,
    effective_state: AgentState,
}

fn status(foreman: &Foreman) -> Result<()> {
    let snapshot = foreman.status().read()?;
    let now = foreman.clock().now();
    let stale_after = foreman.config().stale_after();
    let agents: Vec<AgentRow<'_>> = snapshot
        .agents
        .values()
        .map(|status| AgentRow {
            status,
            effective_state: status.effective_state(now, stale_after),
        })
        .collect();
    emit(&json!({
        "last_update": snapshot.last_update,
        "agents": agents,
    }))
}

fn queue(foreman: &Foreman, state: Option<&str>) -> Result<()> {
    let filter = state
        .map(|raw| {
            TASK_STATES
                .into_iter()
                .find(|s| s.as_str() == raw.trim().to_ascii_lowercase())
                .ok_or_else(|| ForemanError::InvalidArgument {
                    field: "state",
                    value: raw.to_string(),
                })
        })
        .transpose()?;

    let mut tasks = foreman.queue().list()?;
    let counts = QueueCounts::tally(&tasks);
    if let Some(filter) = filter {
        tasks.retain(|t| t.state == filter);
    }
    emit(&json!({ "counts": counts, "tasks": tasks }))
}

async fn work(foreman: Foreman, args: WorkArgs) -> Result<()> {
    let handler = Arc::new(ShellHandler::new(args.command, args.remediate_with));
    let mut worker = Worker::new(foreman, args.agent, handler);
    if let Some(secs) = args.poll_interval_secs {
        worker = worker.with_poll_interval(Duration::from_secs(secs.max(1)));
    }
    if let Some(class) = args.escalation_class {
        worker = worker.with_escalation_class(class);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent = worker.agent().to_string();
    let running = tokio::spawn(async move { worker.run(shutdown_rx).await });

    shutdown_signal().await;
    info!(%agent, "shutdown requested, finishing the current task");
    // the worker may already have exited
    let _ = shutdown_tx.send(true);
    running.await.context("worker task panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

pub fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Expected failures are results, not crashes: print them and exit 0.
pub fn emit_error(err: &ForemanError) -> Result<()> {
    let kind = match err.kind() {
        foreman_core::ErrorKind::Transient => "transient",
        foreman_core::ErrorKind::Corrupt => "corrupt",
        foreman_core::ErrorKind::InvalidInput => "invalid_input",
        foreman_core::ErrorKind::Infrastructure => "infrastructure",
    };
    emit(&json!({ "error": { "kind": kind, "message": err.to_string() } }))
}
