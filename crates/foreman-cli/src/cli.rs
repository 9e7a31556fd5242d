//! Argument parsing for the `foreman` binary. Execution lives in `commands`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use foreman_core::domain::{AgentState, Severity};
use foreman_core::governor::EscalationOutcome;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Task queue, status registry and remediation decisions for cooperating agents", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides $FOREMAN_CONFIG and <state-dir>/foreman.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Shared state directory (overrides $FOREMAN_HOME)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Debug logging on stderr ($RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Claim the next pending task for an agent; prints the task or null
    Claim { agent: String },

    /// Record an agent's state and heartbeat
    #[command(alias = "reportStatus")]
    ReportStatus {
        agent: String,
        #[arg(value_parser = parse_agent_state)]
        state: AgentState,
        pid: Option<u32>,
        task_id: Option<String>,
    },

    /// Recommend a remediation for a failure description or `category:severity`
    Decide {
        #[arg(required = true, num_args = 1..)]
        situation: Vec<String>,
        #[arg(long, value_parser = parse_severity)]
        severity: Option<Severity>,
    },

    /// Feed the result of a tried action back into the knowledge base
    #[command(alias = "recordOutcome")]
    RecordOutcome {
        signature: String,
        action: String,
        #[arg(value_parser = parse_success, action = clap::ArgAction::Set)]
        success: bool,
        duration_sec: f64,
    },

    /// Ask the governor whether a costly escalation is allowed right now
    #[command(alias = "canEscalate")]
    CanEscalate {
        priority_class: String,
        #[arg(long)]
        signature: Option<String>,
    },

    /// Report how a permitted escalation went
    #[command(alias = "recordEscalation")]
    RecordEscalation {
        priority_class: String,
        #[arg(value_parser = parse_escalation_outcome)]
        outcome: EscalationOutcome,
    },

    /// Add a task to the queue
    Enqueue(EnqueueArgs),

    /// Mark a claimed task completed
    Complete { task_id: String },

    /// Mark a claimed task failed
    Fail {
        task_id: String,
        #[arg(num_args = 0..)]
        reason: Vec<String>,
    },

    /// Put a claimed task back to pending
    Requeue { task_id: String },

    /// Show every agent with its effective state
    Status,

    /// Show queued tasks and per-state counts
    Queue {
        /// Only tasks in this state
        #[arg(long)]
        state: Option<String>,
    },

    /// Judge from before/after output whether an action worked
    Verify { before: String, after: String },

    /// Run a command for every task claimed by an agent until SIGINT/SIGTERM
    Work(WorkArgs),
}

#[derive(Args)]
pub struct EnqueueArgs {
    pub target_agent: String,
    #[arg(num_args = 0..)]
    pub description: Vec<String>,
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i64,
}

#[derive(Args)]
pub struct WorkArgs {
    pub agent: String,

    /// Seconds between polls when the queue is empty
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Priority class for escalating failures local remediation did not fix
    #[arg(long)]
    pub escalation_class: Option<String>,

    /// Command run with FOREMAN_ACTION set when a remediation is auto-executed
    #[arg(long)]
    pub remediate_with: Option<String>,

    /// Command run with the task JSON in FOREMAN_TASK
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

fn parse_agent_state(raw: &str) -> Result<AgentState, String> {
    raw.parse().map_err(|e: foreman_core::ForemanError| e.to_string())
}

fn parse_severity(raw: &str) -> Result<Severity, String> {
    raw.parse().map_err(|e: foreman_core::ForemanError| e.to_string())
}

fn parse_escalation_outcome(raw: &str) -> Result<EscalationOutcome, String> {
    raw.parse().map_err(|e: foreman_core::ForemanError| e.to_string())
}

pub fn parse_success(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "success" | "ok" => Ok(true),
        "false" | "0" | "no" | "failure" | "failed" => Ok(false),
        other => Err(format!("expected true/false, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn camel_case_aliases_parse() {
        let cli = Cli::try_parse_from(["foreman", "reportStatus", "agent_build.sh", "busy", "42", "t1"]).unwrap();
        match cli.command {
            Command::ReportStatus { agent, state, pid, task_id } => {
                assert_eq!(agent, "agent_build.sh");
                assert_eq!(state, AgentState::Busy);
                assert_eq!(pid, Some(42));
                assert_eq!(task_id.as_deref(), Some("t1"));
            }
            _ => panic!("wrong command"),
        }

        let cli = Cli::try_parse_from(["foreman", "recordOutcome", "build:high", "clean_build", "yes", "1.5"]).unwrap();
        assert!(matches!(cli.command, Command::RecordOutcome { success: true, .. }));
    }

    #[test]
    fn work_takes_trailing_command() {
        let cli = Cli::try_parse_from([
            "foreman", "--state-dir", "/tmp/s", "work", "build", "--", "make", "-j4",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/s")));
        match cli.command {
            Command::Work(args) => assert_eq!(args.command, ["make", "-j4"]),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn success_flag_spellings() {
        assert_eq!(parse_success("Success"), Ok(true));
        assert_eq!(parse_success("0"), Ok(false));
        assert!(parse_success("maybe").is_err());
    }
}
