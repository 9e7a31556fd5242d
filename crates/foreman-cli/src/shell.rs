//! Runs an external command per claimed task.

use std::process::{Output, Stdio};

use async_trait::async_trait;
use foreman_core::TaskHandler;
use foreman_core::domain::{Decision, TaskItem};
use tokio::process::Command;
use tracing::debug;

pub const TASK_ENV: &str = "FOREMAN_TASK";
pub const TASK_ID_ENV: &str = "FOREMAN_TASK_ID";
pub const ACTION_ENV: &str = "FOREMAN_ACTION";

/// Lines of child output kept in a failure description.
const FAILURE_TAIL_LINES: usize = 20;

pub struct ShellHandler {
    command: Vec<String>,
    remediate_with: Option<String>,
}

impl ShellHandler {
    pub fn new(command: Vec<String>, remediate_with: Option<String>) -> Self {
        Self {
            command,
            remediate_with,
        }
    }

    async fn spawn(&self, program: &str, args: &[String], task: &TaskItem, action: Option<&str>) -> Result<Output, String> {
        let payload = serde_json::to_string(task).map_err(|e| format!("task encode: {e}"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env(TASK_ENV, payload)
            .env(TASK_ID_ENV, task.id.as_str())
            .stdin(Stdio::null());
        if let Some(action) = action {
            cmd.env(ACTION_ENV, action);
        }
        cmd.output()
            .await
            .map_err(|e| format!("failed to start {program}: {e}"))
    }
}

#[async_trait]
impl TaskHandler for ShellHandler {
    async fn handle(&self, task: &TaskItem) -> Result<(), String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| "no command given".to_string())?;
        let output = self.spawn(program, args, task, None).await?;
        debug!(task = %task.id, status = %output.status, "command finished");

        if output.status.success() {
            Ok(())
        } else {
            Err(failure_text(&output))
        }
    }

    async fn remediate(&self, task: &TaskItem, decision: &Decision) -> Option<bool> {
        let program = self.remediate_with.as_deref()?;
        let args = [decision.action.clone()];
        match self.spawn(program, &args, task, Some(&decision.action)).await {
            Ok(output) => Some(output.status.success()),
            Err(err) => {
                debug!(task = %task.id, error = %err, "remediation command did not start");
                Some(false)
            }
        }
    }
}

/// Exit status plus the tail of stderr (stdout when stderr is empty), which
/// is what the decision engine classifies.
fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let body = if stderr.trim().is_empty() { stdout } else { stderr };

    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(FAILURE_TAIL_LINES)..].join("\n");
    if tail.is_empty() {
        format!("command failed with {}", output.status)
    } else {
        format!("command failed with {}: {tail}", output.status)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use foreman_core::domain::{TaskId, TaskItem};
    use foreman_core::queue::TaskState;
    use chrono::Utc;

    fn task() -> TaskItem {
        TaskItem {
            id: TaskId::new("t1"),
            target_agent: "build".to_string(),
            description: "compile".to_string(),
            priority: 0,
            state: TaskState::Claimed,
            created_at: Utc::now(),
            claimed_by: Some("build".to_string()),
            claimed_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    fn sh(script: &str) -> ShellHandler {
        ShellHandler::new(vec!["sh".into(), "-c".into(), script.into()], None)
    }

    #[tokio::test]
    async fn task_json_reaches_the_command() {
        let handler = sh(r#"test "$FOREMAN_TASK_ID" = t1 && echo "$FOREMAN_TASK" | grep -q '"target_agent":"build"'"#);
        assert_eq!(handler.handle(&task()).await, Ok(()));
    }

    #[tokio::test]
    async fn failure_carries_stderr_tail() {
        let handler = sh("echo 'error: linker failed' >&2; exit 3");
        let err = handler.handle(&task()).await.unwrap_err();
        assert!(err.contains("linker failed"), "{err}");
    }

    #[tokio::test]
    async fn remediation_is_unsupported_without_a_command() {
        let handler = sh("true");
        let decision = Decision {
            signature: "build:medium".parse().unwrap(),
            action: "rebuild".to_string(),
            confidence: 0.9,
            disposition: foreman_core::domain::Disposition::AutoExecute,
            alternatives: Vec::new(),
            reasoning: String::new(),
            known: true,
        };
        assert_eq!(handler.remediate(&task(), &decision).await, None);
    }
}
