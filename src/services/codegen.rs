use crate::configuration::CodegenSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// The external code-generation tool is an opaque subprocess that streams
/// line-delimited JSON on stdout. Only the message shapes below are part of
/// the contract; unknown lines are kept as logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolMessage {
    Plan { tasks: Vec<PlannedTask> },
    File { path: String },
    Session { token: String },
    Log { message: String },
    Done { summary: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub title: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("codegen tool timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn codegen tool: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("codegen tool exited with status {code}: {detail}")]
    Failed { code: i32, detail: String },
    #[error("codegen tool produced no usable output: {0}")]
    Malformed(String),
}

#[derive(Debug, Default)]
pub struct CodegenOutcome {
    pub tasks: Vec<PlannedTask>,
    pub files: Vec<String>,
    pub session: Option<String>,
    pub summary: Option<String>,
}

#[derive(Clone)]
pub struct CodegenClient {
    command: String,
    timeout: Duration,
}

impl CodegenClient {
    pub fn new(settings: &CodegenSettings) -> Self {
        Self {
            command: settings.command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Asks the tool for a task plan for the prompt.
    pub async fn plan(
        &self,
        prompt: &str,
        workdir: &Path,
        session: Option<&str>,
    ) -> Result<CodegenOutcome, CodegenError> {
        let mut args = vec!["plan".to_string(), "--prompt".to_string(), prompt.to_string()];
        if let Some(token) = session {
            args.push("--resume".to_string());
            args.push(token.to_string());
        }
        let outcome = self.run(&args, workdir).await?;
        if outcome.tasks.is_empty() {
            return Err(CodegenError::Malformed("plan produced no tasks".into()));
        }
        Ok(outcome)
    }

    /// Executes one planned task (the tool writes files into the workdir).
    pub async fn run_task(
        &self,
        description: &str,
        workdir: &Path,
        session: Option<&str>,
    ) -> Result<CodegenOutcome, CodegenError> {
        let mut args = vec![
            "apply".to_string(),
            "--task".to_string(),
            description.to_string(),
        ];
        if let Some(token) = session {
            args.push("--resume".to_string());
            args.push(token.to_string());
        }
        self.run(&args, workdir).await
    }

    /// Spawns the tool and consumes its stdout line by line under a hard
    /// wall-clock budget. On timeout the child is killed; a timeout is a
    /// retryable failure, never a hang.
    async fn run(&self, args: &[String], workdir: &Path) -> Result<CodegenOutcome, CodegenError> {
        tracing::info!(command = %self.command, ?args, "invoking codegen tool");

        let mut child = Command::new(&self.command)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CodegenError::Malformed("no stdout handle".into()))?;
        let stderr = child.stderr.take();

        let consume = async {
            let mut outcome = CodegenOutcome::default();
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(CodegenError::Spawn)?
            {
                match parse_line(&line) {
                    Some(ToolMessage::Plan { tasks }) => outcome.tasks.extend(tasks),
                    Some(ToolMessage::File { path }) => outcome.files.push(path),
                    Some(ToolMessage::Session { token }) => outcome.session = Some(token),
                    Some(ToolMessage::Done { summary }) => outcome.summary = summary,
                    Some(ToolMessage::Log { message }) => {
                        tracing::debug!(tool_log = %message, "codegen")
                    }
                    None => tracing::debug!(raw = %line, "unrecognized codegen output"),
                }
            }

            let status = child.wait().await.map_err(CodegenError::Spawn)?;
            if !status.success() {
                let mut detail = String::new();
                if let Some(stderr) = stderr {
                    let mut err_lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = err_lines.next_line().await {
                        if detail.len() < 2048 {
                            detail.push_str(&line);
                            detail.push('\n');
                        }
                    }
                }
                return Err(CodegenError::Failed {
                    code: status.code().unwrap_or(-1),
                    detail,
                });
            }
            Ok(outcome)
        };

        match tokio::time::timeout(self.timeout, consume).await {
            Ok(result) => result,
            Err(_) => {
                child.kill().await.ok();
                Err(CodegenError::Timeout(self.timeout))
            }
        }
    }
}

pub fn parse_line(line: &str) -> Option<ToolMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str::<ToolMessage>(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plan_line() {
        let line = r#"{"type":"plan","tasks":[{"title":"scaffold","description":"create the app shell"}]}"#;
        match parse_line(line) {
            Some(ToolMessage::Plan { tasks }) => {
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].title, "scaffold");
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_session_and_file_lines() {
        assert!(matches!(
            parse_line(r#"{"type":"session","token":"sess-42"}"#),
            Some(ToolMessage::Session { .. })
        ));
        assert!(matches!(
            parse_line(r#"{"type":"file","path":"src/App.tsx"}"#),
            Some(ToolMessage::File { .. })
        ));
        assert!(matches!(
            parse_line(r#"{"type":"done","summary":"ok"}"#),
            Some(ToolMessage::Done { .. })
        ));
    }

    #[test]
    fn garbage_lines_are_skipped_not_fatal() {
        assert!(parse_line("").is_none());
        assert!(parse_line("npm WARN deprecated").is_none());
        assert!(parse_line(r#"{"type":"mystery"}"#).is_none());
    }
}
