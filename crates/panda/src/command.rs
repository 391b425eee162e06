use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::service::{ServiceError, SubmissionService, SubmitReply};

pub const DEFAULT_SUBMIT_PROGRAM: &str = "prun";

/// Submits by running a prun-compatible helper.
///
/// The helper gets the raw flags followed by `--taskName <name>` and must print the reply as a
/// JSON object, `{"status": <int>, "result": [...]}`, on the last line of stdout. Anything it
/// prints before that line is ignored.
#[derive(Debug, Clone)]
pub struct CommandService {
    program: String,
    timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParams {
    pub args: Vec<String>,
}

impl CommandService {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill the helper and fail the submission if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, params: &CommandParams) -> Result<std::process::Output, ServiceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&params.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, output).await.map_err(|_| {
                ServiceError::Timeout {
                    program: self.program.clone(),
                    timeout: limit,
                }
            })?,
            None => output.await,
        };
        result.map_err(|source| ServiceError::Spawn {
            program: self.program.clone(),
            source,
        })
    }
}

impl Default for CommandService {
    fn default() -> Self {
        Self::new(DEFAULT_SUBMIT_PROGRAM)
    }
}

impl SubmissionService for CommandService {
    type Params = CommandParams;

    fn build_parameters(
        &self,
        raw_args: &[String],
        task_name: &str,
    ) -> Result<CommandParams, ServiceError> {
        if task_name.is_empty() {
            return Err(ServiceError::Parameters("empty task name".into()));
        }
        let mut args = raw_args.to_vec();
        args.push("--taskName".into());
        args.push(task_name.into());
        Ok(CommandParams { args })
    }

    async fn submit(&self, params: CommandParams) -> Result<SubmitReply, ServiceError> {
        debug!(program = %self.program, args = ?params.args, "running submit helper");
        let out = self.run(&params).await?;
        if !out.status.success() {
            return Err(ServiceError::Exit {
                program: self.program.clone(),
                code: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        parse_reply(&String::from_utf8_lossy(&out.stdout))
    }
}

fn parse_reply(stdout: &str) -> Result<SubmitReply, ServiceError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ServiceError::Reply("helper printed nothing".into()))?;
    serde_json::from_str(line).map_err(|e| ServiceError::Reply(format!("{e}: {line}")))
}
