use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{program} did not answer within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("unreadable submission reply: {0}")]
    Reply(String),
    #[error("invalid submission parameters: {0}")]
    Parameters(String),
}

/// Answer of the submission service: a status code and a result tuple.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitReply {
    pub status: i32,
    #[serde(default)]
    pub result: Vec<Value>,
}

impl SubmitReply {
    pub fn accepted(task_id: impl Into<Value>) -> Self {
        Self {
            status: 0,
            result: vec![Value::Bool(true), Value::from("succeeded"), task_id.into()],
        }
    }

    pub fn rejected(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            result: vec![Value::Bool(false), Value::from(message.into())],
        }
    }

    /// Third element of the result tuple, rendered as text.
    pub fn task_id(&self) -> Option<String> {
        match self.result.get(2)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn result_text(&self) -> String {
        Value::Array(self.result.clone()).to_string()
    }
}

/// Remote task submission. The call is a single attempt; retrying is up to the caller.
pub trait SubmissionService: Send + Sync + 'static {
    type Params: Send;

    /// Translates prun-style flags plus the task name into the service's own parameters.
    fn build_parameters(
        &self,
        raw_args: &[String],
        task_name: &str,
    ) -> Result<Self::Params, ServiceError>;

    fn submit(
        &self,
        params: Self::Params,
    ) -> impl Future<Output = Result<SubmitReply, ServiceError>> + Send;
}
