use std::sync::Arc;

use daqsim_comms::DescriptorHandler;
use daqsim_core::{ArtifactDescriptor, RunCounters};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::request::SubmissionTemplate;
use crate::service::SubmissionService;

pub const DEFAULT_MONITOR_URL: &str = "https://pandamon01.sdcc.bnl.gov";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Success {
        task_id: String,
    },
    /// `status` is the service's code when it answered, `None` when it never did.
    Failure {
        status: Option<i32>,
        message: String,
    },
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    fn failure(status: Option<i32>, message: impl Into<String>) -> Self {
        Self::Failure {
            status,
            message: message.into(),
        }
    }
}

/// Monitor page of a submitted task.
pub fn monitor_link(base: &str, task_id: &str) -> String {
    format!("{}/task/{}/", base.trim_end_matches('/'), task_id)
}

/// Submits one task per descriptor and tallies the outcome in the shared counters.
pub struct JobSubmitter<S> {
    service: S,
    template: SubmissionTemplate,
    counters: Arc<RunCounters>,
    monitor_url: String,
}

impl<S: SubmissionService> JobSubmitter<S> {
    pub fn new(service: S, template: SubmissionTemplate, counters: Arc<RunCounters>) -> Self {
        Self {
            service,
            template,
            counters,
            monitor_url: DEFAULT_MONITOR_URL.into(),
        }
    }

    pub fn with_monitor_url(mut self, url: impl Into<String>) -> Self {
        self.monitor_url = url.into();
        self
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Never fails: every error ends up as a counted [`SubmissionOutcome::Failure`].
    pub async fn submit(&self, descriptor: &ArtifactDescriptor) -> SubmissionOutcome {
        let outcome = self.attempt(descriptor).await;
        match &outcome {
            SubmissionOutcome::Success { .. } => self.counters.record_success(),
            SubmissionOutcome::Failure { .. } => self.counters.record_failure(),
        }
        outcome
    }

    async fn attempt(&self, descriptor: &ArtifactDescriptor) -> SubmissionOutcome {
        let Some(filename) = descriptor.filename() else {
            let message = "missing required field: filename";
            warn!("submission rejected: {message}");
            return SubmissionOutcome::failure(None, message);
        };

        let request = self.template.request(filename, descriptor, Uuid::new_v4());
        info!(filename, task_name = %request.task_name, out_ds = %request.out_ds, "submitting task");

        let params = match self
            .service
            .build_parameters(&request.raw_args(), &request.task_name)
        {
            Ok(p) => p,
            Err(e) => {
                error!(task_name = %request.task_name, "submission failed: {e}");
                return SubmissionOutcome::failure(None, e.to_string());
            }
        };
        let reply = match self.service.submit(params).await {
            Ok(r) => r,
            Err(e) => {
                error!(task_name = %request.task_name, "submission failed: {e}");
                return SubmissionOutcome::failure(None, e.to_string());
            }
        };

        if reply.status != 0 {
            let message = reply.result_text();
            warn!(task_name = %request.task_name, status = reply.status, "task rejected: {message}");
            return SubmissionOutcome::failure(Some(reply.status), message);
        }
        match reply.task_id() {
            Some(task_id) => {
                info!(
                    task_name = %request.task_name,
                    task_id = %task_id,
                    monitor = %monitor_link(&self.monitor_url, &task_id),
                    "task submitted"
                );
                SubmissionOutcome::Success { task_id }
            }
            None => {
                let message = format!("reply carries no task id: {}", reply.result_text());
                warn!(task_name = %request.task_name, "{message}");
                SubmissionOutcome::failure(Some(reply.status), message)
            }
        }
    }
}

impl<S: SubmissionService> DescriptorHandler for JobSubmitter<S> {
    async fn handle(&self, descriptor: ArtifactDescriptor) {
        self.submit(&descriptor).await;
    }
}
