use daqsim_core::ArtifactDescriptor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder in [`SubmissionTemplate::exec_template`] replaced by the descriptor JSON.
pub const DESCRIPTOR_PLACEHOLDER: &str = "{descriptor}";

/// Site-wide settings shared by every submission of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionTemplate {
    pub exec_template: String,
    pub dataset_scope: String,
    pub n_jobs: u32,
    pub vo: String,
    pub site: String,
    pub prod_source_label: String,
    pub working_group: String,
    pub outputs: String,
    pub no_build: bool,
}

impl Default for SubmissionTemplate {
    fn default() -> Self {
        Self {
            exec_template: "./my_script_new.sh '{descriptor}'".into(),
            dataset_scope: "user.daqsim".into(),
            n_jobs: 1,
            vo: "wlcg".into(),
            site: "BNL_PanDA_1".into(),
            prod_source_label: "managed".into(),
            working_group: String::new(),
            outputs: "myout.txt".into(),
            no_build: true,
        }
    }
}

impl SubmissionTemplate {
    /// Builds the request for one artifact. `token` makes both names unique.
    pub fn request(
        &self,
        filename: &str,
        descriptor: &ArtifactDescriptor,
        token: Uuid,
    ) -> SubmissionRequest {
        SubmissionRequest {
            exec: self
                .exec_template
                .replace(DESCRIPTOR_PLACEHOLDER, &quote_inner(&descriptor.encode())),
            out_ds: format!("{}.{}.{}", self.dataset_scope, filename, token),
            n_jobs: self.n_jobs,
            vo: self.vo.clone(),
            site: self.site.clone(),
            prod_source_label: self.prod_source_label.clone(),
            working_group: self.working_group.clone(),
            task_name: format!("stf_task_{filename}_{token}"),
            outputs: self.outputs.clone(),
            no_build: self.no_build,
            token,
        }
    }
}

/// One remote task, ready to be handed to a [`crate::SubmissionService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub exec: String,
    pub out_ds: String,
    pub n_jobs: u32,
    pub vo: String,
    pub site: String,
    pub prod_source_label: String,
    pub working_group: String,
    pub task_name: String,
    pub outputs: String,
    pub no_build: bool,
    pub token: Uuid,
}

impl SubmissionRequest {
    /// prun-style flags. The task name is passed separately.
    pub fn raw_args(&self) -> Vec<String> {
        let mut args = vec![
            "--exec".to_string(),
            self.exec.clone(),
            "--outDS".into(),
            self.out_ds.clone(),
            "--nJobs".into(),
            self.n_jobs.to_string(),
            "--vo".into(),
            self.vo.clone(),
            "--site".into(),
            self.site.clone(),
            "--prodSourceLabel".into(),
            self.prod_source_label.clone(),
            "--workingGroup".into(),
            self.working_group.clone(),
        ];
        if self.no_build {
            args.push("--noBuild".into());
        }
        args.push("--outputs".into());
        args.push(self.outputs.clone());
        args
    }
}

// The exec template wraps the placeholder in single quotes.
fn quote_inner(s: &str) -> String {
    s.replace('\'', r"'\''")
}
