#![forbid(unsafe_code)]

//! Process-level wiring for the `daqsim` binary: configuration and the run controller.

pub mod config;
pub mod controller;

pub use config::{Cli, ConfigError, MessagingConfig, RunConfig, SubmissionConfig};
pub use controller::{ctrl_c, RunController, RunError, RunSummary};
