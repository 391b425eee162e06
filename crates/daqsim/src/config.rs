use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use daqsim_comms::{DurableBinding, DEFAULT_DESTINATION};
use daqsim_core::{ClockError, ClockSettings, GeneratorError, ProductionWindow};
use daqsim_panda::{SubmissionTemplate, DEFAULT_MONITOR_URL, DEFAULT_SUBMIT_PROGRAM};
use thiserror::Error;

/// Schedule location relative to `DAQSIM_PATH` (or to `..` when it is unset).
pub const DEFAULT_SCHEDULE: &str = "config/schedule-rt.yml";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "daqsim",
    version,
    about = "Time-compressed STF generator with message-triggered PanDA submission"
)]
pub struct Cli {
    /// Debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Publish produced STFs and listen for them on the message channel.
    #[arg(short, long)]
    pub mq: bool,

    /// Schedule YAML. Defaults to $DAQSIM_PATH/config/schedule-rt.yml.
    #[arg(short, long)]
    pub schedule: Option<String>,

    /// Simulated seconds per wall second.
    #[arg(short, long, default_value_t = 1.0)]
    pub factor: f64,

    /// Stop once simulated time reaches this many seconds.
    #[arg(short, long)]
    pub until: Option<f64>,

    /// Wall seconds between clock ticks.
    #[arg(short, long, default_value_t = 1.0)]
    pub clock: f64,

    /// Write each STF to this directory.
    #[arg(short, long)]
    pub dest: Option<String>,

    /// Shortest production time of one STF, simulated seconds.
    #[arg(short = 'L', long, default_value_t = 1.0)]
    pub low: f64,

    /// Longest production time of one STF, simulated seconds.
    #[arg(short = 'H', long, default_value_t = 2.0)]
    pub high: f64,

    /// Seed for production delays; a fresh seed is drawn when omitted.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Submit a PanDA task for every STF message received. Needs --mq.
    #[arg(long)]
    pub submit_panda: bool,

    #[arg(long, default_value = DEFAULT_DESTINATION)]
    pub destination: String,

    #[arg(long, default_value = "daqsim-client")]
    pub client_id: String,

    #[arg(long, default_value = "daqsim-durable-sub")]
    pub subscription_name: String,

    /// PanDA working group.
    #[arg(long, env = "PANDA_AUTH_VO")]
    pub working_group: Option<String>,

    /// PanDA monitor base URL, used for log links.
    #[arg(long, env = "PANDAMON_URL", default_value = DEFAULT_MONITOR_URL)]
    pub monitor_url: String,

    #[arg(long, default_value = "BNL_PanDA_1")]
    pub site: String,

    #[arg(long, default_value = "wlcg")]
    pub vo: String,

    #[arg(long, default_value = "managed")]
    pub prod_source_label: String,

    #[arg(long, default_value = "myout.txt")]
    pub outputs: String,

    #[arg(long, default_value_t = 1)]
    pub n_jobs: u32,

    /// Prefix of the output dataset name.
    #[arg(long, default_value = "user.daqsim")]
    pub dataset_scope: String,

    /// Job command line; `{descriptor}` is replaced by the STF JSON.
    #[arg(long, default_value = "./my_script_new.sh '{descriptor}'")]
    pub exec_template: String,

    /// prun-compatible helper that performs the submission.
    #[arg(long, default_value = DEFAULT_SUBMIT_PROGRAM)]
    pub submit_program: String,

    #[arg(long)]
    pub submit_timeout_secs: Option<u64>,

    /// After an interrupt, how long an in-flight submission may still run before it is abandoned.
    #[arg(long, default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Installation root used to locate the default schedule.
    #[arg(long, env = "DAQSIM_PATH", hide = true)]
    pub daqsim_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Window(#[from] GeneratorError),
    #[error("--submit-panda needs --mq")]
    SubmitWithoutMq,
    #[error("PANDA_AUTH_VO is not set; export it (e.g. PANDA_AUTH_VO=wlcg) or pass --working-group")]
    MissingWorkingGroup,
    #[error("--n-jobs must be at least 1")]
    NoJobs,
}

#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub destination: String,
    pub binding: DurableBinding,
}

#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    pub template: SubmissionTemplate,
    pub monitor_url: String,
    pub program: String,
    pub timeout: Option<Duration>,
}

/// Everything a run needs, validated once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub verbose: bool,
    pub schedule: PathBuf,
    pub clock: ClockSettings,
    pub window: ProductionWindow,
    pub dest: Option<PathBuf>,
    pub seed: Option<u64>,
    pub messaging: Option<MessagingConfig>,
    pub submission: Option<SubmissionConfig>,
    pub shutdown_grace: Duration,
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let clock = ClockSettings {
            factor: cli.factor,
            interval: cli.clock,
            until: cli.until,
        };
        clock.validate()?;
        let window = ProductionWindow::new(cli.low, cli.high)?;

        if cli.submit_panda && !cli.mq {
            return Err(ConfigError::SubmitWithoutMq);
        }
        let submission = if cli.submit_panda {
            let working_group = cli
                .working_group
                .filter(|wg| !wg.trim().is_empty())
                .ok_or(ConfigError::MissingWorkingGroup)?;
            if cli.n_jobs == 0 {
                return Err(ConfigError::NoJobs);
            }
            Some(SubmissionConfig {
                template: SubmissionTemplate {
                    exec_template: cli.exec_template,
                    dataset_scope: cli.dataset_scope,
                    n_jobs: cli.n_jobs,
                    vo: cli.vo,
                    site: cli.site,
                    prod_source_label: cli.prod_source_label,
                    working_group,
                    outputs: cli.outputs,
                    no_build: true,
                },
                monitor_url: cli.monitor_url,
                program: cli.submit_program,
                timeout: cli.submit_timeout_secs.map(Duration::from_secs),
            })
        } else {
            None
        };

        let messaging = cli.mq.then(|| MessagingConfig {
            destination: cli.destination,
            binding: DurableBinding::new(cli.client_id, cli.subscription_name),
        });

        let schedule = match cli.schedule {
            Some(s) => expand(&s),
            None => cli
                .daqsim_path
                .unwrap_or_else(|| PathBuf::from(".."))
                .join(DEFAULT_SCHEDULE),
        };

        Ok(Self {
            verbose: cli.verbose,
            schedule,
            clock,
            window,
            dest: cli.dest.as_deref().map(expand),
            seed: cli.seed,
            messaging,
            submission,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
