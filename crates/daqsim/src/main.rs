use anyhow::{Context, Result};
use clap::Parser;
use daqsim::{ctrl_c, Cli, RunConfig, RunController};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = RunConfig::from_cli(cli).context("invalid configuration")?;
    debug!(?config, "effective configuration");
    if let Some(mq) = &config.messaging {
        info!(
            destination = %mq.destination,
            client_id = %mq.binding.client_id,
            subscription = %mq.binding.subscription_name,
            submit = config.submission.is_some(),
            "messaging enabled (in-process broker)"
        );
    }

    let summary = RunController::new(config)
        .run(ctrl_c())
        .await
        .context("simulation failed")?;

    println!("{summary}");
    Ok(())
}
