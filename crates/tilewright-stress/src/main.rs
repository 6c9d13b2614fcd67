use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tilewright_service::config::Config;

mod logging;
mod sources;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Enable `sentry`.
    #[arg(long)]
    sentry: bool,

    /// Enable `tracing`.
    #[arg(long)]
    tracing: bool,

    /// Enable `metrics`.
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;

    let service_config = Config::get(cli.config.as_deref())?;

    let logging_config = logging::Config {
        backtraces: true,
        sentry: cli.sentry,
        tracing: cli.tracing,
        metrics: cli.metrics,
    };

    // SAFETY: No other threads have been started yet.
    let logging_guard = unsafe { logging::init(logging_config, &service_config)? };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let result = runtime.block_on(async move {
        if let Some(udp_sink) = logging_guard.udp_sink {
            tokio::spawn(udp_sink);
        }

        perform_stresstest(service_config, workloads, cli.duration).await
    });

    if let Err(error) = &result {
        tilewright_service::logging::ensure_log_error(error);
    }
    result
}
