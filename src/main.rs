use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;

use hypersync::cleaning::ArtifactRemoval;
use hypersync::config::ExperimentConfig;
use hypersync::connectivity::ConnectivityMode;
use hypersync::edfio::EdfSource;
use hypersync::registry::UserRegistry;
use hypersync::sync::{EpochScope, Synchronization};

#[derive(Parser, Debug)]
#[command(name = "hypersync")]
#[command(version, about = "Inter-brain synchronization for SSVEP hyperscanning", long_about = None)]
struct Cli {
    /// Directory with one EDF recording per device
    #[arg(value_name = "EDF_DIR")]
    edf_dir: PathBuf,

    /// Path to config TOML (written with defaults if absent)
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Cleaning mode: ica, asr, bilstm, regression or none (overrides config)
    #[arg(long)]
    cleaning: Option<String>,

    /// Connectivity measure: coh, plv or imaginary_coh (overrides config)
    #[arg(long)]
    connectivity: Option<String>,

    /// Epochs to compare: current-block or full-session
    #[arg(long, default_value = "current-block")]
    scope: String,

    /// Trial number written to the results table
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    trial: i64,

    /// Append results to the experiment CSV (overrides config)
    #[arg(long, default_value_t = false)]
    record: bool,

    /// Compare each recording with a copy of itself
    #[arg(long, default_value_t = false)]
    duplicate: bool,

    /// Username for a device, as DEVICE=NAME (repeatable)
    #[arg(long = "user", value_name = "DEVICE=NAME")]
    users: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = ExperimentConfig::load_or_default(&cli.config);
    if let Some(mode) = cli.cleaning {
        config.cleaning.mode = mode;
    }
    if let Some(mode) = cli.connectivity {
        config.connectivity = mode.parse()?;
    }
    config.record |= cli.record;
    config.duplicate |= cli.duplicate;
    let scope: EpochScope = cli.scope.parse()?;
    let mode: ConnectivityMode = config.connectivity;

    let cleaning = ArtifactRemoval::from_config(&config.cleaning)
        .context("Failed to set up artifact removal")?;
    let source = EdfSource::from_dir(&cli.edf_dir)
        .with_context(|| format!("Failed to list {}", cli.edf_dir.display()))?;

    let mut registry = UserRegistry::new();
    for pair in &cli.users {
        registry.set_from_pair(pair)?;
    }
    let sync = Synchronization::new(&source, config, &cleaning, &mut registry)
        .context("Failed to prepare synchronization round")?;
    let sink = sync.results_table();
    let report = sync.sync_results(mode, None, scope, cli.trial, sink.as_ref())?;

    match report.feedback_value() {
        Some(value) => log::info!("Feedback synchronization: {value}"),
        None => log::warn!("No synchronization value computed"),
    }
    Ok(())
}
