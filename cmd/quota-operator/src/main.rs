use clap::{Parser, ValueEnum};
use pkg_constants::controller::DEFAULT_RESYNC_INTERVAL_SECS;
use pkg_constants::paths::DEFAULT_OPERATOR_CONFIG;
use pkg_controllers::quota::QuotaController;
use pkg_controllers::quota::repository::StoreRepository;
use pkg_state::client::StateStore;
use pkg_types::config::{QuotaControllerConfig, load_config};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "quota-operator", about = "Namespace quota controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_OPERATOR_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage (in-memory when omitted)
    #[arg(long)]
    data_dir: Option<String>,

    /// Seconds between full resyncs of every namespace
    #[arg(long, default_value_t = DEFAULT_RESYNC_INTERVAL_SECS)]
    resync_interval_secs: u64,

    /// Validate the config, print it and exit
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if cli.resync_interval_secs == 0 {
        anyhow::bail!("--resync-interval-secs must be greater than zero");
    }

    let file_cfg = load_config(&cli.config)?;
    info!("Config file: {}", cli.config);
    let config = QuotaControllerConfig::try_from(file_cfg.clone())?;

    if cli.dry_run {
        print!("{}", serde_yaml::to_string(&file_cfg)?);
        return Ok(());
    }

    if config.quotas.is_empty() {
        info!("No quota definitions configured, nothing to do");
        return Ok(());
    }

    let store = match &cli.data_dir {
        Some(dir) => StateStore::new(dir).await?,
        None => {
            info!("No data dir given, using in-memory state");
            StateStore::in_memory().await?
        }
    };

    let active = Arc::new(config.active_quota_definitions());
    info!("Starting quota-operator");
    info!("  Definitions: {}", config.quotas.len());
    info!(
        "  External:    {}",
        config.external_quota_definition_names.join(", ")
    );
    info!("  Resync:      {}s", cli.resync_interval_secs);

    let resync = Duration::from_secs(cli.resync_interval_secs);
    let handles: Vec<_> = config
        .quotas
        .into_iter()
        .map(|definition| {
            QuotaController::new(StoreRepository::new(store.clone()), definition, active.clone())
                .with_resync_interval(resync)
                .start(store.event_log.clone())
        })
        .collect();

    // Block until Ctrl-C
    info!("Operator is running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down quota-operator");

    for handle in handles {
        handle.abort();
    }
    store.close().await?;

    Ok(())
}
