use anyhow::{Context, Result};
use clap::Parser;
use s3_backup_manager::backup::{BackupScheduler, BashShell, ObjectStoreTransfer, DEFAULT_SHELL};
use s3_backup_manager::config::{
    parse_logging_level, AppConfig, CliConfig, FileConfig, DEFAULT_LOGGING_LEVEL,
    DEFAULT_SHUTDOWN_GRACE_SECS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(version, about = "Runs scheduled shell backups and uploads the artifacts to S3")]
struct CliArgs {
    /// Path to the TOML config file, or to a directory containing config.toml.
    #[clap(long, env = "CONFIG_PATH", value_parser = parse_path)]
    pub config: PathBuf,

    /// Logging level used when the config file doesn't set one.
    #[clap(long, default_value = DEFAULT_LOGGING_LEVEL)]
    pub logging_level: String,

    /// Shell used to run backup commands.
    #[clap(long, default_value = DEFAULT_SHELL)]
    pub shell: String,

    /// Seconds to wait for in-flight backups on shutdown.
    #[clap(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_secs: u64,

    /// Validate the configuration, print it and exit.
    #[clap(long)]
    pub check: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            logging_level: self.logging_level.clone(),
            shell: self.shell.clone(),
            shutdown_grace_secs: self.shutdown_grace_secs,
        }
    }
}

fn init_logging(default_level: LevelFilter) -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = FileConfig::load(&cli_args.config)?;

    // Logging comes up before validation so resolve() warnings are visible
    let requested_level = file_config
        .logging_level
        .clone()
        .unwrap_or_else(|| cli_args.logging_level.clone());
    init_logging(parse_logging_level(&requested_level).unwrap_or(LevelFilter::INFO))?;

    info!("Loading config from {:?}", cli_args.config);
    let app_config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let rendered = serde_json::to_string_pretty(&app_config)?;
    if cli_args.check {
        println!("{}", rendered);
        return Ok(());
    }
    debug!("Resolved config:\n{}", rendered);

    let transfer = Arc::new(ObjectStoreTransfer::new(app_config.storage.clone()));
    let shell = Arc::new(BashShell::new(app_config.shell.clone()));

    let shutdown_token = CancellationToken::new();
    let scheduler = BackupScheduler::new(
        app_config.backups.clone(),
        shell,
        transfer,
        app_config.cleanup,
    );
    let handle = scheduler.start(shutdown_token.clone()).await;

    wait_for_shutdown_signal().await?;
    info!("Shutdown requested, waiting for running backups to finish");

    if !handle.shutdown(app_config.shutdown_grace()).await {
        warn!(
            "Some backups did not finish within {:?}",
            app_config.shutdown_grace()
        );
    }

    info!("gracefully stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, initiating graceful shutdown");
    Ok(())
}
