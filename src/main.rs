use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod artifacts;
mod pipeline;
mod resolver;
mod staging;
mod sweeper;
mod transcode;

mod config;
use config::{AppConfig, CliConfig, FileConfig};

mod server;
use server::{run_server, RequestsLoggingLevel, ServerConfig};

use artifacts::ArtifactStore;
use pipeline::ConversionPipeline;
use resolver::MetadataResolver;
use staging::Stager;
use transcode::Transcoder;

#[derive(Parser, Debug)]
struct CliArgs {
    /// The port to listen on.
    #[clap(short, long, default_value_t = 8080)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// Directory where published artifacts are served from.
    #[clap(long, default_value = "downloads")]
    pub downloads_dir: PathBuf,

    /// Directory for per-request scratch files.
    #[clap(long, default_value = "temp")]
    pub scratch_dir: PathBuf,

    /// Explicit path to the ffmpeg executable. Defaults to an `ffmpeg`
    /// binary in the working directory, then PATH lookup.
    #[clap(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Base URL of the track metadata service.
    #[clap(long, default_value = "https://v.iarc.top")]
    pub metadata_base_url: String,

    /// Timeout in seconds for outbound fetches.
    #[clap(long, default_value_t = 300)]
    pub fetch_timeout_secs: u64,

    /// Maximum accepted upload size in MiB.
    #[clap(long, default_value_t = 50)]
    pub max_upload_mib: u64,

    /// Age in seconds past which published artifacts are deleted.
    #[clap(long, default_value_t = 3600)]
    pub retention_secs: u64,

    /// Interval in seconds between retention sweeps.
    #[clap(long, default_value_t = 600)]
    pub sweep_interval_secs: u64,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to a frontend directory to be statically served instead of the
    /// embedded page.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Path to an optional TOML config file; its values override CLI args.
    #[clap(long)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            port: self.port,
            metrics_port: self.metrics_port,
            downloads_dir: self.downloads_dir.clone(),
            scratch_dir: self.scratch_dir.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            metadata_base_url: self.metadata_base_url.clone(),
            fetch_timeout_secs: self.fetch_timeout_secs,
            max_upload_mib: self.max_upload_mib,
            retention_secs: self.retention_secs,
            sweep_interval_secs: self.sweep_interval_secs,
            logging_level: self.logging_level.clone(),
            frontend_dir_path: self.frontend_dir_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("amrelay {} starting", env!("GIT_HASH"));

    server::metrics::init_metrics();

    let transcoder = Transcoder::locate(config.ffmpeg_path.clone())
        .await
        .context("Cannot start without a working encoder")?;

    let client = reqwest::Client::builder()
        .timeout(config.fetch_timeout())
        .build()
        .context("Failed to create HTTP client")?;

    let artifacts = ArtifactStore::new(config.downloads_dir.clone());
    artifacts
        .init()
        .await
        .context("Failed to create downloads directory")?;

    let pipeline = ConversionPipeline::new(
        Stager::new(config.scratch_dir.clone()),
        transcoder,
        artifacts.clone(),
        MetadataResolver::new(client.clone(), config.metadata_base_url.clone()),
        client,
    );

    sweeper::spawn_retention_sweeper(
        config.downloads_dir.clone(),
        config.sweep_interval(),
        config.retention(),
    );

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = server::metrics::run_metrics_server(metrics_port).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        max_upload_bytes: config.max_upload_bytes(),
        frontend_dir_path: config.frontend_dir_path.clone(),
    };

    info!("Ready to serve at port {}!", config.port);
    info!("Metrics available at port {}!", config.metrics_port);
    run_server(server_config, Arc::new(pipeline), Arc::new(artifacts)).await
}
