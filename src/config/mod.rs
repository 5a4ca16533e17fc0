mod file_config;

pub use file_config::FileConfig;

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments eligible for config resolution. Mirrors the fields a TOML
/// config file may override.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub downloads_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,
    pub metadata_base_url: String,
    pub fetch_timeout_secs: u64,
    pub max_upload_mib: u64,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            metrics_port: 9090,
            downloads_dir: PathBuf::from("downloads"),
            scratch_dir: PathBuf::from("temp"),
            ffmpeg_path: None,
            metadata_base_url: "https://v.iarc.top".to_string(),
            fetch_timeout_secs: 300,
            max_upload_mib: 50,
            retention_secs: 3600,
            sweep_interval_secs: 600,
            logging_level: RequestsLoggingLevel::default(),
            frontend_dir_path: None,
        }
    }
}

/// Fully resolved process configuration, fixed at startup and passed
/// explicitly into every component that needs it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub downloads_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,
    pub metadata_base_url: String,
    pub fetch_timeout_secs: u64,
    pub max_upload_mib: u64,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let max_upload_mib = file.max_upload_mib.unwrap_or(cli.max_upload_mib);
        if max_upload_mib == 0 {
            bail!("max_upload_mib must be at least 1");
        }

        let sweep_interval_secs = file.sweep_interval_secs.unwrap_or(cli.sweep_interval_secs);
        if sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be at least 1");
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        Ok(Self {
            port: file.port.unwrap_or(cli.port),
            metrics_port: file.metrics_port.unwrap_or(cli.metrics_port),
            downloads_dir: file
                .downloads_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.downloads_dir.clone()),
            scratch_dir: file
                .scratch_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.scratch_dir.clone()),
            ffmpeg_path: file
                .ffmpeg_path
                .map(PathBuf::from)
                .or_else(|| cli.ffmpeg_path.clone()),
            metadata_base_url: file
                .metadata_base_url
                .unwrap_or_else(|| cli.metadata_base_url.clone()),
            fetch_timeout_secs: file.fetch_timeout_secs.unwrap_or(cli.fetch_timeout_secs),
            max_upload_mib,
            retention_secs: file.retention_secs.unwrap_or(cli.retention_secs),
            sweep_interval_secs,
            logging_level,
            frontend_dir_path: file.frontend_dir_path.or_else(|| cli.frontend_dir_path.clone()),
        })
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mib as usize) << 20
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_pass_through_without_file_config() {
        let cli = CliConfig::default();
        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.downloads_dir, PathBuf::from("downloads"));
        assert_eq!(config.max_upload_bytes(), 50 << 20);
        assert_eq!(config.retention(), Duration::from_secs(3600));
        assert_eq!(config.sweep_interval(), Duration::from_secs(600));
    }

    #[test]
    fn file_config_overrides_cli() {
        let cli = CliConfig::default();
        let file: FileConfig = toml::from_str(
            r#"
            port = 9999
            downloads_dir = "public"
            max_upload_mib = 10
            logging_level = "headers"
            "#,
        )
        .unwrap();

        let config = AppConfig::resolve(&cli, Some(file)).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.downloads_dir, PathBuf::from("public"));
        assert_eq!(config.max_upload_bytes(), 10 << 20);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        // Untouched fields keep CLI values.
        assert_eq!(config.metrics_port, 9090);
    }

    #[test]
    fn zero_upload_cap_is_rejected() {
        let cli = CliConfig::default();
        let file: FileConfig = toml::from_str("max_upload_mib = 0").unwrap();
        assert!(AppConfig::resolve(&cli, Some(file)).is_err());
    }
}
