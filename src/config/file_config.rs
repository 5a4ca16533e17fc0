use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Optional TOML configuration. Every field overrides the matching CLI
/// argument when present.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub downloads_dir: Option<String>,
    pub scratch_dir: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub metadata_base_url: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
    pub max_upload_mib: Option<u64>,
    pub retention_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
