//! Narrowband audio transcoding via the external ffmpeg executable.
//!
//! Every job is converted with the same fixed profile: mono, 8 kHz,
//! AMR-NB. The encoder location is resolved once at startup and is
//! immutable afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Errors that can occur while locating or running the encoder.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("ffmpeg not found; place an ffmpeg binary next to the server or install it on PATH")]
    EncoderNotFound,

    #[error("ffmpeg exited with {status}: {output}")]
    EncoderFailed { status: String, output: String },

    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Extension appended to every transcoded output.
pub const OUTPUT_EXTENSION: &str = "amr";

/// Handle to a located ffmpeg executable.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg_path: PathBuf,
}

impl Transcoder {
    /// Resolve the encoder executable: an explicit path wins, then an
    /// `ffmpeg` binary in the working directory, then PATH lookup.
    /// Whatever is found is verified by running `ffmpeg -version` once.
    pub async fn locate(explicit: Option<PathBuf>) -> Result<Self, TranscodeError> {
        if let Some(path) = explicit {
            if !probe(&path).await {
                return Err(TranscodeError::EncoderNotFound);
            }
            info!("Using configured ffmpeg at {:?}", path);
            return Ok(Self { ffmpeg_path: path });
        }

        let local = std::env::current_dir()
            .map(|cwd| cwd.join("ffmpeg"))
            .unwrap_or_else(|_| PathBuf::from("ffmpeg"));
        if local.is_file() && probe(&local).await {
            info!("Using local ffmpeg at {:?}", local);
            return Ok(Self { ffmpeg_path: local });
        }

        let system = PathBuf::from("ffmpeg");
        if probe(&system).await {
            info!("Using system ffmpeg from PATH");
            return Ok(Self { ffmpeg_path: system });
        }

        Err(TranscodeError::EncoderNotFound)
    }

    /// Build a transcoder around a known executable without probing it.
    pub fn with_path(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    /// Convert `input` to AMR-NB next to itself, returning the output path.
    ///
    /// The output path is the input path with `.amr` appended, and any
    /// existing file there is overwritten (`-y`). On nonzero exit the error
    /// carries the process's combined stdout/stderr so the failure can be
    /// diagnosed without re-running.
    pub async fn transcode(&self, input: &Path) -> Result<PathBuf, TranscodeError> {
        let mut output_os = input.as_os_str().to_os_string();
        output_os.push(".");
        output_os.push(OUTPUT_EXTENSION);
        let output_path = PathBuf::from(output_os);

        let output = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ac", "1", "-ar", "8000", "-c:a", "libopencore_amrnb"])
            .arg(&output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            if !combined.is_empty() && !output.stderr.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(TranscodeError::EncoderFailed {
                status: output.status.to_string(),
                output: combined,
            });
        }

        Ok(output_path)
    }
}

async fn probe(path: &Path) -> bool {
    Command::new(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
