//! Staging of untrusted input into request-scoped scratch files.
//!
//! Every source (uploaded bytes or a fetched remote URL) is materialized
//! into a uniquely named file inside the scratch directory before the
//! encoder ever sees it. The file is owned by the request that staged it
//! and is removed when the [`StagedInput`] is dropped, on every exit path.

use futures::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// User-Agent sent on remote fetches; some hosts refuse unidentified clients.
const FETCH_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Errors that can occur while staging a source.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid URL: {0}")]
    BadUrl(String),

    #[error("failed to download file: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("download failed with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transient scratch file holding one request's input.
///
/// Deleted exactly once, when dropped. Never shared across requests.
#[derive(Debug)]
pub struct StagedInput {
    file: NamedTempFile,
}

impl StagedInput {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Creates scratch files for inbound sources.
#[derive(Debug, Clone)]
pub struct Stager {
    scratch_dir: PathBuf,
}

impl Stager {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Write uploaded bytes to a fresh scratch file.
    ///
    /// The HTTP layer caps the request body before this is reached, so the
    /// data is already bounded.
    pub async fn stage_bytes(&self, data: &[u8]) -> Result<StagedInput, StagingError> {
        let temp = self.create_scratch("upload-").await?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        file.write_all(data).await?;
        file.flush().await?;
        debug!("Staged {} uploaded bytes at {:?}", data.len(), temp.path());
        Ok(StagedInput { file: temp })
    }

    /// Fetch a remote URL and stream its body to a fresh scratch file.
    ///
    /// Requires a 200 from upstream. The body is written chunk by chunk,
    /// never buffered whole in memory.
    pub async fn stage_url(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<StagedInput, StagingError> {
        let request = client
            .get(url)
            .header(USER_AGENT, FETCH_USER_AGENT)
            .build()
            .map_err(|e| StagingError::BadUrl(e.to_string()))?;

        let response = client.execute(request).await?;
        if response.status() != StatusCode::OK {
            return Err(StagingError::UpstreamStatus(response.status()));
        }

        let temp = self.create_scratch("url-").await?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Staged {} fetched bytes at {:?}", written, temp.path());
        Ok(StagedInput { file: temp })
    }

    /// Create a uniquely named scratch file, making the directory on demand.
    async fn create_scratch(&self, prefix: &str) -> Result<NamedTempFile, std::io::Error> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".mp3")
            .tempfile_in(&self.scratch_dir)
    }
}
