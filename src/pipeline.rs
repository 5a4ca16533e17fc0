//! Orchestration of one conversion request: stage the source, run the
//! encoder, publish the result, and clean up the intermediates.
//!
//! Both entry points (upload, URL) funnel into the same job runner. The
//! staged input is removed on every exit path; the encoder output is
//! removed once it has been copied into the artifact store.

use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::{sanitize_display_name, ArtifactError, ArtifactStore};
use crate::resolver::{recognize_track_id, MetadataResolver};
use crate::staging::{StagedInput, Stager, StagingError};
use crate::transcode::{TranscodeError, Transcoder};

/// Base name used when nothing better can be derived from the source.
pub const DEFAULT_BASE_NAME: &str = "amrelay";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// One published file as seen by the client.
#[derive(Debug, Clone)]
pub struct PublishedFile {
    /// Name under which the artifact store serves the file.
    pub public_name: String,
    /// Human-readable name offered to the client for saving.
    pub display_name: String,
}

/// Result of a completed conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub primary: PublishedFile,
    /// The retained original, present only for recognized remote sources.
    pub companion: Option<PublishedFile>,
}

/// Runs conversions end to end. Shared read-only across requests.
pub struct ConversionPipeline {
    stager: Stager,
    transcoder: Transcoder,
    artifacts: ArtifactStore,
    resolver: MetadataResolver,
    client: reqwest::Client,
}

impl ConversionPipeline {
    pub fn new(
        stager: Stager,
        transcoder: Transcoder,
        artifacts: ArtifactStore,
        resolver: MetadataResolver,
        client: reqwest::Client,
    ) -> Self {
        Self {
            stager,
            transcoder,
            artifacts,
            resolver,
            client,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Convert an uploaded file. The original is owned by the uploader, so
    /// no companion is retained.
    pub async fn convert_upload(
        &self,
        original_filename: &str,
        data: &[u8],
    ) -> Result<ConversionOutcome, PipelineError> {
        let base_name = file_stem_of(original_filename)
            .unwrap_or_else(|| DEFAULT_BASE_NAME.to_string());
        let staged = self.stager.stage_bytes(data).await?;
        let outcome = self.run_job(&staged, &base_name, false).await?;
        info!("Converted upload: {}", original_filename);
        Ok(outcome)
    }

    /// Convert a remote URL.
    ///
    /// Recognized sources are rerouted through the metadata service: the
    /// fetch URL is rewritten to the canonical audio endpoint, the filename
    /// comes from the joined title/artist lookup, and the fetched original
    /// is retained as a companion download. Everything else falls back to
    /// the URL's path basename, then to the fixed default.
    pub async fn convert_url(&self, url: &str) -> Result<ConversionOutcome, PipelineError> {
        let mut fetch_url = url.to_string();
        let mut retain_original = false;
        let mut base_name: Option<String> = None;

        if let Some(track_id) = recognize_track_id(url) {
            info!("Recognized track id {} in submitted URL", track_id);
            retain_original = true;
            let metadata = self.resolver.resolve(&track_id).await;
            base_name = metadata
                .filename_candidate()
                .map(|candidate| sanitize_display_name(&candidate));
            fetch_url = self.resolver.audio_url(&track_id);
        }

        let base_name = base_name
            .or_else(|| base_name_from_url(&fetch_url))
            .unwrap_or_else(|| DEFAULT_BASE_NAME.to_string());

        let staged = self.stager.stage_url(&self.client, &fetch_url).await?;
        let outcome = self.run_job(&staged, &base_name, retain_original).await?;
        info!(
            "Converted URL: {} -> {}",
            url, outcome.primary.display_name
        );
        Ok(outcome)
    }

    /// Transcode a staged input and publish the results.
    ///
    /// The staged input itself is dropped (and thereby deleted) by the
    /// caller; this only manages the encoder output it creates.
    async fn run_job(
        &self,
        staged: &StagedInput,
        base_name: &str,
        retain_original: bool,
    ) -> Result<ConversionOutcome, PipelineError> {
        let output_path = self.transcoder.transcode(staged.path()).await?;

        let publication = self.publish_all(staged, &output_path, base_name, retain_original).await;

        // The encoder output has served its purpose whether or not
        // publication succeeded; removal failures are advisory.
        if let Err(e) = tokio::fs::remove_file(&output_path).await {
            warn!("Failed to remove encoder output {:?}: {}", output_path, e);
        }

        publication
    }

    async fn publish_all(
        &self,
        staged: &StagedInput,
        output_path: &Path,
        base_name: &str,
        retain_original: bool,
    ) -> Result<ConversionOutcome, PipelineError> {
        let display_name = format!("{}.amr", base_name);
        let public_name = self.artifacts.publish(output_path, &display_name).await?;

        let companion = if retain_original {
            match self
                .artifacts
                .publish_companion(staged.path(), &public_name)
                .await
            {
                Ok(companion_public) => Some(PublishedFile {
                    public_name: companion_public,
                    display_name: format!("{}.mp3", base_name),
                }),
                Err(e) => {
                    // The companion is a bonus; its loss does not fail the job.
                    warn!("Failed to publish companion original: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(ConversionOutcome {
            primary: PublishedFile {
                public_name,
                display_name,
            },
            companion,
        })
    }
}

fn file_stem_of(filename: &str) -> Option<String> {
    let stem = Path::new(filename).file_stem()?.to_string_lossy().to_string();
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}

/// Base name from a URL's final path segment, minus its extension.
/// `None` for degenerate paths (`/`, empty, `.`).
fn base_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?;
    let stem = Path::new(segment).file_stem()?.to_string_lossy().to_string();
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}
