//! Published artifact naming, storage and lookup.
//!
//! Finished files are copied into the public downloads directory under a
//! `{unix_seconds}_{sanitized_name}` public name. The timestamp prefix keeps
//! concurrent publications of identically named files apart and lets the
//! original display name be recovered by stripping everything up to the
//! first underscore.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Errors from publishing or resolving artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("no such artifact: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extension of the transcoded output.
const PRIMARY_EXTENSION: &str = ".amr";
/// Extension of the retained original.
const COMPANION_EXTENSION: &str = ".mp3";

/// Sanitized display names are cut to this many characters before the
/// timestamp prefix is added, keeping filesystem names within safe limits.
const MAX_SANITIZED_LEN: usize = 50;

/// How many `~n` disambiguators to try when a publication collides with an
/// existing file of the same second and name.
const MAX_COLLISION_RETRIES: u32 = 100;

/// Replace every filesystem-hostile character with an underscore.
///
/// Only the listed characters are touched; spaces and non-ASCII text pass
/// through unchanged. Idempotent.
pub fn sanitize_display_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Store of publicly downloadable artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    downloads_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Create the downloads directory if it does not exist yet.
    pub async fn init(&self) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        Ok(())
    }

    /// Publish a finished transcode under a fresh timestamped public name.
    ///
    /// Bytes are copied, not moved; the source file stays owned by the
    /// caller. The display name is forced to end in `.amr`.
    pub async fn publish(
        &self,
        source: &Path,
        display_name: &str,
    ) -> Result<String, ArtifactError> {
        let display_name = ensure_extension(display_name, PRIMARY_EXTENSION);
        let timestamp = unix_now();
        self.publish_as(source, timestamp, &display_name, PRIMARY_EXTENSION)
            .await
    }

    /// Publish the retained original next to an already published primary.
    ///
    /// The companion reuses the primary's timestamp prefix and display name
    /// with the extension swapped to `.mp3`, so the two stay correlated.
    pub async fn publish_companion(
        &self,
        source: &Path,
        primary_public_name: &str,
    ) -> Result<String, ArtifactError> {
        let (timestamp, primary_display) = split_public_name(primary_public_name)
            .ok_or_else(|| ArtifactError::InvalidName(primary_public_name.to_string()))?;
        let display_name = swap_extension(primary_display, PRIMARY_EXTENSION, COMPANION_EXTENSION);
        self.publish_as(source, timestamp, &display_name, COMPANION_EXTENSION)
            .await
    }

    async fn publish_as(
        &self,
        source: &Path,
        timestamp: u64,
        display_name: &str,
        extension: &str,
    ) -> Result<String, ArtifactError> {
        tokio::fs::create_dir_all(&self.downloads_dir).await?;

        let safe = truncate_chars(&sanitize_display_name(display_name), MAX_SANITIZED_LEN);
        let safe = ensure_extension(&safe, extension);
        let stem = safe
            .strip_suffix(extension)
            .unwrap_or(safe.as_str())
            .to_string();

        // Claim a name atomically; a same-second publication of the same
        // display name gets a ~n disambiguator instead of overwriting.
        for attempt in 0..=MAX_COLLISION_RETRIES {
            let public_name = if attempt == 0 {
                format!("{}_{}{}", timestamp, stem, extension)
            } else {
                format!("{}_{}~{}{}", timestamp, stem, attempt, extension)
            };
            let target = self.downloads_dir.join(&public_name);

            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await;
            match created {
                Ok(mut target_file) => {
                    let mut source_file = tokio::fs::File::open(source).await?;
                    tokio::io::copy(&mut source_file, &mut target_file).await?;
                    debug!("Published artifact {}", public_name);
                    return Ok(public_name);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(ArtifactError::Io(std::io::Error::other(
            "could not claim a unique artifact name",
        )))
    }

    /// Resolve a public name to its path on disk.
    ///
    /// Names carrying a parent-directory token or a path separator are
    /// rejected before any filesystem access; this is the sole defense
    /// against traversal.
    pub fn resolve(&self, public_name: &str) -> Result<PathBuf, ArtifactError> {
        if public_name.is_empty()
            || public_name.contains("..")
            || public_name.contains('/')
            || public_name.contains('\\')
        {
            return Err(ArtifactError::InvalidName(public_name.to_string()));
        }

        let path = self.downloads_dir.join(public_name);
        if !path.is_file() {
            return Err(ArtifactError::NotFound(public_name.to_string()));
        }
        Ok(path)
    }

    /// Recover the human-readable name by stripping the timestamp prefix.
    ///
    /// Splits on the first underscore only; display names may themselves
    /// contain underscores.
    pub fn display_name_of(public_name: &str) -> String {
        match public_name.split_once('_') {
            Some((_, rest)) => rest.to_string(),
            None => public_name.to_string(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn split_public_name(public_name: &str) -> Option<(u64, &str)> {
    let (prefix, rest) = public_name.split_once('_')?;
    let timestamp = prefix.parse::<u64>().ok()?;
    Some((timestamp, rest))
}

fn ensure_extension(name: &str, extension: &str) -> String {
    if name.to_lowercase().ends_with(extension) {
        name.to_string()
    } else {
        format!("{}{}", name, extension)
    }
}

fn swap_extension(name: &str, from: &str, to: &str) -> String {
    match name.strip_suffix(from) {
        Some(stem) => format!("{}{}", stem, to),
        None => format!("{}{}", name, to),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitization_replaces_every_illegal_character() {
        assert_eq!(
            sanitize_display_name(r#"a\b/c:d*e?f"g<h>i|j"#),
            "a_b_c_d_e_f_g_h_i_j"
        );
    }

    #[test]
    fn sanitization_preserves_spaces_and_unicode() {
        assert_eq!(sanitize_display_name("My Song"), "My Song");
        assert_eq!(sanitize_display_name("晴天_周杰伦"), "晴天_周杰伦");
    }

    #[test]
    fn sanitization_is_idempotent() {
        let once = sanitize_display_name(r#"a/b\c: d"#);
        assert_eq!(sanitize_display_name(&once), once);
    }

    #[tokio::test]
    async fn publish_then_display_name_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let source = dir.path().join("out.amr");
        std::fs::write(&source, b"amr-bytes").unwrap();

        let public = store.publish(&source, "My Song").await.unwrap();
        assert!(public.ends_with("My Song.amr"));
        assert_eq!(ArtifactStore::display_name_of(&public), "My Song.amr");

        let resolved = store.resolve(&public).unwrap();
        assert_eq!(std::fs::read(resolved).unwrap(), b"amr-bytes");
    }

    #[tokio::test]
    async fn display_names_with_underscores_survive_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let source = dir.path().join("out.amr");
        std::fs::write(&source, b"x").unwrap();

        let public = store.publish(&source, "Song_Artist").await.unwrap();
        assert_eq!(ArtifactStore::display_name_of(&public), "Song_Artist.amr");
    }

    #[tokio::test]
    async fn same_second_collisions_get_disambiguated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let source = dir.path().join("out.amr");
        std::fs::write(&source, b"x").unwrap();

        // Publishing twice within one second must not overwrite.
        let first = store.publish(&source, "clip").await.unwrap();
        let second = store.publish(&source, "clip").await.unwrap();
        assert_ne!(first, second);
        assert!(store.resolve(&first).is_ok());
        assert!(store.resolve(&second).is_ok());
    }

    #[tokio::test]
    async fn companion_shares_primary_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let amr = dir.path().join("out.amr");
        let mp3 = dir.path().join("in.mp3");
        std::fs::write(&amr, b"amr").unwrap();
        std::fs::write(&mp3, b"mp3").unwrap();

        let primary = store.publish(&amr, "Song_Artist").await.unwrap();
        let companion = store.publish_companion(&mp3, &primary).await.unwrap();

        let primary_ts = primary.split('_').next().unwrap();
        let companion_ts = companion.split('_').next().unwrap();
        assert_eq!(primary_ts, companion_ts);
        assert!(companion.ends_with(".mp3"));
        assert_eq!(
            ArtifactStore::display_name_of(&companion),
            "Song_Artist.mp3"
        );
    }

    #[tokio::test]
    async fn overlong_names_are_truncated_but_keep_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let source = dir.path().join("out.amr");
        std::fs::write(&source, b"x").unwrap();

        let long_name = "x".repeat(200);
        let public = store.publish(&source, &long_name).await.unwrap();
        assert!(public.ends_with(".amr"));

        let display = ArtifactStore::display_name_of(&public);
        // 50 sanitized characters plus the re-appended extension.
        assert!(display.chars().count() <= MAX_SANITIZED_LEN + PRIMARY_EXTENSION.len());
    }

    #[test]
    fn resolve_rejects_traversal_before_touching_disk() {
        let store = ArtifactStore::new("/definitely/not/a/real/dir");
        for name in ["../etc/passwd", "a/b.amr", "a\\b.amr", "..", ""] {
            assert!(
                matches!(store.resolve(name), Err(ArtifactError::InvalidName(_))),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[tokio::test]
    async fn resolve_unknown_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.init().await.unwrap();

        assert!(matches!(
            store.resolve("123_missing.amr"),
            Err(ArtifactError::NotFound(_))
        ));
    }
}
