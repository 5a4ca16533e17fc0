//! Test server setup: a full app wired to temp directories and a stub
//! encoder script standing in for ffmpeg.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use amrelay::pipeline::ConversionPipeline;
use amrelay::server::server::make_app;
use amrelay::server::state::ServerState;
use amrelay::server::{RequestsLoggingLevel, ServerConfig};
use amrelay::{ArtifactStore, MetadataResolver, Stager, Transcoder};

/// A stub encoder that copies its input (`-i` argument) to the output
/// (final argument), mimicking ffmpeg's calling convention.
const OK_ENCODER: &str =
    "#!/bin/sh\nin=\"$3\"\nfor last in \"$@\"; do :; done\ncp \"$in\" \"$last\"\n";

/// A stub encoder that always fails with a recognizable message.
const FAILING_ENCODER: &str = "#!/bin/sh\necho \"stub encoder exploded\" >&2\nexit 1\n";

pub struct TestServerOptions {
    pub max_upload_bytes: usize,
    pub metadata_base_url: String,
    pub failing_encoder: bool,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 << 20,
            metadata_base_url: "http://127.0.0.1:1".to_string(),
            failing_encoder: false,
        }
    }
}

pub struct TestServer {
    pub base_url: String,
    pub downloads_dir: PathBuf,
    pub scratch_dir: PathBuf,
    // Held so the temp tree outlives the test.
    _dirs: tempfile::TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let dirs = tempfile::tempdir().unwrap();
        let downloads_dir = dirs.path().join("downloads");
        let scratch_dir = dirs.path().join("temp");

        let encoder_body = if options.failing_encoder {
            FAILING_ENCODER
        } else {
            OK_ENCODER
        };
        let encoder = write_script(dirs.path(), "stub-ffmpeg", encoder_body);

        let client = reqwest::Client::new();
        let artifacts = ArtifactStore::new(&downloads_dir);
        artifacts.init().await.unwrap();

        let pipeline = ConversionPipeline::new(
            Stager::new(&scratch_dir),
            Transcoder::with_path(&encoder),
            artifacts.clone(),
            MetadataResolver::new(client.clone(), options.metadata_base_url),
            client,
        );

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port: 0,
            max_upload_bytes: options.max_upload_bytes,
            frontend_dir_path: None,
        };
        let state = ServerState::new(config, Arc::new(pipeline), Arc::new(artifacts));
        let app = make_app(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            base_url: format!("http://{}", addr),
            downloads_dir,
            scratch_dir,
            _dirs: dirs,
        }
    }
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Serve fixed bytes at `/audio/clip.mp3` on an ephemeral port.
pub async fn spawn_file_host(payload: &'static [u8]) -> String {
    let app = axum::Router::new().route(
        "/audio/clip.mp3",
        axum::routing::get(move || async move { payload }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

/// Stub of the metadata text service: answers `?type=name|artist` with the
/// given strings and `?type=url` with audio bytes.
pub async fn spawn_metadata_service(
    title: &'static str,
    artist: &'static str,
    audio: &'static [u8],
) -> String {
    use axum::extract::Query;
    use std::collections::HashMap;

    let handler = move |Query(params): Query<HashMap<String, String>>| async move {
        match params.get("type").map(String::as_str) {
            Some("name") => axum::body::Bytes::from_static(title.as_bytes()),
            Some("artist") => axum::body::Bytes::from_static(artist.as_bytes()),
            Some("url") => axum::body::Bytes::from_static(audio),
            _ => axum::body::Bytes::new(),
        }
    };

    let app = axum::Router::new().route("/", axum::routing::get(handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

/// Build a multipart/form-data body with a single file field.
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = "amrelay-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; \
             filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
