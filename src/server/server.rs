use anyhow::Result;

use tracing::{error, info, warn};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{fs::File, io::BufReader};
use tokio_util::io::ReaderStream;
use tower_http::services::ServeDir;

use super::{log_requests, metrics, state::*, ServerConfig};
use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::pipeline::{ConversionOutcome, PipelineError};
use crate::staging::StagingError;
use crate::transcode::TranscodeError;

const INDEX_HTML: &str = include_str!("../../static/index.html");

const STREAM_BUFFER_SIZE: usize = 4096 * 16;

#[derive(Serialize)]
struct ConvertResponse {
    status: &'static str,
    url: String,
    name: String,
    #[serde(rename = "mp3Url", skip_serializing_if = "Option::is_none")]
    mp3_url: Option<String>,
    #[serde(rename = "mp3Name", skip_serializing_if = "Option::is_none")]
    mp3_name: Option<String>,
}

impl From<ConversionOutcome> for ConvertResponse {
    fn from(outcome: ConversionOutcome) -> Self {
        let (mp3_url, mp3_name) = match outcome.companion {
            Some(companion) => (
                Some(format!("/download/{}", companion.public_name)),
                Some(companion.display_name),
            ),
            None => (None, None),
        };
        ConvertResponse {
            status: "success",
            url: format!("/download/{}", outcome.primary.public_name),
            name: outcome.primary.display_name,
            mp3_url,
            mp3_name,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ConvertUrlForm {
    #[serde(default)]
    url: String,
}

async fn index_page() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        INDEX_HTML,
    )
}

/// POST /upload - convert an uploaded file (multipart field `file`).
async fn upload(State(pipeline): State<SharedPipeline>, mut multipart: Multipart) -> Response {
    let mut filename: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                filename = field.file_name().map(|s| s.to_string());
                match field.bytes().await {
                    Ok(bytes) => data = Some(bytes.to_vec()),
                    Err(e) => {
                        // Reads past the body cap surface here.
                        warn!("Failed to read uploaded file: {}", e);
                        return (StatusCode::BAD_REQUEST, "File too big or unreadable")
                            .into_response();
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed upload form: {}", e);
                return (StatusCode::BAD_REQUEST, "Invalid upload form").into_response();
            }
        }
    }

    let filename = match filename {
        Some(f) if !f.is_empty() => f,
        _ => return (StatusCode::BAD_REQUEST, "Invalid file").into_response(),
    };
    let data = match data {
        Some(d) if !d.is_empty() => d,
        _ => return (StatusCode::BAD_REQUEST, "Invalid file").into_response(),
    };

    match pipeline.convert_upload(&filename, &data).await {
        Ok(outcome) => {
            metrics::record_conversion("upload", "success");
            Json(ConvertResponse::from(outcome)).into_response()
        }
        Err(e) => {
            metrics::record_conversion("upload", "failure");
            conversion_error_response(e)
        }
    }
}

/// POST /convert-url - fetch and convert a remote source (form field `url`).
async fn convert_url(
    State(pipeline): State<SharedPipeline>,
    Form(form): Form<ConvertUrlForm>,
) -> Response {
    if form.url.is_empty() {
        return (StatusCode::BAD_REQUEST, "URL is required").into_response();
    }

    match pipeline.convert_url(&form.url).await {
        Ok(outcome) => {
            metrics::record_conversion("url", "success");
            Json(ConvertResponse::from(outcome)).into_response()
        }
        Err(e) => {
            metrics::record_conversion("url", "failure");
            conversion_error_response(e)
        }
    }
}

/// Map pipeline failures onto the public error surface: input problems are
/// the caller's (400), everything else is ours (500). Internal paths are
/// never leaked; encoder output is, deliberately, for diagnosability.
fn conversion_error_response(error: PipelineError) -> Response {
    match error {
        PipelineError::Staging(e) => {
            warn!("Staging failed: {}", e);
            match e {
                StagingError::Io(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string())
                }
                other => (StatusCode::BAD_REQUEST, other.to_string()),
            }
            .into_response()
        }
        PipelineError::Transcode(e) => {
            error!("Transcode failed: {}", e);
            let message = match e {
                TranscodeError::EncoderFailed { status, output } => {
                    format!("Encoder error ({}): {}", status, output)
                }
                _ => "Conversion failed".to_string(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
        PipelineError::Artifact(e) => {
            error!("Artifact publication failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Save file error").into_response()
        }
    }
}

/// GET /download/{name} - stream a published artifact as an attachment.
async fn download(State(artifacts): State<SharedArtifacts>, Path(name): Path<String>) -> Response {
    let path = match artifacts.resolve(&name) {
        Ok(path) => path,
        Err(ArtifactError::InvalidName(_)) => {
            return (StatusCode::BAD_REQUEST, "Invalid filename").into_response()
        }
        Err(ArtifactError::NotFound(_)) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Artifact lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open artifact {:?}: {}", path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let display_name = ArtifactStore::display_name_of(&name);
    let content_type = if name.to_lowercase().ends_with(".mp3") {
        "audio/mpeg"
    } else {
        "audio/amr"
    };
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        display_name,
        urlencoding::encode(&display_name)
    );

    let reader = BufReader::with_capacity(STREAM_BUFFER_SIZE, file);
    let body = Body::from_stream(ReaderStream::with_capacity(reader, STREAM_BUFFER_SIZE));

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(body)
    {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build download response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

pub fn make_app(state: ServerState) -> Router {
    let home_router: Router<ServerState> = match state.config.frontend_dir_path.clone() {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(index_page))
            .fallback(not_found),
    };

    home_router
        .route("/upload", post(upload))
        .route("/convert-url", post(convert_url))
        .route("/download/{name}", get(download))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub async fn run_server(
    config: ServerConfig,
    pipeline: SharedPipeline,
    artifacts: SharedArtifacts,
) -> Result<()> {
    let port = config.port;
    let state = ServerState::new(config, pipeline, artifacts);
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on 0.0.0.0:{}", port);

    Ok(axum::serve(listener, app).await?)
}
