use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};

mod metrics;

use lovanote::engine::EngineConfig;
use lovanote::relay::RunOutcome;
use lovanote::store::{StoreClient, StoreConfig};
use lovanote::{TranscribeOpts, Transcriber};

/// Audio formats the transcribe endpoint accepts, by file extension.
const ALLOWED_AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a"];

#[derive(Parser, Debug)]
#[command(name = "lovanote-server")]
#[command(about = "HTTP server for streaming audio transcription")]
struct Params {
    /// Host interface to bind to.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,

    /// Maximum request body size (bytes).
    #[arg(long = "max-bytes", default_value_t = 100 * 1024 * 1024)]
    max_bytes: usize,

    /// Transcription engine executable.
    #[arg(long = "engine", default_value = "python3")]
    engine: String,

    /// Leading argument for the engine, before the audio path (repeatable).
    #[arg(long = "engine-arg", default_values_t = [String::from("whisper-transcribe.py")])]
    engine_args: Vec<String>,

    /// Directory staged uploads are written to (created if missing).
    #[arg(long = "scratch-dir", default_value = "/tmp/lovanote")]
    scratch_dir: PathBuf,
}

#[derive(Clone)]
struct AppState {
    transcriber: Arc<Transcriber>,
    store: Option<Arc<StoreClient>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    #[serde(default)]
    file: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Serialize)]
struct UploadErrorBody {
    error: String,
    details: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    lovanote::init_logging();

    if let Err(err) = run().await {
        error!(error = ?err, "lovanote-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();

    metrics::init();

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let engine = EngineConfig::new(&params.engine, &params.engine_args);
    let transcriber = Transcriber::new(&params.scratch_dir, engine)
        .await
        .context("failed to prepare the scratch directory")?;

    let store = match StoreConfig::from_env().and_then(StoreClient::new) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            warn!(error = %err, "object store uploads disabled");
            None
        }
    };

    let state = AppState {
        transcriber: Arc::new(transcriber),
        store,
    };

    let app = app(state, params.max_bytes);

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn app(state: AppState, max_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/api/transcribe", post(transcribe))
        .route("/api/upload", post(upload))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_bytes))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}

async fn root() -> &'static str {
    "lovanote-server: POST /api/transcribe (multipart field: audio), POST /api/upload (json field: file)"
}

async fn healthz() -> &'static str {
    "ok"
}

/// One parsed transcribe request: the audio upload plus its optional engine options.
struct TranscribeRequest {
    file_name: String,
    bytes: axum::body::Bytes,
    language: Option<String>,
    model: Option<String>,
}

async fn transcribe(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Response, AppError> {
    let request = read_transcribe_request(&mut multipart).await?;

    let opts = TranscribeOpts {
        language: request.language,
        model: request.model,
    };

    // Staging and spawning happen before the stream opens, so their failures can still
    // become plain HTTP errors. Everything after this point reports in-band.
    let run = state
        .transcriber
        .start(&request.file_name, &request.bytes, &opts)
        .await
        .map_err(|err| {
            error!(error = %err, "failed to start transcription");
            AppError::internal(err.to_string())
        })?;

    let (out_tx, out_rx) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        match run.relay_to(out_tx).await {
            Ok(RunOutcome::Transcript(_)) => {
                metrics::record_transcription_outcome("transcript");
            }
            Ok(RunOutcome::EngineFailure { message }) => {
                metrics::record_transcription_outcome("engine_failure");
                info!(%message, "engine reported failure");
            }
            Err(err) => {
                // Usually the client went away; the engine was killed with the relay.
                metrics::record_transcription_outcome("aborted");
                warn!(error = %err, "transcription relay aborted");
            }
        }
    });

    let body = Body::from_stream(ReaderStream::new(out_rx));
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )],
        body,
    )
        .into_response())
}

async fn read_transcribe_request(
    multipart: &mut Multipart,
) -> std::result::Result<TranscribeRequest, AppError> {
    let mut audio: Option<(String, axum::body::Bytes)> = None;
    let mut language = None;
    let mut model = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "audio" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                audio = Some((file_name, bytes));
            }
            "language" => language = read_text_field(field).await?,
            "model" => model = read_text_field(field).await?,
            // Unknown fields are ignored; browser form posts are lenient.
            _ => {}
        }
    }

    let Some((file_name, bytes)) = audio else {
        return Err(AppError::bad_request("No file provided"));
    };
    if bytes.is_empty() {
        return Err(AppError::bad_request("No file provided"));
    }
    if !has_allowed_extension(&file_name) {
        return Err(AppError::bad_request(format!(
            "unsupported file type '{file_name}' (expected mp3, wav, or m4a)"
        )));
    }

    Ok(TranscribeRequest {
        file_name,
        bytes,
        language,
        model,
    })
}

async fn read_text_field(field: Field<'_>) -> std::result::Result<Option<String>, AppError> {
    let text = field
        .text()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    let text = text.trim().to_string();
    Ok((!text.is_empty()).then_some(text))
}

fn has_allowed_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_AUDIO_EXTENSIONS.iter().any(|allowed| *allowed == ext)
        })
}

async fn upload(State(state): State<AppState>, Json(request): Json<UploadRequest>) -> Response {
    let file = request
        .file
        .as_deref()
        .map(str::trim)
        .filter(|file| !file.is_empty());
    let Some(file) = file else {
        return upload_failure("request had no file reference");
    };

    let Some(store) = &state.store else {
        return upload_failure("object store is not configured");
    };

    match store.upload(file).await {
        Ok(url) => (StatusCode::OK, Json(UploadResponse { url })).into_response(),
        Err(err) => {
            error!(error = %err, "store upload failed");
            let details = match err {
                lovanote::Error::Upload(detail) => detail,
                other => other.to_string(),
            };
            upload_failure(details)
        }
    }
}

fn upload_failure(details: impl ToString) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(UploadErrorBody {
            error: "store upload failed".to_string(),
            details: details.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state(engine: EngineConfig) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let transcriber = Transcriber::new(dir.path(), engine)
            .await
            .expect("transcriber");
        let state = AppState {
            transcriber: Arc::new(transcriber),
            store: None,
        };
        (state, dir)
    }

    async fn spawn_app(state: AppState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let router = app(state, 100 * 1024 * 1024);
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    fn audio_form(file_name: &str, bytes: &[u8]) -> reqwest::multipart::Form {
        reqwest::multipart::Form::new().part(
            "audio",
            reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(file_name.to_string()),
        )
    }

    #[test]
    fn params_parse_defaults() {
        let params = Params::try_parse_from(["lovanote-server"]).expect("parse defaults");
        assert_eq!(params.host, "127.0.0.1");
        assert_eq!(params.port, 8080);
        assert_eq!(params.max_bytes, 100 * 1024 * 1024);
        assert_eq!(params.engine, "python3");
        assert_eq!(params.engine_args, vec!["whisper-transcribe.py".to_string()]);
        assert_eq!(params.scratch_dir, PathBuf::from("/tmp/lovanote"));
    }

    #[test]
    fn has_allowed_extension_accepts_the_audio_allowlist() {
        assert!(has_allowed_extension("clip.mp3"));
        assert!(has_allowed_extension("clip.WAV"));
        assert!(has_allowed_extension("voice memo.m4a"));

        assert!(!has_allowed_extension("clip.ogg"));
        assert!(!has_allowed_extension("clip"));
        assert!(!has_allowed_extension("clip.mp3.exe"));
        assert!(!has_allowed_extension(""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transcribe_streams_progress_then_the_transcript() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::new(
            "sh",
            ["-c", "printf 'Progress: 50%%\\nDone transcribing: hello world\\n'"],
        ))
        .await;
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/transcribe"))
            .multipart(audio_form("clip.wav", b"fake audio"))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 200);
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert_eq!(content_type, "text/plain; charset=utf-8");

        let body = resp.text().await?;
        assert_eq!(
            body,
            "Progress: 50%\nTranscription: Done transcribing: hello world"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn engine_failure_stays_in_band_with_http_200() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::new(
            "sh",
            ["-c", "echo 'engine crashed' >&2; exit 1"],
        ))
        .await;
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/transcribe"))
            .multipart(audio_form("clip.wav", b"fake audio"))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await?, "Error: engine crashed");
        Ok(())
    }

    #[tokio::test]
    async fn missing_audio_field_is_a_400() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::default()).await;
        let addr = spawn_app(state).await;

        let form = reqwest::multipart::Form::new().text("language", "en");
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/transcribe"))
            .multipart(form)
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 400);
        let body: serde_json::Value = resp.json().await?;
        assert_eq!(body["error"], "No file provided");
        Ok(())
    }

    #[tokio::test]
    async fn disallowed_extension_is_a_400() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::default()).await;
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/transcribe"))
            .multipart(audio_form("clip.ogg", b"fake audio"))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 400);
        let body: serde_json::Value = resp.json().await?;
        let message = body["error"].as_str().unwrap_or_default();
        assert!(message.contains("unsupported file type"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_engine_binary_is_a_500_before_any_stream() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::new(
            "/definitely/not/a/real/engine",
            Vec::<String>::new(),
        ))
        .await;
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/transcribe"))
            .multipart(audio_form("clip.wav", b"fake audio"))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 500);
        let body: serde_json::Value = resp.json().await?;
        let message = body["error"].as_str().unwrap_or_default();
        assert!(message.contains("engine unavailable"));
        Ok(())
    }

    #[tokio::test]
    async fn upload_without_a_configured_store_is_a_500() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::default()).await;
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/upload"))
            .json(&serde_json::json!({ "file": "data:audio/wav;base64,AAAA" }))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 500);
        let body: serde_json::Value = resp.json().await?;
        assert_eq!(body["error"], "store upload failed");
        assert_eq!(body["details"], "object store is not configured");
        Ok(())
    }

    #[tokio::test]
    async fn upload_round_trips_through_the_store() -> Result<()> {
        async fn stored() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "secure_url": "https://cdn.example.test/lovanote/clip.wav"
            }))
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let mock_addr = listener.local_addr()?;
        let mock = Router::new().route("/upload", post(stored));
        tokio::spawn(async move {
            let _ = axum::serve(listener, mock).await;
        });

        let (mut state, _dir) = test_state(EngineConfig::default()).await;
        let config = StoreConfig::new("test-cloud", "unsigned-preset")
            .with_upload_url(format!("http://{mock_addr}/upload"));
        state.store = Some(Arc::new(StoreClient::new(config).expect("store client")));
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/upload"))
            .json(&serde_json::json!({ "file": "data:audio/wav;base64,AAAA" }))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 200);
        let body: serde_json::Value = resp.json().await?;
        assert_eq!(body["url"], "https://cdn.example.test/lovanote/clip.wav");
        Ok(())
    }

    #[tokio::test]
    async fn upload_rejects_non_post_methods() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::default()).await;
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .get(format!("http://{addr}/api/upload"))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 405);
        Ok(())
    }

    #[tokio::test]
    async fn upload_without_a_file_reference_reports_details() -> Result<()> {
        let (state, _dir) = test_state(EngineConfig::default()).await;
        let addr = spawn_app(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/api/upload"))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        assert_eq!(resp.status().as_u16(), 500);
        let body: serde_json::Value = resp.json().await?;
        assert_eq!(body["details"], "request had no file reference");
        Ok(())
    }
}
