pub mod types;

use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::{Json, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::app::chat::{ChatOptions, LanguageModel};
use crate::app::studio::Studio;
use crate::core::scheduler;
use crate::infra::dev::{DevChatModule, DevChatTokenizer};
use crate::infra::store::ArtifactStore;
use types::{ArtifactInfo, ChatChunk, ChatRequest, Txt2ImgRequest, Txt2ImgUpdate};

/// One studio behind a lock: generation is single-request-at-a-time and the
/// pipeline cache is never shared across concurrent jobs.
#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Mutex<Studio>>,
    pub artifacts_dir: std::path::PathBuf,
}

pub async fn serve(studio: Studio, addr: SocketAddr) -> Result<()> {
    let state = AppState {
        studio: Arc::new(Mutex::new(studio)),
        artifacts_dir: crate::envconfig::artifacts_dir(),
    };

    let app = Router::new()
        .route("/api/txt2img", post(txt2img))
        .route("/api/chat", post(chat))
        .route("/api/artifacts", get(list_artifacts))
        .route("/api/schedulers", get(list_schedulers))
        .route("/api/health", get(health))
        .route("/api/version", get(version))
        .with_state(state);

    tracing::info!("diffstudio listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn ndjson_line<T: serde::Serialize>(value: &T) -> Bytes {
    Bytes::from(serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()) + "\n")
}

fn error_line(err: &anyhow::Error) -> Bytes {
    Bytes::from(json!({ "error": err.to_string() }).to_string() + "\n")
}

async fn txt2img(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<Txt2ImgRequest>,
) -> impl IntoResponse {
    let request = match req.into_request() {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, Infallible>>(100);
    let studio = Arc::clone(&state.studio);

    tokio::task::spawn_blocking(move || {
        let mut studio = studio.lock();
        let mut stream = match studio.generate(&request) {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.blocking_send(Ok(error_line(&e)));
                return;
            }
        };

        let cancel = stream.cancel_token();
        for item in stream.by_ref() {
            match item {
                Ok(update) => {
                    let images: Vec<String> = update
                        .images
                        .iter()
                        .filter_map(|img| img.to_png_bytes().ok())
                        .map(|png| general_purpose::STANDARD.encode(png))
                        .collect();
                    let line = ndjson_line(&Txt2ImgUpdate {
                        images,
                        log: update.log,
                        status: update.status,
                        seeds: update.seeds,
                        done: false,
                        total_duration_ms: None,
                    });
                    if tx.blocking_send(Ok(line)).is_err() {
                        // client went away; stop generating
                        cancel.cancel();
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Ok(error_line(&e)));
                    return;
                }
            }
        }

        let result = stream.into_result();
        let _ = tx.blocking_send(Ok(ndjson_line(&Txt2ImgUpdate {
            images: Vec::new(),
            log: result.log,
            status: "done".to_string(),
            seeds: result.seeds,
            done: true,
            total_duration_ms: Some(result.total_time.as_millis()),
        })));
    });

    Response::builder()
        .header("Content-Type", "application/x-ndjson")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap()
}

async fn chat(Json(req): Json<ChatRequest>) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, Infallible>>(100);

    let defaults = ChatOptions::default();
    let options = ChatOptions {
        max_tokens: req.max_tokens.unwrap_or(defaults.max_tokens),
        temperature: req.temperature.unwrap_or(defaults.temperature),
        top_p: req.top_p.unwrap_or(defaults.top_p),
        seed: req.seed.unwrap_or(defaults.seed),
    };
    let prompt = req.prompt;
    let id = format!("chat-{}", uuid::Uuid::new_v4());

    tokio::task::spawn_blocking(move || {
        let mut model = LanguageModel::new(
            Box::new(DevChatModule::new()),
            Box::new(DevChatTokenizer::new()),
            options,
        );

        let tx_inner = tx.clone();
        let id_inner = id.clone();
        let res = model.chat(&prompt, move |decoded, done| {
            let chunk = ChatChunk {
                id: id_inner.clone(),
                created_at: Utc::now().to_rfc3339(),
                response: decoded.to_string(),
                done,
            };
            let _ = tx_inner.try_send(Ok(ndjson_line(&chunk)));
        });

        if let Err(e) = res {
            let _ = tx.blocking_send(Ok(error_line(&e)));
        }
    });

    Response::builder()
        .header("Content-Type", "application/x-ndjson")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap()
}

async fn list_artifacts(AxumState(state): AxumState<AppState>) -> impl IntoResponse {
    let store = match ArtifactStore::new(&state.artifacts_dir) {
        Ok(s) => s,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    match store.list_local() {
        Ok(artifacts) => {
            let info: Vec<ArtifactInfo> = artifacts
                .into_iter()
                .map(|a| ArtifactInfo {
                    name: a.name,
                    tag: a.tag,
                    size: a.size,
                    modules: a.modules,
                    modified_at: a.modified_at,
                })
                .collect();
            axum::Json(json!({ "artifacts": info })).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_schedulers() -> impl IntoResponse {
    axum::Json(json!({ "schedulers": scheduler::names() }))
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({ "status": "OK" }))
}

async fn version() -> impl IntoResponse {
    axum::Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}
