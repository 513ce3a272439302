use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use streamgate_core::error::ApiError;
use streamgate_transcoder::device::DeviceClass;
use streamgate_transcoder::strategy::ModeKind;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

/// Sent upstream when the player supplies no User-Agent of its own.
pub const DEFAULT_USER_AGENT: &str = concat!("streamgate/", env!("CARGO_PKG_VERSION"));

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health).options(preflight))
        .route("/metadata", get(metadata).options(preflight))
        .route("/start", get(start).options(preflight))
        .route("/ping", get(ping).options(preflight))
        .route("/stop", get(stop).options(preflight))
        .route(
            "/subtitle",
            get(crate::streaming::subtitle).options(preflight),
        )
        .route(
            "/direct-stream",
            get(crate::streaming::direct_stream).options(preflight),
        )
        .route("/client-log", post(client_log).options(preflight))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bare OPTIONS probes get an empty 204; browser preflights carrying
/// `Access-Control-Request-Method` are answered by the CORS layer.
async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn require_param(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing '{name}' query parameter")).into())
}

fn request_user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_USER_AGENT)
        .to_string()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MetadataQuery {
    url: Option<String>,
}

#[derive(Serialize)]
struct AudioEntry {
    index: u32,
    lang: String,
    codec: String,
}

#[derive(Serialize)]
struct SubtitleEntry {
    index: u32,
    lang: String,
    title: Option<String>,
    codec: String,
}

#[derive(Serialize)]
struct MetadataResponse {
    audio: Vec<AudioEntry>,
    subs: Vec<SubtitleEntry>,
    duration: f64,
}

async fn metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<MetadataResponse>, AppError> {
    let url = require_param(query.url, "url")?;

    let report = state
        .engine
        .probe_source(&url)
        .await
        .map_err(|e| ApiError::Internal(format!("probe failed: {e}")))?;

    Ok(Json(MetadataResponse {
        audio: report
            .audio
            .into_iter()
            .map(|a| AudioEntry {
                index: a.index,
                lang: a.language,
                codec: a.codec,
            })
            .collect(),
        subs: report
            .subtitles
            .into_iter()
            .map(|s| SubtitleEntry {
                index: s.index,
                lang: s.language,
                title: s.title,
                codec: s.codec,
            })
            .collect(),
        duration: report.duration_secs,
    }))
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StartQuery {
    url: Option<String>,
    session: Option<String>,
    transcode: Option<String>,
    device: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    status: &'static str,
    mode: ModeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_url: Option<String>,
}

async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StartQuery>,
) -> Result<Json<StartResponse>, AppError> {
    let url = require_param(query.url, "url")?;
    let session = require_param(query.session, "session")?;
    let force_transcode = matches!(query.transcode.as_deref(), Some("true") | Some("1"));
    let force_tv = query.device.as_deref() == Some("tv");

    let user_agent = request_user_agent(&headers);
    let device = DeviceClass::from_user_agent(&user_agent, force_tv);

    let outcome = state
        .engine
        .start(&session, &url, device, force_transcode, &user_agent)
        .await?;

    // native playback bypasses the transcoder; hand the player the proxy URL
    let stream_url = (outcome.mode == ModeKind::NativeDirect).then(|| {
        let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        format!("/direct-stream?url={encoded}")
    });

    Ok(Json(StartResponse {
        status: if outcome.resumed { "resumed" } else { "started" },
        mode: outcome.mode,
        stream_url,
    }))
}

#[derive(Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PingResponse {
    status: &'static str,
    encoded_duration: f64,
    live_edge_time: f64,
}

async fn ping(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, AppError> {
    let session = require_param(query.session, "session")?;

    match state.engine.ping(&session).await {
        Some(progress) => Ok(Json(PingResponse {
            status: "active",
            encoded_duration: progress.encoded_duration,
            live_edge_time: progress.live_edge_time,
        })
        .into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "invalid_session" })),
        )
            .into_response()),
    }
}

async fn stop(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = require_param(query.session, "session")?;
    // idempotent: stopping an unknown session is not an error
    state.engine.stop(&session).await;
    Ok(Json(serde_json::json!({ "status": "stopped" })))
}

// ---------------------------------------------------------------------------
// Client log relay
// ---------------------------------------------------------------------------

async fn client_log(body: String) -> StatusCode {
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        info!(target: "client", "{line}");
    }
    StatusCode::OK
}
