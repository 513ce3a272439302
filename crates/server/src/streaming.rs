use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use futures::Stream;
use serde::Deserialize;
use streamgate_core::error::ApiError;
use tokio::process::{Child, ChildStdout};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::AppError;
use crate::routes::DEFAULT_USER_AGENT;
use crate::state::AppState;

/// Upstream headers forwarded back to the player unchanged.
const FORWARDED_RESPONSE_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

#[derive(Deserialize)]
pub struct DirectStreamQuery {
    url: Option<String>,
}

/// Byte-for-byte pass-through for natively playable sources.
///
/// `Range` and `User-Agent` travel upstream; status and the range headers
/// travel back. Dropping the response body (client disconnect) tears down
/// the upstream request with it.
pub async fn direct_stream(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<DirectStreamQuery>,
) -> Result<Response, AppError> {
    let url = query
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing 'url' query parameter".into()))?;

    let mut request = if method == Method::HEAD {
        state.http.head(&url)
    } else {
        state.http.get(&url)
    };
    if let Some(range) = headers.get(header::RANGE) {
        request = request.header(header::RANGE, range.clone());
    }
    if let Some(ua) = headers.get(header::USER_AGENT) {
        request = request.header(header::USER_AGENT, ua.clone());
    }

    let upstream = request
        .send()
        .await
        .map_err(|e| ApiError::BadGateway(format!("upstream request failed: {e}")))?;

    debug!(status = %upstream.status(), url = %url, "proxying upstream response");

    let mut builder = Response::builder().status(upstream.status());
    for name in FORWARDED_RESPONSE_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("build response: {e}")).into())
}

#[derive(Deserialize)]
pub struct SubtitleQuery {
    url: Option<String>,
    index: Option<u32>,
}

/// Stateless subtitle pipe: extract one text stream from the source and
/// stream it as WebVTT. `index` is the absolute source stream index from
/// the metadata report.
pub async fn subtitle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SubtitleQuery>,
) -> Result<Response, AppError> {
    let url = query
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing 'url' query parameter".into()))?;
    let index = query
        .index
        .ok_or_else(|| ApiError::BadRequest("missing 'index' query parameter".into()))?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_USER_AGENT);

    let config = state.engine.config();
    let mut child = tokio::process::Command::new(&config.ffmpeg_path)
        .args([
            "-v",
            "quiet",
            "-user_agent",
            user_agent,
            "-i",
            &url,
            "-map",
            &format!("0:{index}"),
            "-c:s",
            "webvtt",
            "-f",
            "webvtt",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ApiError::Internal(format!("spawn subtitle extractor: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ApiError::Internal("subtitle extractor has no stdout".into()))?;

    let stream = ChildStream {
        inner: ReaderStream::new(stdout),
        _child: child,
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/vtt")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(format!("build response: {e}")).into())
}

/// Streams a child's stdout; dropping it mid-transfer (client disconnect)
/// kills the extractor via `kill_on_drop`.
struct ChildStream {
    inner: ReaderStream<ChildStdout>,
    _child: Child,
}

impl Stream for ChildStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
