#![allow(clippy::collapsible_if, clippy::unused_async)]
pub mod args;
pub mod device;
pub mod hls;
pub mod probe;
pub mod session;
pub mod strategy;
pub mod supervisor;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("failed to spawn transcoder: {0}")]
    SpawnFailed(String),
    #[error("transcoder exited with code {code:?} before producing a playlist")]
    StartupFailed { code: Option<i32> },
    #[error("transcoder produced no playlist within {0:?}")]
    ReadyTimeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Global gateway engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Root under which every session owns `<hls_root>/<session_id>/`.
    pub hls_root: PathBuf,
    pub segment_secs: u32,
    pub probe_timeout: Duration,
    pub ready_poll_interval: Duration,
    /// Readiness budget for speculative modes (stream-copy attempts).
    pub ready_timeout_speculative: Duration,
    /// Readiness budget for a full transcode warm-up.
    pub ready_timeout_full: Duration,
    /// Sessions whose last heartbeat is older than this are reaped.
    pub heartbeat_timeout: Duration,
    pub evict_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            hls_root: PathBuf::from("./public/hls"),
            segment_secs: 6,
            probe_timeout: Duration::from_secs(20),
            ready_poll_interval: Duration::from_millis(500),
            ready_timeout_speculative: Duration::from_secs(50),
            ready_timeout_full: Duration::from_secs(120),
            heartbeat_timeout: Duration::from_secs(2 * 60 * 60),
            evict_period: Duration::from_secs(5 * 60),
        }
    }
}
