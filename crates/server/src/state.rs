use std::sync::Arc;

use streamgate_transcoder::session::SessionEngine;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    /// Client for the direct-stream byte-range proxy.
    pub http: reqwest::Client,
}
