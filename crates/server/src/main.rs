use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use streamgate_server::routes::build_router;
use streamgate_server::state::AppState;
use streamgate_transcoder::EngineConfig;
use streamgate_transcoder::session::SessionEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let public_root =
        std::env::var("STREAMGATE_PUBLIC_ROOT").unwrap_or_else(|_| "./public".to_string());

    let mut config = EngineConfig {
        hls_root: std::path::Path::new(&public_root).join("hls"),
        ..Default::default()
    };
    if let Ok(path) = std::env::var("STREAMGATE_FFMPEG") {
        config.ffmpeg_path = path.into();
    }
    if let Ok(path) = std::env::var("STREAMGATE_FFPROBE") {
        config.ffprobe_path = path.into();
    }

    let engine = Arc::new(SessionEngine::new(config));
    engine
        .reset_root()
        .await
        .context("failed to reset HLS root")?;
    info!(hls_root = %engine.config().hls_root.display(), "HLS root cleared");

    // Reap idle sessions in the background
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            let period = engine.config().evict_period;
            loop {
                tokio::time::sleep(period).await;
                engine.evict_idle_once().await;
            }
        });
    }

    let state = AppState {
        engine,
        http: reqwest::Client::new(),
    };
    let app = build_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %bind_addr, "gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}
