use anyhow::{Context, Result};
use celeb_core::Pipeline;
use celeb_summary::{GeminiClient, SummaryGenerator};
use celebd::{router, spawn_engine, AppState, Config};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("celebd starting");

    let config = Config::load().context("loading configuration")?;
    let paths = config.artifact_paths();
    let pipeline = Pipeline::load(&paths).context("loading artifacts")?;
    let registry = pipeline.registry();
    let engine = spawn_engine(pipeline, config.engine_queue)?;

    let summarizer: Option<Arc<dyn SummaryGenerator>> = match config.gemini_config() {
        Some(gemini) => Some(Arc::new(GeminiClient::new(gemini)?)),
        None => {
            tracing::warn!("GEMINI_API_KEY not set; /describe will return fallback text");
            None
        }
    };

    let state = AppState {
        engine,
        registry,
        summarizer,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "celebd ready");

    axum::serve(listener, router(state, config.max_body_bytes))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("celebd shutting down");
    Ok(())
}
