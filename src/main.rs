use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

mod artifacts;
mod config;
mod error;
mod handlers;
mod model;
mod prediction;
mod remedy;

use artifacts::ensure_artifacts;
use config::Config;
use handlers::{router, AppState};
use model::YoloModel;
use remedy::RemedyTable;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        port = config.port,
        model = %config.model_path.display(),
        classes = %config.class_list_path.display(),
        body_limit_bytes = ?config.body_limit_bytes,
        "starting leaf doctor"
    );

    ensure_artifacts(&config)
        .await
        .context("model artifacts unavailable")?;

    let model = YoloModel::load(&config.model_path, &config.class_list_path)
        .context("failed to load model")?;
    info!("detector ready with {} classes", model.labels().len());

    let remedies = RemedyTable::builtin();
    info!(
        labels = ?remedies.labels().collect::<Vec<_>>(),
        "remedy table has {} entries",
        remedies.label_count()
    );

    let app = router(
        AppState::new(Arc::new(model), remedies),
        config.body_limit_bytes,
    );

    let addr = config.bind_addr();
    info!("listening on http://{}", addr);
    axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {}", addr))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
