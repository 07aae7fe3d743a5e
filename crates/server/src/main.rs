//! DEM run server
//!
//! Environment:
//! - `PORT` (default 3000)
//! - `CONFIGS_DIR` scene files (default `configs`)
//! - `POLICY_FILE` optional execution policy JSON

use std::path::PathBuf;
use std::sync::Arc;

use orchestrator::{ExecutionPolicy, ExecutionScheduler};
use server::{router, AppState};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=debug,orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DEM run server");

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let configs_dir = std::env::var("CONFIGS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("configs"));
    if !configs_dir.exists() {
        std::fs::create_dir_all(&configs_dir)?;
    }

    let policy = match std::env::var("POLICY_FILE") {
        Ok(path) => ExecutionPolicy::load(&path)?,
        Err(_) => ExecutionPolicy::default(),
    };
    tracing::info!(
        "Policy: immediate up to {} bodies, {} workers, output in {:?}",
        policy.immediate_threshold,
        policy.workers,
        policy.output_dir
    );

    let state = Arc::new(AppState::new(ExecutionScheduler::new(policy), configs_dir, port));
    let app = router(state);

    // Serve the viewer if it has been built
    let frontend_dist = PathBuf::from("frontend/dist");
    let app = if frontend_dist.exists() {
        tracing::info!("Serving frontend from {:?}", frontend_dist);
        app.fallback_service(ServeDir::new(frontend_dist))
    } else {
        app
    };

    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
