//! Development archive server
//!
//! Serves update archives from a local folder so the updater can be tested
//! without the vendor download server (`--url http://127.0.0.1:8080/<file>`).

use anyhow::{Context, Result};
use axum::Router;
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

/// Router serving every file below `folder`
pub fn router(folder: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(folder))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Run the archive server until the process is stopped
pub async fn run(folder: &Path, bind: &str) -> Result<()> {
    if !folder.is_dir() {
        anyhow::bail!("{} is not a directory", folder.display());
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %bind, folder = %folder.display(), "Serving update archives");
    axum::serve(listener, router(folder)).await?;
    Ok(())
}
