//! HTTP server for the package directory.
//!
//! Serves the browseable UI, the JSON API, status badges, and the feeds
//! over the shared state. Shutdown is graceful: the listener stops
//! accepting, in-flight requests drain, and the first-seen history is
//! persisted before exit.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod types;

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache;
use crate::error::Result;
use crate::state::SharedState;

/// Server bind configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Build the full router over the shared state.
pub fn build_router(state: SharedState) -> Router {
    let api_routes = Router::new()
        .route("/package_count", get(handlers::package_count))
        .route("/status/{name}", get(handlers::build_status))
        .route("/search_symbol", get(handlers::search_symbol));

    let badge_routes = Router::new()
        .route("/{name}/version.svg", get(handlers::version_badge))
        .route("/{name}/nimdevel/{artifact}", get(handlers::build_artifact));

    Router::new()
        .route("/", get(handlers::home))
        .route("/search", get(handlers::search_page))
        .route("/pkg/{name}", get(handlers::package_page))
        .route("/docs/{name}", get(handlers::docs_page))
        .route("/docs/{name}/{*path}", get(handlers::doc_file))
        .route("/ci/rebuild/{name}", post(handlers::rebuild))
        .route("/update_package", post(handlers::update_package))
        .route("/packages.json", get(handlers::packages_json))
        .route("/packages.xml", get(handlers::packages_xml))
        .route("/robots.txt", get(handlers::robots))
        .nest("/api/v1", api_routes)
        .nest("/ci/badges", badge_routes)
        .layer(axum::middleware::from_fn(middleware::correlate))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .max_age(Duration::from_secs(3600)),
        )
        .with_state(state)
}

/// Start the server and block until shutdown.
pub async fn run_server(state: SharedState, config: ServerConfig) -> Result<()> {
    let app = build_router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "directory server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Persist the first-seen history on the way out; in-flight builds die
    // with the process and are rehydrated from disk on the next start.
    let history = state.lock().history.clone();
    cache::save_history(&state.config.cache_file, &history)?;
    info!("shutdown complete, history persisted");

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
