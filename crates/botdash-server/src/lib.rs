//! HTTP endpoint layer (axum).
//!
//! Every guild-scoped route resolves the session (401), runs the access
//! verifier (403, or 500 when Discord cannot be reached) and only then reads or
//! writes the guild's config.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use botdash_core::config::Config;

pub mod error;
pub mod routes;
pub mod session;
pub mod state;

pub use state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    let guilds = Router::new()
        .route("/api/guilds", get(routes::list_guilds))
        .route(
            "/api/guilds/:guild_id/config",
            get(routes::get_config).patch(routes::patch_config),
        )
        .route(
            "/api/guilds/:guild_id/commands",
            get(routes::get_commands).patch(routes::patch_commands),
        )
        .route(
            "/api/guilds/:guild_id/prompt",
            get(routes::get_prompt).put(routes::put_prompt),
        )
        .route("/api/guilds/:guild_id/stats", get(routes::get_stats));

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/auth/session",
            post(routes::login).delete(routes::logout),
        )
        .merge(guilds)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for a browser frontend served from another origin. Cookies are allowed.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin.trim_end_matches('/'))
        .with_context(|| format!("DASHBOARD_ORIGIN is not a valid header value: {origin}"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true))
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

pub async fn serve(cfg: &Config, state: AppState) -> anyhow::Result<()> {
    let mut app = build_router(state);
    if let Some(origin) = &cfg.dashboard_origin {
        app = app.layer(cors_layer(origin)?);
    }

    let addr = SocketAddr::new(cfg.bind_addr, cfg.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("dashboard listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
