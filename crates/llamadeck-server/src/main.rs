mod dto;
mod error;
mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use llamadeck_core::LlamaDeckConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .compact()
        .init();

    let config = LlamaDeckConfig::from_env();
    info!("Daemon endpoint: {}", config.daemon.host);

    let state = Arc::new(AppState::new(&config)?);

    // background poll loop; mutation handlers and completed pulls nudge it
    // through the refresh handle
    let aggregator = state.models.clone();
    tokio::spawn(async move { aggregator.run().await });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                version = ?req.version(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    let logged_routes = Router::new()
        .route(
            "/api/models",
            get(handlers::models::list).delete(handlers::models::delete),
        )
        .route("/api/models/refresh", post(handlers::models::refresh))
        .route("/api/models/show", post(handlers::models::show))
        .route("/api/models/create", post(handlers::models::create))
        .route("/api/chat", post(handlers::models::chat))
        .route(
            "/api/downloads",
            get(handlers::downloads::list).post(handlers::downloads::start),
        )
        .route("/api/downloads/clear", post(handlers::downloads::clear))
        .route("/api/downloads/{id}", delete(handlers::downloads::remove))
        .route(
            "/api/downloads/{id}/cancel",
            post(handlers::downloads::cancel),
        )
        .layer(trace_layer);

    let app = Router::new()
        .merge(logged_routes)
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state);

    let addr =
        std::env::var("LLAMADECK_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
