use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use guia_assistant::AssistantGateway;
use guia_catalog::Catalog;
use guia_session::SessionService;

use crate::handlers;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5000 }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub catalog: Arc<Catalog>,
    pub assistant: Arc<AssistantGateway>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/areas", get(handlers::areas))
        .route("/api/nodos", get(handlers::legacy_nodos))
        .route("/api/pro/{pro_id}/nodos", get(handlers::pro_nodos))
        .route("/api/ai/chat", post(handlers::ai_chat))
        .route("/api/session", post(handlers::create_session))
        .route(
            "/api/session/{id}",
            get(handlers::get_session).put(handlers::update_session),
        )
        .route("/api/session/{id}/history", post(handlers::append_history))
        .route(
            "/api/session/{id}/decisiones",
            post(handlers::append_decision),
        )
        .route("/api/session/{id}/bloqueos", post(handlers::append_blocker))
        .route("/api/session/{id}/logs", post(handlers::append_log))
        .route("/api/session/{id}/inputs/{key}", put(handlers::set_input))
        .route("/api/session/{id}/export", get(handlers::export_session))
        .route("/api/catalog/reload", post(handlers::reload_catalog))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "guia server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()` — dropping it does not stop the server task.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}
