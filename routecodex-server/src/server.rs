use crate::handlers;
use crate::state::AppState;
use axum::Router as AxumRouter;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Build the ingress router: the three chat-completion surfaces plus
/// health and metrics.
pub fn build_router(state: AppState) -> AxumRouter {
    let mut router = AxumRouter::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/messages", post(handlers::messages))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics));

    if !state.config.server.cors_origins.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(origins);
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// Serve until SIGINT/SIGTERM, draining in-flight requests.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.server.listen_addr;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Ingress listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining");
}
