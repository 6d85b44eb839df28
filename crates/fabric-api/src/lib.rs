//! Local HTTP API: beaconing state as JSON, bound to 127.0.0.1.

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/hints", get(handlers::handle_hints))
        .route("/solicit", post(handlers::handle_solicit))
        .route("/advertise", post(handlers::handle_advertise))
        .route("/daemon/shutdown", post(handlers::handle_shutdown))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
