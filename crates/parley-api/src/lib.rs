//! parley-api — HTTP bridge to the tracker.
//!
//! Each route forwards its JSON body, tagged with the matching tracker
//! `method`, over the tracker protocol and relays the reply verbatim.

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

    Router::new()
        .route("/login", post(handlers::handle_login))
        .route("/register-peer", post(handlers::handle_register_peer))
        .route("/get-peers", post(handlers::handle_get_peers))
        .route("/join-channel", post(handlers::handle_join_channel))
        .route("/leave-channel", post(handlers::handle_leave_channel))
        .route("/get-channels", post(handlers::handle_get_channels))
        .route("/logout", post(handlers::handle_logout))
        .route("/health", get(handlers::handle_health))
        .with_state(state)
        .layer(cors)
}

pub async fn serve(state: ApiState, bind_addr: &str, port: u16) -> anyhow::Result<()> {
    let tracker = state.tracker.addr().to_string();
    let listener = tokio::net::TcpListener::bind((bind_addr, port)).await?;
    tracing::info!(addr = %listener.local_addr()?, %tracker, "HTTP bridge listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
