pub mod auth;
pub mod health;
pub mod rpc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the gateway's HTTP surface (§4.13): a public health probe plus
/// the single protected JSON-RPC endpoint every tool call goes through.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health::health));

    let protected = Router::new()
        .route("/v1/rpc", post(rpc::handle_rpc))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected).layer(tower_http::trace::TraceLayer::new_for_http())
}
