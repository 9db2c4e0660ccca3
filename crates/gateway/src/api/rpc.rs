//! The single JSON-RPC 2.0 entry point (§4.13): `initialize`, `tools/list`,
//! `tools/call`, with the caller identity and trace id carried as headers
//! rather than wire fields — the JSON-RPC body itself stays spec-shaped.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use llmesh_rpc::{parse_incoming, Incoming};

use crate::state::AppState;

const DEFAULT_CALLER: &str = "orchestrator_kernel";

pub async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let raw = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e.to_string()}))).into_response();
        }
    };

    let caller = headers
        .get("x-llmesh-caller")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CALLER);
    let trace_id = headers.get("x-trace-id").and_then(|v| v.to_str().ok());

    match parse_incoming(raw) {
        Ok(Incoming::Request(request)) => Json(state.dispatcher.handle(request, caller, trace_id).await).into_response(),
        Ok(Incoming::Notification) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => Json(serde_json::json!({"jsonrpc": "2.0", "id": null, "error": err})).into_response(),
    }
}
