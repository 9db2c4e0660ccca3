//! Shared application state passed to every API handler.

use std::sync::Arc;

use llmesh_chainengine::ChainEngine;
use llmesh_domain::config::Config;
use llmesh_rpc::Dispatcher;

/// Everything an HTTP handler needs: the JSON-RPC [`Dispatcher`] (which in
/// turn owns the tool registry and every subsystem wired into it at
/// bootstrap), the chain engine for workspace introspection, and the
/// resolved config plus the auth token hash computed from it once at
/// startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub chains: Arc<ChainEngine>,
    /// SHA-256 digest of the configured bearer token. `None` means no
    /// `[server.api_token_env]` value was set — dev mode, unauthenticated.
    pub api_token_hash: Option<Vec<u8>>,
}
