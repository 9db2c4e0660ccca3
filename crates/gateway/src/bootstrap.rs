//! Wires every subsystem into a single [`AppState`], in the order each
//! depends on the last: audit log first (everyone records into it), then
//! RBAC, the guards `Mesh::call` consults, the provider registry, the
//! mesh itself, and finally the cycle/chain engines built on top of it.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use llmesh_audit::AuditLog;
use llmesh_chainengine::ChainEngine;
use llmesh_circuit::CircuitBreakerRegistry;
use llmesh_cycledetect::CycleDetector;
use llmesh_cycleengine::CycleEngine;
use llmesh_domain::config::Config;
use llmesh_mesh::Mesh;
use llmesh_memory::MemoryStore;
use llmesh_providers::ProviderRegistry;
use llmesh_queue::Queue;
use llmesh_ratelimit::RateLimiter;
use llmesh_rbac::Rbac;
use llmesh_rpc::Dispatcher;
use llmesh_tools::{register_builtin_tools, ToolRegistry};

use crate::state::AppState;
use crate::tooling::{register_chain_tools, register_mesh_tools, register_memory_tools, register_queue_tools};

const SERVER_NAME: &str = "llmesh";

const MAX_PARALLEL_TASKS: usize = 4;

pub fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let audit = Arc::new(AuditLog::new(&config.audit)?);
    let rbac = Arc::new(Rbac::new(config.rbac.clone(), audit.clone()));
    let cycles = Arc::new(CycleDetector::new(config.mesh.max_call_depth, audit.clone()));
    let rates = Arc::new(RateLimiter::new());
    let circuits = Arc::new(CircuitBreakerRegistry::new(config.circuit.clone()));
    let providers = Arc::new(ProviderRegistry::from_config(&config.endpoints));
    for err in providers.init_errors() {
        tracing::warn!(endpoint_id = %err.endpoint_id, error = %err.error, "endpoint failed to initialize");
    }

    let mesh = Arc::new(Mesh::new(
        &config.mesh,
        &config.endpoints.endpoints,
        rbac.clone(),
        cycles.clone(),
        rates,
        circuits,
        providers,
        audit.clone(),
    ));

    let default_lead = config.mesh.default_lead_endpoint.clone().unwrap_or_else(|| "gemini".to_string());
    let cycle_engine = Arc::new(CycleEngine::new(mesh.clone(), MAX_PARALLEL_TASKS));
    let chains = Arc::new(ChainEngine::new(cycle_engine, &config.chain, default_lead));

    let memory = Arc::new(MemoryStore::new(&config.memory)?);
    let queue = Arc::new(Queue::new(&config.queue)?);

    let mut tools = ToolRegistry::new(rbac, audit);
    register_builtin_tools(&mut tools);
    register_memory_tools(&mut tools, memory);
    register_mesh_tools(&mut tools, mesh);
    register_chain_tools(&mut tools, chains.clone());
    register_queue_tools(&mut tools, queue);

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(tools), SERVER_NAME, env!("CARGO_PKG_VERSION")));

    let api_token_hash = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!(env_var = %config.server.api_token_env, "no API token configured, accepting unauthenticated requests");
            None
        }
    };

    Ok(AppState {
        config,
        dispatcher,
        chains,
        api_token_hash,
    })
}
