//! Registers the gateway-owned tools (§4.8): the JSON-RPC front-end has
//! exactly three methods, so every subsystem — memory, mesh, chain, queue —
//! is reached through `tools/call`, never through a bespoke route. Each
//! handler here wraps one subsystem handle and translates its `arguments`
//! object into that subsystem's native call.

use std::sync::Arc;

use async_trait::async_trait;
use llmesh_chainengine::ChainEngine;
use llmesh_domain::chain::ChainStatus;
use llmesh_domain::command::{CommandType, Priority};
use llmesh_domain::error::{Error, Result};
use llmesh_domain::memory_entry::{Importance, MemoryType};
use llmesh_domain::rbac::Permission;
use llmesh_domain::tool::{ToolCategory, ToolSpec};
use llmesh_mesh::Mesh;
use llmesh_memory::{MemoryStore, RecallQuery};
use llmesh_queue::Queue;
use llmesh_tools::{ToolHandler, ToolRegistry};
use serde_json::{json, Value};

fn bad_params(message: impl Into<String>) -> Error {
    Error::Config(message.into())
}

fn field<'a>(params: &'a Value, name: &str) -> Result<&'a Value> {
    params.get(name).ok_or_else(|| bad_params(format!("missing field: {name}")))
}

fn str_field(params: &Value, name: &str) -> Result<String> {
    field(params, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| bad_params(format!("field must be a string: {name}")))
}

fn opt_str_field(params: &Value, name: &str) -> Option<String> {
    params.get(name).and_then(|v| v.as_str()).map(str::to_string)
}

fn caller_field(params: &Value) -> String {
    opt_str_field(params, "caller").unwrap_or_else(|| "orchestrator_kernel".to_string())
}

fn trace_id_field(params: &Value) -> Option<String> {
    opt_str_field(params, "trace_id")
}

// ── memory ──────────────────────────────────────────────────────────

struct MemoryRemember(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryRemember {
    async fn call(&self, params: Value) -> Result<Value> {
        let content = str_field(&params, "content")?;
        let kind: MemoryType = params
            .get("kind")
            .map(|v| serde_json::from_value(v.clone()).map_err(Error::Json))
            .transpose()?
            .unwrap_or(MemoryType::Fact);
        let confidence = params.get("confidence").and_then(Value::as_f64).unwrap_or(0.8) as f32;
        let project_id = opt_str_field(&params, "project_id");
        let tags = params.get("tags").and_then(Value::as_array).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default();
        let keywords = params.get("keywords").and_then(Value::as_array).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default();
        let importance: Importance = params
            .get("importance")
            .map(|v| serde_json::from_value(v.clone()).map_err(Error::Json))
            .transpose()?
            .unwrap_or_default();
        let ttl_hours = params.get("ttl_hours").and_then(Value::as_i64);
        let source_endpoint = opt_str_field(&params, "source_endpoint");
        let entry = self.0.remember(content, kind, confidence, project_id, tags, keywords, importance, ttl_hours, source_endpoint)?;
        Ok(serde_json::to_value(entry)?)
    }
}

struct MemoryRecall(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryRecall {
    async fn call(&self, params: Value) -> Result<Value> {
        let mut query = RecallQuery::new();
        query.text = opt_str_field(&params, "text");
        query.project_id = opt_str_field(&params, "project_id");
        query.min_confidence = params.get("min_confidence").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        query.max_age_hours = params.get("max_age_hours").and_then(Value::as_i64);
        query.tags = params.get("tags").and_then(Value::as_array).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default();
        query.include_expired = params.get("include_expired").and_then(Value::as_bool).unwrap_or(false);
        query.limit = params.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        if let Some(kind) = params.get("kind") {
            query.kind = Some(serde_json::from_value(kind.clone())?);
        }
        Ok(serde_json::to_value(self.0.recall(&query))?)
    }
}

struct MemoryUpdate(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryUpdate {
    async fn call(&self, params: Value) -> Result<Value> {
        let id = str_field(&params, "id")?;
        let content = opt_str_field(&params, "content");
        let confidence = params.get("confidence").and_then(Value::as_f64).map(|c| c as f32);
        Ok(serde_json::to_value(self.0.update(&id, content, confidence)?)?)
    }
}

struct MemoryValidate(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryValidate {
    async fn call(&self, params: Value) -> Result<Value> {
        let id = str_field(&params, "id")?;
        let caller = caller_field(&params);
        Ok(serde_json::to_value(self.0.validate(&id, &caller)?)?)
    }
}

struct MemoryInvalidate(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryInvalidate {
    async fn call(&self, params: Value) -> Result<Value> {
        let id = str_field(&params, "id")?;
        Ok(serde_json::to_value(self.0.invalidate(&id)?)?)
    }
}

struct MemoryForget(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryForget {
    async fn call(&self, params: Value) -> Result<Value> {
        let id = str_field(&params, "id")?;
        Ok(json!({ "deleted": self.0.delete(&id) }))
    }
}

struct MemoryHistory(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryHistory {
    async fn call(&self, params: Value) -> Result<Value> {
        let id = str_field(&params, "id")?;
        Ok(serde_json::to_value(self.0.history(&id))?)
    }
}

struct MemoryStats(Arc<MemoryStore>);
#[async_trait]
impl ToolHandler for MemoryStats {
    async fn call(&self, _params: Value) -> Result<Value> {
        Ok(serde_json::to_value(self.0.stats())?)
    }
}

pub fn register_memory_tools(registry: &mut ToolRegistry, store: Arc<MemoryStore>) {
    let schema = |props: Value, required: &[&str]| json!({"type": "object", "properties": props, "required": required});

    registry.register(
        ToolSpec {
            name: "memory.remember".into(),
            description: "store a new memory entry".into(),
            input_schema: schema(json!({"content": {"type": "string"}, "kind": {"type": "string"}, "confidence": {"type": "number"}}), &["content"]),
            required_permission: Permission::MemoryWrite,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryRemember(store.clone())),
    );
    registry.register(
        ToolSpec {
            name: "memory.recall".into(),
            description: "recall memory entries matching a query".into(),
            input_schema: schema(json!({"text": {"type": "string"}, "project_id": {"type": "string"}, "limit": {"type": "integer"}}), &[]),
            required_permission: Permission::MemoryRead,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryRecall(store.clone())),
    );
    registry.register(
        ToolSpec {
            name: "memory.update".into(),
            description: "supersede a memory entry with a new version".into(),
            input_schema: schema(json!({"id": {"type": "string"}, "content": {"type": "string"}, "confidence": {"type": "number"}}), &["id"]),
            required_permission: Permission::MemoryWrite,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryUpdate(store.clone())),
    );
    registry.register(
        ToolSpec {
            name: "memory.validate".into(),
            description: "record a caller's validation of a memory entry".into(),
            input_schema: schema(json!({"id": {"type": "string"}, "caller": {"type": "string"}}), &["id"]),
            required_permission: Permission::MemoryWrite,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryValidate(store.clone())),
    );
    registry.register(
        ToolSpec {
            name: "memory.invalidate".into(),
            description: "mark a memory entry as invalidated".into(),
            input_schema: schema(json!({"id": {"type": "string"}}), &["id"]),
            required_permission: Permission::MemoryWrite,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryInvalidate(store.clone())),
    );
    registry.register(
        ToolSpec {
            name: "memory.forget".into(),
            description: "delete a memory entry outright".into(),
            input_schema: schema(json!({"id": {"type": "string"}}), &["id"]),
            required_permission: Permission::MemoryDelete,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryForget(store.clone())),
    );
    registry.register(
        ToolSpec {
            name: "memory.history".into(),
            description: "walk a memory entry's version lineage, oldest first".into(),
            input_schema: schema(json!({"id": {"type": "string"}}), &["id"]),
            required_permission: Permission::MemoryRead,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryHistory(store.clone())),
    );
    registry.register(
        ToolSpec {
            name: "memory.stats".into(),
            description: "aggregate counts over the memory store".into(),
            input_schema: schema(json!({}), &[]),
            required_permission: Permission::MemoryRead,
            category: ToolCategory::Memory,
        },
        Arc::new(MemoryStats(store)),
    );
}

// ── mesh ────────────────────────────────────────────────────────────

struct MeshCall(Arc<Mesh>);
#[async_trait]
impl ToolHandler for MeshCall {
    async fn call(&self, params: Value) -> Result<Value> {
        let target = str_field(&params, "target")?;
        let prompt = str_field(&params, "prompt")?;
        let caller = caller_field(&params);
        let trace_id = trace_id_field(&params);
        Ok(serde_json::to_value(self.0.call(&target, &prompt, &caller, trace_id).await)?)
    }
}

struct MeshBroadcast(Arc<Mesh>);
#[async_trait]
impl ToolHandler for MeshBroadcast {
    async fn call(&self, params: Value) -> Result<Value> {
        let targets: Vec<String> = field(&params, "targets")?
            .as_array()
            .ok_or_else(|| bad_params("targets must be an array"))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let prompt = str_field(&params, "prompt")?;
        let caller = caller_field(&params);
        let trace_id = trace_id_field(&params);
        Ok(serde_json::to_value(self.0.broadcast(&targets, &prompt, &caller, trace_id).await)?)
    }
}

struct MeshConsensus(Arc<Mesh>);
#[async_trait]
impl ToolHandler for MeshConsensus {
    async fn call(&self, params: Value) -> Result<Value> {
        let targets: Vec<String> = field(&params, "targets")?
            .as_array()
            .ok_or_else(|| bad_params("targets must be an array"))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let question = str_field(&params, "question")?;
        let caller = caller_field(&params);
        let min_agreement = params.get("min_agreement").and_then(Value::as_f64).unwrap_or(0.6) as f32;
        let weights = params.get("weights").and_then(Value::as_object).map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f as f32)))
                .collect()
        });
        let trace_id = trace_id_field(&params);
        Ok(serde_json::to_value(self.0.consensus(&targets, &question, &caller, weights, min_agreement, trace_id).await)?)
    }
}

struct MeshDelegate(Arc<Mesh>);
#[async_trait]
impl ToolHandler for MeshDelegate {
    async fn call(&self, params: Value) -> Result<Value> {
        let target = opt_str_field(&params, "target").unwrap_or_else(|| "auto".to_string());
        let task_type = str_field(&params, "task_type")?;
        let prompt = str_field(&params, "prompt")?;
        let caller = caller_field(&params);
        let trace_id = trace_id_field(&params);
        Ok(serde_json::to_value(self.0.delegate(&target, &task_type, &prompt, &caller, trace_id).await)?)
    }
}

pub fn register_mesh_tools(registry: &mut ToolRegistry, mesh: Arc<Mesh>) {
    let schema = |props: Value, required: &[&str]| json!({"type": "object", "properties": props, "required": required});

    registry.register(
        ToolSpec {
            name: "mesh.call".into(),
            description: "call a single mesh endpoint with a prompt".into(),
            input_schema: schema(json!({"target": {"type": "string"}, "prompt": {"type": "string"}}), &["target", "prompt"]),
            required_permission: Permission::LlmCall,
            category: ToolCategory::Mesh,
        },
        Arc::new(MeshCall(mesh.clone())),
    );
    registry.register(
        ToolSpec {
            name: "mesh.broadcast".into(),
            description: "fan out a prompt to several mesh endpoints in parallel".into(),
            input_schema: schema(json!({"targets": {"type": "array", "items": {"type": "string"}}, "prompt": {"type": "string"}}), &["targets", "prompt"]),
            required_permission: Permission::LlmBroadcast,
            category: ToolCategory::Mesh,
        },
        Arc::new(MeshBroadcast(mesh.clone())),
    );
    registry.register(
        ToolSpec {
            name: "mesh.consensus".into(),
            description: "broadcast a question and have the lead endpoint analyze agreement".into(),
            input_schema: schema(json!({"targets": {"type": "array", "items": {"type": "string"}}, "question": {"type": "string"}}), &["targets", "question"]),
            required_permission: Permission::LlmConsensus,
            category: ToolCategory::Mesh,
        },
        Arc::new(MeshConsensus(mesh.clone())),
    );
    registry.register(
        ToolSpec {
            name: "mesh.delegate".into(),
            description: "delegate a task to the best endpoint for its type, or a named target".into(),
            input_schema: schema(json!({"target": {"type": "string"}, "task_type": {"type": "string"}, "prompt": {"type": "string"}}), &["task_type", "prompt"]),
            required_permission: Permission::LlmCall,
            category: ToolCategory::Mesh,
        },
        Arc::new(MeshDelegate(mesh)),
    );
}

// ── chain ───────────────────────────────────────────────────────────

struct ChainStart(Arc<ChainEngine>);
#[async_trait]
impl ToolHandler for ChainStart {
    async fn call(&self, params: Value) -> Result<Value> {
        let user_prompt = str_field(&params, "user_prompt")?;
        let project_id = opt_str_field(&params, "project_id");
        let max_cycles = params.get("max_cycles").and_then(Value::as_u64).map(|v| v as u32);
        let autoprompt_profile = opt_str_field(&params, "autoprompt_profile");
        let autoprompt_override = opt_str_field(&params, "autoprompt_override");
        let trace_id = trace_id_field(&params);
        let chain = self.0.start_chain(&user_prompt, project_id, max_cycles, autoprompt_profile, autoprompt_override, trace_id)?;
        Ok(serde_json::to_value(chain)?)
    }
}

struct ChainStatusTool(Arc<ChainEngine>);
#[async_trait]
impl ToolHandler for ChainStatusTool {
    async fn call(&self, params: Value) -> Result<Value> {
        let chain_id = str_field(&params, "chain_id")?;
        Ok(serde_json::to_value(self.0.status(&chain_id))?)
    }
}

struct ChainList(Arc<ChainEngine>);
#[async_trait]
impl ToolHandler for ChainList {
    async fn call(&self, params: Value) -> Result<Value> {
        let project_id = opt_str_field(&params, "project_id");
        let status: Option<ChainStatus> = params.get("status").map(|v| serde_json::from_value(v.clone())).transpose()?;
        Ok(serde_json::to_value(self.0.list_chains(project_id.as_deref(), status))?)
    }
}

struct ChainLogs(Arc<ChainEngine>);
#[async_trait]
impl ToolHandler for ChainLogs {
    async fn call(&self, params: Value) -> Result<Value> {
        let chain_id = str_field(&params, "chain_id")?;
        let cycle_number = params.get("cycle_number").and_then(Value::as_u64).map(|v| v as u32);
        Ok(serde_json::to_value(self.0.logs(&chain_id, cycle_number))?)
    }
}

struct ChainCancel(Arc<ChainEngine>);
#[async_trait]
impl ToolHandler for ChainCancel {
    async fn call(&self, params: Value) -> Result<Value> {
        let chain_id = str_field(&params, "chain_id")?;
        Ok(json!({ "cancelled": self.0.cancel_chain(&chain_id) }))
    }
}

struct ChainPause(Arc<ChainEngine>);
#[async_trait]
impl ToolHandler for ChainPause {
    async fn call(&self, params: Value) -> Result<Value> {
        let chain_id = str_field(&params, "chain_id")?;
        Ok(json!({ "paused": self.0.pause_chain(&chain_id) }))
    }
}

struct ChainResume(Arc<ChainEngine>);
#[async_trait]
impl ToolHandler for ChainResume {
    async fn call(&self, params: Value) -> Result<Value> {
        let chain_id = str_field(&params, "chain_id")?;
        Ok(json!({ "resumed": self.0.resume_chain(&chain_id) }))
    }
}

pub fn register_chain_tools(registry: &mut ToolRegistry, chains: Arc<ChainEngine>) {
    let schema = |props: Value, required: &[&str]| json!({"type": "object", "properties": props, "required": required});

    registry.register(
        ToolSpec {
            name: "chain.start".into(),
            description: "start a new cycle chain for a user prompt".into(),
            input_schema: schema(json!({"user_prompt": {"type": "string"}, "project_id": {"type": "string"}, "max_cycles": {"type": "integer"}}), &["user_prompt"]),
            required_permission: Permission::LlmCall,
            category: ToolCategory::Chain,
        },
        Arc::new(ChainStart(chains.clone())),
    );
    registry.register(
        ToolSpec {
            name: "chain.status".into(),
            description: "fetch a chain's current status".into(),
            input_schema: schema(json!({"chain_id": {"type": "string"}}), &["chain_id"]),
            required_permission: Permission::MemoryRead,
            category: ToolCategory::Chain,
        },
        Arc::new(ChainStatusTool(chains.clone())),
    );
    registry.register(
        ToolSpec {
            name: "chain.list".into(),
            description: "list chains, optionally filtered by project or status".into(),
            input_schema: schema(json!({"project_id": {"type": "string"}, "status": {"type": "string"}}), &[]),
            required_permission: Permission::MemoryRead,
            category: ToolCategory::Chain,
        },
        Arc::new(ChainList(chains.clone())),
    );
    registry.register(
        ToolSpec {
            name: "chain.logs".into(),
            description: "fetch a chain's cycle logs, optionally a single cycle".into(),
            input_schema: schema(json!({"chain_id": {"type": "string"}, "cycle_number": {"type": "integer"}}), &["chain_id"]),
            required_permission: Permission::MemoryRead,
            category: ToolCategory::Chain,
        },
        Arc::new(ChainLogs(chains.clone())),
    );
    registry.register(
        ToolSpec {
            name: "chain.cancel".into(),
            description: "cancel a running or paused chain".into(),
            input_schema: schema(json!({"chain_id": {"type": "string"}}), &["chain_id"]),
            required_permission: Permission::AdminFull,
            category: ToolCategory::Chain,
        },
        Arc::new(ChainCancel(chains.clone())),
    );
    registry.register(
        ToolSpec {
            name: "chain.pause".into(),
            description: "pause a running chain".into(),
            input_schema: schema(json!({"chain_id": {"type": "string"}}), &["chain_id"]),
            required_permission: Permission::AdminFull,
            category: ToolCategory::Chain,
        },
        Arc::new(ChainPause(chains.clone())),
    );
    registry.register(
        ToolSpec {
            name: "chain.resume".into(),
            description: "resume a paused chain".into(),
            input_schema: schema(json!({"chain_id": {"type": "string"}}), &["chain_id"]),
            required_permission: Permission::AdminFull,
            category: ToolCategory::Chain,
        },
        Arc::new(ChainResume(chains)),
    );
}

// ── queue ───────────────────────────────────────────────────────────

struct QueueEnqueue(Arc<Queue>);
#[async_trait]
impl ToolHandler for QueueEnqueue {
    async fn call(&self, params: Value) -> Result<Value> {
        let kind: CommandType = serde_json::from_value(field(&params, "kind")?.clone())?;
        let priority: Priority = params
            .get("priority")
            .map(|v| serde_json::from_value(v.clone()).map_err(Error::Json))
            .transpose()?
            .unwrap_or(Priority::Normal);
        let payload = params.get("payload").cloned().unwrap_or(json!({}));
        let target_agent = opt_str_field(&params, "target_agent");
        Ok(serde_json::to_value(self.0.enqueue(kind, priority, payload, target_agent)?)?)
    }
}

struct QueueDequeue(Arc<Queue>);
#[async_trait]
impl ToolHandler for QueueDequeue {
    async fn call(&self, params: Value) -> Result<Value> {
        let agent_id = opt_str_field(&params, "agent_id");
        Ok(serde_json::to_value(self.0.dequeue(agent_id.as_deref()))?)
    }
}

struct QueueComplete(Arc<Queue>);
#[async_trait]
impl ToolHandler for QueueComplete {
    async fn call(&self, params: Value) -> Result<Value> {
        let command_id = str_field(&params, "command_id")?;
        let result = params.get("result").cloned().unwrap_or(json!(null));
        let success = params.get("success").and_then(Value::as_bool).unwrap_or(true);
        self.0.complete(&command_id, result, success);
        Ok(json!({ "acknowledged": true }))
    }
}

pub fn register_queue_tools(registry: &mut ToolRegistry, queue: Arc<Queue>) {
    let schema = |props: Value, required: &[&str]| json!({"type": "object", "properties": props, "required": required});

    registry.register(
        ToolSpec {
            name: "queue.enqueue".into(),
            description: "enqueue a command for an agent to pick up".into(),
            input_schema: schema(json!({"kind": {"type": "string"}, "priority": {"type": "string"}, "payload": {"type": "object"}, "target_agent": {"type": "string"}}), &["kind"]),
            required_permission: Permission::AdminFull,
            category: ToolCategory::Queue,
        },
        Arc::new(QueueEnqueue(queue.clone())),
    );
    registry.register(
        ToolSpec {
            name: "queue.dequeue".into(),
            description: "dequeue the next eligible command for an agent".into(),
            input_schema: schema(json!({"agent_id": {"type": "string"}}), &[]),
            required_permission: Permission::AdminFull,
            category: ToolCategory::Queue,
        },
        Arc::new(QueueDequeue(queue.clone())),
    );
    registry.register(
        ToolSpec {
            name: "queue.complete".into(),
            description: "report a command as completed or failed".into(),
            input_schema: schema(json!({"command_id": {"type": "string"}, "result": {}, "success": {"type": "boolean"}}), &["command_id"]),
            required_permission: Permission::AdminFull,
            category: ToolCategory::Queue,
        },
        Arc::new(QueueComplete(queue)),
    );
}
