//! Google Gemini adapter.
//!
//! Implements the Gemini `generateContent` API. Auth is an API key passed
//! as a query parameter (`key={api_key}`).

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};
use llmesh_domain::config::EndpointConfig;
use llmesh_domain::error::{Error, Result};
use llmesh_domain::stream::Usage;
use llmesh_domain::tool::{Message, MessageContent, Role};
use llmesh_domain::wire::{LlmCapabilities, ToolSupport};
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GoogleProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn from_config(cfg: &EndpointConfig) -> Result<Self> {
        let api_key = resolve_api_key(cfg.api_key_env.as_deref())?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: cfg.model.clone(),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::None,
                supports_streaming: false,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(1_000_000),
                max_output_tokens: Some(8_192),
            },
            client,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut contents: Vec<Value> = Vec::new();
        let mut system_instruction: Option<Value> = None;

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    system_instruction = Some(serde_json::json!({
                        "parts": [{"text": msg.content.extract_all_text()}]
                    }));
                }
                Role::User | Role::Tool => contents.push(to_gemini_content(msg, "user")),
                Role::Assistant => contents.push(to_gemini_content(msg, "model")),
            }
        }

        let mut body = serde_json::json!({ "contents": contents });
        if let Some(si) = system_instruction {
            body["systemInstruction"] = si;
        }

        let mut gen_config = serde_json::json!({});
        if let Some(temp) = req.temperature {
            gen_config["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            gen_config["maxOutputTokens"] = serde_json::json!(max);
        }
        if gen_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = gen_config;
        }
        body
    }
}

fn to_gemini_content(msg: &Message, role: &str) -> Value {
    let text = match &msg.content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(_) => msg.content.extract_all_text(),
    };
    serde_json::json!({
        "role": role,
        "parts": [{"text": text}],
    })
}

fn parse_gemini_response(body: &Value, model: &str) -> Result<ChatResponse> {
    let candidate = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            endpoint: "google".into(),
            message: "no candidates in response".into(),
        })?;

    let text = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let finish_reason = candidate
        .get("finishReason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "STOP" => "stop".to_string(),
            "MAX_TOKENS" => "length".to_string(),
            other => other.to_lowercase(),
        });

    let usage = body.get("usageMetadata").and_then(parse_gemini_usage);

    Ok(ChatResponse {
        content: text,
        usage,
        model: model.to_string(),
        finish_reason,
    })
}

fn parse_gemini_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("promptTokenCount")?.as_u64()? as u32;
    let completion = v.get("candidatesTokenCount").and_then(|c| c.as_u64()).unwrap_or(0) as u32;
    let total = v
        .get("totalTokenCount")
        .and_then(|c| c.as_u64())
        .map(|t| t as u32)
        .unwrap_or(prompt + completion);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = req.model.clone().unwrap_or_else(|| self.model.clone());
        let url = self.generate_url(&model);
        let body = self.build_body(&req);

        tracing::debug!(provider = %self.id, model = %model, "google chat request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                endpoint: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_gemini_response(&resp_json, &model)
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
