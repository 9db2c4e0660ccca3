//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together, DeepSeek, and any
//! other endpoint that follows the OpenAI chat completions contract.

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};
use llmesh_domain::config::EndpointConfig;
use llmesh_domain::error::{Error, Result};
use llmesh_domain::stream::Usage;
use llmesh_domain::tool::{Message, MessageContent, Role};
use llmesh_domain::wire::{LlmCapabilities, ToolSupport};
use serde_json::Value;

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the deserialized endpoint config. Unlike
    /// the vendor-native adapters, the API key is optional here — many
    /// OpenAI-compat endpoints (local Ollama, vLLM) require no auth.
    pub fn from_config(cfg: &EndpointConfig) -> Result<Self> {
        let base_url = cfg.base_url.clone().ok_or_else(|| {
            Error::Config(format!("endpoint '{}': openai_compat requires base_url", cfg.id))
        })?;
        let api_key = match cfg.api_key_env.as_deref() {
            Some(_) => Some(resolve_api_key(cfg.api_key_env.as_deref())?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::None,
                supports_streaming: false,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(128_000),
                max_output_tokens: Some(16_384),
            },
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.model.clone());
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "user",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    let text = match &msg.content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(_) => msg.content.extract_all_text(),
    };
    serde_json::json!({
        "role": role_to_str(msg.role),
        "content": text,
    })
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            endpoint: "openai_compat".into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        endpoint: "openai_compat".into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let usage = body.get("usage").and_then(parse_openai_usage);

    Ok(ChatResponse {
        content,
        usage,
        model,
        finish_reason,
    })
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

        let resp = self
            .authed_post(&url)
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
        parse_chat_response(&resp_json)
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_usage() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
            "model": "deepseek-chat",
            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6},
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(resp.usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn missing_choices_errors() {
        let body = serde_json::json!({});
        assert!(parse_chat_response(&body).is_err());
    }
}
