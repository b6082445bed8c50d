use crate::config::NodeDefaults;
use agentcore::{NodeContext, NodeError, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// Plain text, or an array of content parts for multimodal messages
    pub content: Value,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: Value::String(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: Value::String(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: Value::String(text.into()),
        }
    }

    /// User turn carrying text plus an inline image URL (`data:` or http).
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: json!([
                {"type": "text", "text": text.into()},
                {"type": "image_url", "image_url": {"url": image_url.into()}},
            ]),
        }
    }
}

/// Per-call settings: node `data` first, then [`NodeDefaults`].
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub timeout: Duration,
}

impl ChatSettings {
    pub fn from_context(ctx: &NodeContext, defaults: &NodeDefaults) -> Self {
        Self {
            base_url: ctx
                .config_str("apiBaseUrl")
                .unwrap_or(&defaults.llm_base_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: ctx
                .config_str("apiKey")
                .map(str::to_string)
                .or_else(|| defaults.llm_api_key.clone())
                .filter(|k| !k.trim().is_empty()),
            model: ctx.config_str("model").unwrap_or(&defaults.llm_model).to_string(),
            temperature: ctx.config_f64("temperature").unwrap_or(0.7),
            max_tokens: ctx.config_u64("maxTokens").unwrap_or(1000),
            timeout: Duration::from_millis(ctx.config_u64("timeout").unwrap_or(defaults.http_timeout_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub usage: Value,
    pub finish_reason: Option<String>,
}

/// Minimal client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone, Default)]
pub struct ChatClient {
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn complete(
        &self,
        settings: &ChatSettings,
        api_key: &str,
        messages: &[ChatMessage],
        response_format: Option<Value>,
    ) -> Result<ChatCompletion, NodeError> {
        let mut payload = json!({
            "model": settings.model,
            "messages": messages,
            "temperature": settings.temperature,
            "max_tokens": settings.max_tokens,
        });
        if let Some(format) = response_format {
            payload["response_format"] = format;
        }

        let url = format!("{}/chat/completions", settings.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .timeout(settings.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NodeError::Timeout {
                        timeout_ms: settings.timeout.as_millis() as u64,
                        retry_count: 0,
                    }
                } else {
                    NodeError::Network {
                        message: e.to_string(),
                        retry_count: 0,
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| NodeError::Network {
            message: format!("Failed to read completion: {}", e),
            retry_count: 0,
        })?;

        if !status.is_success() {
            return Err(NodeError::Http {
                status: status.as_u16(),
                message: error_message(&body),
                retry_count: 0,
            });
        }

        let body: Value = serde_json::from_str(&body)
            .map_err(|e| NodeError::ExecutionFailed(format!("Malformed completion response: {}", e)))?;
        parse_completion(&body, &settings.model)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn parse_completion(body: &Value, requested_model: &str) -> Result<ChatCompletion, NodeError> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| NodeError::ExecutionFailed("Completion response has no choices".into()))?;

    Ok(ChatCompletion {
        content: choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        usage: body.get("usage").cloned().unwrap_or(Value::Null),
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let body = json!({
            "model": "gpt-test",
            "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 3}
        });
        let completion = parse_completion(&body, "fallback").unwrap();
        assert_eq!(completion.content, "hi");
        assert_eq!(completion.model, "gpt-test");
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert!(parse_completion(&json!({"choices": []}), "m").is_err());
    }

    #[test]
    fn error_message_prefers_api_error() {
        assert_eq!(error_message(r#"{"error": {"message": "bad key"}}"#), "bad key");
        assert_eq!(error_message("oops"), "oops");
    }
}
