use super::client::{ChatClient, ChatMessage, ChatSettings};
use crate::config::NodeDefaults;
use crate::payload::decode_payload;
use agentcore::value::value_to_text;
use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition};
use async_trait::async_trait;
use serde_json::{json, Map};

/// Assemble the conversation: system, memory, context, then the user turn (with an
/// optional inline image).
pub(crate) fn build_messages(ctx: &NodeContext, user: &str) -> Result<Vec<ChatMessage>, NodeError> {
    let mut messages = Vec::new();

    let system = ctx
        .find_input(&["system", "systemMessage", "systemPrompt"])
        .map(value_to_text)
        .or_else(|| ctx.config_str("systemMessage").map(str::to_string))
        .or_else(|| ctx.config_str("systemPrompt").map(str::to_string))
        .filter(|s| !s.trim().is_empty());
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }

    match ctx.find_input(&["memory", "history"]) {
        Some(Value::Array(turns)) => {
            for turn in turns {
                let role = turn.get("role").and_then(Value::as_str);
                let content = turn.get("content").map(value_to_text);
                match (role, content) {
                    (Some("assistant"), Some(text)) => messages.push(ChatMessage::assistant(text)),
                    (Some("system"), Some(text)) => messages.push(ChatMessage::system(text)),
                    (_, Some(text)) => messages.push(ChatMessage::user(text)),
                    (_, None) => messages.push(ChatMessage::user(value_to_text(turn))),
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            let history = value_to_text(other);
            if !history.trim().is_empty() {
                messages.push(ChatMessage::system(format!("Conversation history:\n{}", history)));
            }
        }
    }

    if let Some(context) = ctx.find_input(&["context"]).map(value_to_text) {
        if !context.trim().is_empty() {
            messages.push(ChatMessage::system(format!("Context:\n{}", context)));
        }
    }

    match ctx.find_input(&["image"]).filter(|v| !v.is_null()) {
        Some(image) => messages.push(ChatMessage::user_with_image(user, image_url(image)?)),
        None if user.trim().is_empty() => return Err(NodeError::MissingInput("user".into())),
        None => messages.push(ChatMessage::user(user)),
    }
    Ok(messages)
}

pub(crate) fn user_text(ctx: &NodeContext) -> String {
    ctx.find_input(&["user", "input", "prompt", "text", "message"])
        .map(value_to_text)
        .or_else(|| ctx.config_str("prompt").map(str::to_string))
        .or_else(|| ctx.config_str("userMessage").map(str::to_string))
        .unwrap_or_default()
}

fn image_url(image: &Value) -> Result<String, NodeError> {
    if let Value::String(text) = image {
        let text = text.trim();
        if text.starts_with("http://") || text.starts_with("https://") || text.starts_with("data:") {
            return Ok(text.to_string());
        }
    }
    Ok(decode_payload(image)?.to_data_url("image/png"))
}

/// Single chat completion with optional system prompt, memory, context and image.
pub struct LlmNode {
    client: ChatClient,
    defaults: NodeDefaults,
}

impl LlmNode {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self {
            client: ChatClient::new(),
            defaults,
        }
    }
}

#[async_trait]
impl Node for LlmNode {
    fn node_type(&self) -> &str {
        "llm"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let settings = ChatSettings::from_context(&ctx, &self.defaults);
        let user = user_text(&ctx);

        let Some(api_key) = settings.api_key.as_deref() else {
            ctx.log.warn("No API key configured; returning a placeholder response");
            return Ok(NodeOutput::value(json!({
                "response": format!("[placeholder] {} would answer a {}-character prompt here", settings.model, user.chars().count()),
                "model": settings.model,
                "usage": Value::Null,
                "finishReason": "placeholder",
                "placeholder": true,
            })));
        };

        let messages = build_messages(&ctx, &user)?;
        ctx.log.info(format!("Calling {} with {} message(s)", settings.model, messages.len()));
        let completion = self.client.complete(&settings, api_key, &messages, None).await?;

        Ok(NodeOutput::value(json!({
            "response": completion.content,
            "model": completion.model,
            "usage": completion.usage,
            "finishReason": completion.finish_reason,
        })))
    }
}

pub struct LlmNodeFactory {
    defaults: NodeDefaults,
}

impl LlmNodeFactory {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self { defaults }
    }
}

impl NodeFactory for LlmNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LlmNode::new(self.defaults.clone())))
    }

    fn node_type(&self) -> &str {
        "llm"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Chat completion against an OpenAI-compatible API".to_string(),
            category: "ai".to_string(),
            inputs: vec![
                PortDefinition::new("system", "System prompt"),
                PortDefinition::new("user", "User message").required(),
                PortDefinition::new("context", "Extra context"),
                PortDefinition::new("memory", "Prior conversation turns"),
                PortDefinition::new("image", "Inline image (URL, data URL or base64)"),
            ],
            outputs: vec![
                PortDefinition::new("response", "Assistant text"),
                PortDefinition::new("usage", "Token usage"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_follow_conversation_order() {
        let ctx = NodeContext::detached("llm")
            .with_input("system", "be brief")
            .with_input("memory", json!([{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]))
            .with_input("context", "docs")
            .with_input("user", "question");
        let messages = build_messages(&ctx, &user_text(&ctx)).unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "system", "user"]);
        assert_eq!(messages[4].content, json!("question"));
    }

    #[test]
    fn image_becomes_content_parts() {
        let ctx = NodeContext::detached("llm")
            .with_input("user", "what is this")
            .with_input("image", "aGVsbG8=");
        let messages = build_messages(&ctx, &user_text(&ctx)).unwrap();
        assert_eq!(messages[0].content[1]["image_url"]["url"], json!("data:image/png;base64,aGVsbG8="));
    }

    #[test]
    fn empty_user_message_is_rejected() {
        let ctx = NodeContext::detached("llm");
        assert!(matches!(build_messages(&ctx, ""), Err(NodeError::MissingInput(_))));
    }
}
