use super::chat::{build_messages, user_text};
use super::client::{ChatClient, ChatCompletion, ChatMessage, ChatSettings};
use crate::config::NodeDefaults;
use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition};
use async_trait::async_trait;
use serde_json::{json, Map};

/// JSON Schema describing the shape of `example`.
///
/// Objects require every key and forbid extras, arrays take the schema of their first
/// element, scalars map to their JSON type.
pub fn derive_schema(example: &Value) -> Value {
    match example {
        Value::Object(map) => {
            let properties: Map<String, Value> = map
                .iter()
                .map(|(key, value)| (key.clone(), derive_schema(value)))
                .collect();
            let required: Vec<&String> = map.keys().collect();
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            })
        }
        Value::Array(items) => json!({
            "type": "array",
            "items": items.first().map(derive_schema).unwrap_or_else(|| json!({"type": "string"})),
        }),
        Value::String(_) => json!({"type": "string"}),
        Value::Number(_) => json!({"type": "number"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Null => json!({"type": "null"}),
    }
}

const STRUCTURED_MODEL_PREFIXES: &[&str] = &["gpt-4o", "gpt-4.1", "gpt-5", "o1", "o3", "o4"];

/// Whether the endpoint/model pair is known to accept `response_format: json_schema`.
pub fn supports_structured_output(base_url: &str, model: &str) -> bool {
    base_url.contains("api.openai.com")
        && STRUCTURED_MODEL_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
}

/// Parse model output as JSON: directly, then without markdown fences, then the first
/// balanced `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let unfenced = strip_fences(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }
    balanced_span(unfenced).and_then(|span| serde_json::from_str(span).ok())
}

fn strip_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    // skip the language tag line
    let body = match after.find('\n') {
        Some(newline) => &after[newline + 1..],
        None => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StructuredMode {
    Auto,
    Always,
    Never,
}

impl StructuredMode {
    fn parse(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => StructuredMode::Always,
            Some(Value::Bool(false)) => StructuredMode::Never,
            Some(Value::String(s)) => match s.as_str() {
                "always" | "true" => StructuredMode::Always,
                "never" | "false" => StructuredMode::Never,
                _ => StructuredMode::Auto,
            },
            _ => StructuredMode::Auto,
        }
    }
}

/// Generates JSON matching a caller-provided example.
pub struct StructuredLlmNode {
    client: ChatClient,
    defaults: NodeDefaults,
}

impl StructuredLlmNode {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self {
            client: ChatClient::new(),
            defaults,
        }
    }

    fn example(ctx: &NodeContext) -> Result<Value, NodeError> {
        match ctx.find_input(&["jsonExample", "example"]).or_else(|| ctx.config.get("jsonExample")) {
            Some(Value::String(text)) => serde_json::from_str(text)
                .map_err(|e| NodeError::Configuration(format!("jsonExample is not valid JSON: {}", e))),
            Some(Value::Null) | None => Err(NodeError::Configuration(
                "structured-llm requires a jsonExample".into(),
            )),
            Some(value) => Ok(value.clone()),
        }
    }

    async fn call_with_schema(
        &self,
        settings: &ChatSettings,
        api_key: &str,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<ChatCompletion, NodeError> {
        let format = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "structured_output",
                "strict": true,
                "schema": schema,
            }
        });
        self.client.complete(settings, api_key, messages, Some(format)).await
    }

    async fn call_with_prompt(
        &self,
        settings: &ChatSettings,
        api_key: &str,
        messages: &[ChatMessage],
        example: &Value,
    ) -> Result<ChatCompletion, NodeError> {
        let example_text = serde_json::to_string_pretty(example)
            .map_err(|e| NodeError::ExecutionFailed(e.to_string()))?;
        let instruction = ChatMessage::system(format!(
            "You must respond with valid JSON only. Match the structure of this example exactly, \
             using the same keys and value types:\n{}\nDo not wrap the JSON in markdown and do not \
             add any explanation before or after it.",
            example_text
        ));
        let mut prompted = Vec::with_capacity(messages.len() + 1);
        prompted.push(instruction);
        prompted.extend_from_slice(messages);
        self.client.complete(settings, api_key, &prompted, None).await
    }
}

#[async_trait]
impl Node for StructuredLlmNode {
    fn node_type(&self) -> &str {
        "structured-llm"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let settings = ChatSettings::from_context(&ctx, &self.defaults);
        let example = Self::example(&ctx)?;

        let Some(api_key) = settings.api_key.as_deref() else {
            ctx.log.warn("No API key configured; returning the example as a placeholder");
            return Ok(NodeOutput::value(json!({
                "data": example,
                "rawResponse": Value::Null,
                "model": settings.model,
                "usage": Value::Null,
                "method": "placeholder",
                "placeholder": true,
            })));
        };

        let schema = derive_schema(&example);
        let messages = build_messages(&ctx, &user_text(&ctx))?;
        let use_schema = match StructuredMode::parse(ctx.config.get("useStructuredOutput")) {
            StructuredMode::Always => true,
            StructuredMode::Never => false,
            StructuredMode::Auto => supports_structured_output(&settings.base_url, &settings.model),
        };

        let (completion, method) = if use_schema {
            match self.call_with_schema(&settings, api_key, &messages, &schema).await {
                Ok(completion) => (completion, "json_schema"),
                Err(NodeError::Http { status, message, .. }) if (400..500).contains(&status) => {
                    ctx.log.warn(format!(
                        "Structured output rejected ({} {}); retrying with prompt instructions",
                        status, message
                    ));
                    let completion = self.call_with_prompt(&settings, api_key, &messages, &example).await?;
                    (completion, "prompt_fallback")
                }
                Err(e) => return Err(e),
            }
        } else {
            let completion = self.call_with_prompt(&settings, api_key, &messages, &example).await?;
            (completion, "prompt")
        };

        let data = extract_json(&completion.content).ok_or_else(|| {
            NodeError::Schema(format!(
                "Model response is not valid JSON: {}",
                completion.content.chars().take(200).collect::<String>()
            ))
        })?;

        ctx.log.info(format!("Structured output produced via {}", method));
        Ok(NodeOutput::value(json!({
            "data": data,
            "rawResponse": completion.content,
            "model": completion.model,
            "usage": completion.usage,
            "method": method,
        })))
    }
}

pub struct StructuredLlmNodeFactory {
    defaults: NodeDefaults,
}

impl StructuredLlmNodeFactory {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self { defaults }
    }
}

impl NodeFactory for StructuredLlmNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(StructuredLlmNode::new(self.defaults.clone())))
    }

    fn node_type(&self) -> &str {
        "structured-llm"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Generate JSON shaped like a provided example".to_string(),
            category: "ai".to_string(),
            inputs: vec![
                PortDefinition::new("prompt", "What to generate").required(),
                PortDefinition::new("context", "Extra context"),
            ],
            outputs: vec![
                PortDefinition::new("data", "Parsed JSON"),
                PortDefinition::new("rawResponse", "Unparsed model text"),
            ],
        }
    }
}
