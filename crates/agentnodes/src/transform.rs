use agentcore::value::get_path;
use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition};
use async_trait::async_trait;
use serde_json::Map;

/// Parse JSON text (or take an already structured value) and optionally project a
/// dot-separated field.
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn node_type(&self) -> &str {
        "json-parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let fail_on_error = ctx.config_bool("failOnError").unwrap_or(false);
        let input = ctx
            .primary_input(&["input", "json", "text"])
            .cloned()
            .unwrap_or(Value::Null);

        let parsed = match &input {
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed) => parsed,
                Err(e) if fail_on_error => {
                    return Err(NodeError::JsonParse(e.to_string()));
                }
                Err(e) => {
                    ctx.log.warn(format!("Input is not valid JSON ({}); passing it through", e));
                    return Ok(NodeOutput::value(input));
                }
            },
            other => other.clone(),
        };

        let Some(field) = ctx.config_str("field").or_else(|| ctx.config_str("fieldPath")) else {
            return Ok(NodeOutput::value(parsed));
        };

        match get_path(&parsed, field) {
            Some(value) => Ok(NodeOutput::value(value.clone())),
            None if fail_on_error => Err(NodeError::JsonParse(format!(
                "Field '{}' not found in parsed JSON",
                field
            ))),
            None => {
                ctx.log.warn(format!("Field '{}' not found", field));
                Ok(NodeOutput::value(Value::Null))
            }
        }
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(JsonParseNode))
    }

    fn node_type(&self) -> &str {
        "json-parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON and optionally extract a field path".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::new("input", "JSON text or value").required()],
            outputs: vec![PortDefinition::new("output", "Parsed value or field")],
        }
    }
}
