use agentcore::value::{coerce, DataKind};
use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value, INPUT_NODE_TYPE, OUTPUT_NODE_TYPE};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition};
use async_trait::async_trait;
use serde_json::Map;

/// Feeds a value into the run: the caller's override, then the stored value, then the
/// declared type's default.
pub struct InputNode;

#[async_trait]
impl Node for InputNode {
    fn node_type(&self) -> &str {
        INPUT_NODE_TYPE
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let kind = ctx
            .config_str("inputType")
            .map(DataKind::parse)
            .unwrap_or(DataKind::Any);

        let value = ctx
            .run_input
            .clone()
            .or_else(|| stored(&ctx.config, "value"))
            .or_else(|| stored(&ctx.config, "defaultValue"))
            .unwrap_or_else(|| kind.default_value());

        Ok(NodeOutput::value(coerce(value, kind)))
    }
}

fn stored(config: &Map<String, Value>, key: &str) -> Option<Value> {
    config.get(key).filter(|v| !v.is_null()).cloned()
}

/// Identity pass-through of its single input, optionally coerced by `format`.
pub struct OutputNode;

#[async_trait]
impl Node for OutputNode {
    fn node_type(&self) -> &str {
        OUTPUT_NODE_TYPE
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx
            .primary_input(&["input", "value"])
            .cloned()
            .unwrap_or(Value::Null);

        let value = match ctx.config_str("format") {
            Some(format) => coerce(value, DataKind::parse(format)),
            None => value,
        };
        Ok(NodeOutput::value(value))
    }
}

pub struct InputNodeFactory;

impl NodeFactory for InputNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(InputNode))
    }

    fn node_type(&self) -> &str {
        INPUT_NODE_TYPE
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Workflow input with per-run override and typed default".to_string(),
            category: "io".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("output", "The input value")],
        }
    }
}

pub struct OutputNodeFactory;

impl NodeFactory for OutputNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(OutputNode))
    }

    fn node_type(&self) -> &str {
        OUTPUT_NODE_TYPE
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Workflow output, optionally formatted".to_string(),
            category: "io".to_string(),
            inputs: vec![PortDefinition::new("input", "Value to return").required()],
            outputs: vec![],
        }
    }
}
