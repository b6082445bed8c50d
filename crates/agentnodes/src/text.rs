use agentcore::value::value_to_text;
use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition};
use async_trait::async_trait;
use serde_json::Map;

/// Joins two text inputs with a mode-dependent separator. Never fails.
pub struct CombineTextNode;

impl CombineTextNode {
    fn separator(ctx: &NodeContext) -> String {
        match ctx.config_str("mode").unwrap_or("concatenate") {
            "space" => " ".to_string(),
            "newline" => "\n".to_string(),
            "comma" => ", ".to_string(),
            "custom" => ctx
                .config
                .get("separator")
                .map(value_to_text)
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}

pub fn combine(first: &str, second: &str, separator: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, true) => String::new(),
        (false, true) => first.to_string(),
        (true, false) => second.to_string(),
        (false, false) => format!("{}{}{}", first, separator, second),
    }
}

#[async_trait]
impl Node for CombineTextNode {
    fn node_type(&self) -> &str {
        "combine-text"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = |names: &[&str], position: usize| {
            ctx.find_input(names)
                .or_else(|| ctx.input_at(position))
                .map(value_to_text)
                .unwrap_or_default()
        };
        let first = text(&["text1", "Text 1", "first"], 0);
        let second = text(&["text2", "Text 2", "second"], 1);

        Ok(NodeOutput::value(combine(&first, &second, &Self::separator(&ctx))))
    }
}

pub struct CombineTextNodeFactory;

impl NodeFactory for CombineTextNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(CombineTextNode))
    }

    fn node_type(&self) -> &str {
        "combine-text"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Concatenate two texts (concatenate, space, newline, comma, custom)".to_string(),
            category: "text".to_string(),
            inputs: vec![
                PortDefinition::new("text1", "First text"),
                PortDefinition::new("text2", "Second text"),
            ],
            outputs: vec![PortDefinition::new("output", "Combined text")],
        }
    }
}
