use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition, ScriptSandbox};
use async_trait::async_trait;
use serde_json::Map;

/// Picks `trueValue` or `falseValue` by evaluating `expression` in the script sandbox.
///
/// Rejected or failing expressions count as false. A missing branch value passes the
/// input through.
pub struct IfElseNode {
    sandbox: ScriptSandbox,
}

impl IfElseNode {
    pub fn new(sandbox: ScriptSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Node for IfElseNode {
    fn node_type(&self) -> &str {
        "if-else"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx
            .primary_input(&["input", "value"])
            .cloned()
            .unwrap_or(Value::Null);

        let outcome = match ctx.config_str("expression") {
            Some(expression) => match self.sandbox.eval_condition(expression, &input).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    ctx.log.warn(format!("Condition '{}' evaluated as false: {}", expression, e));
                    false
                }
            },
            None => {
                ctx.log.warn("No expression configured; taking the false branch");
                false
            }
        };

        let branch = if outcome { "trueValue" } else { "falseValue" };
        let value = ctx
            .config
            .get(branch)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or(input);
        Ok(NodeOutput::value(value).with_custom("branch", outcome))
    }
}

pub struct IfElseNodeFactory;

impl NodeFactory for IfElseNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(IfElseNode::new(ScriptSandbox::default())))
    }

    fn node_type(&self) -> &str {
        "if-else"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Choose between two values with a sandboxed boolean expression".to_string(),
            category: "logic".to_string(),
            inputs: vec![PortDefinition::new("input", "Value tested by the expression")],
            outputs: vec![PortDefinition::new("output", "trueValue or falseValue")],
        }
    }
}
