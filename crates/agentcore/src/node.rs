use crate::diagnostics::NodeLogger;
use crate::{NodeError, PortSpec, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::HashMap;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Type identifier as written in the workflow (`"input"`, `"api-request"`, ...)
    fn node_type(&self) -> &str;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Validate configuration at workflow load time
    fn validate_config(&self, _config: &Map<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: String,

    pub node_name: String,

    /// Values routed from upstream nodes, keyed by port id, logical name and aliases
    pub inputs: HashMap<String, Value>,

    /// Static configuration (`data`) for this node
    pub config: Map<String, Value>,

    pub declared_inputs: Vec<PortSpec>,

    pub declared_outputs: Vec<PortSpec>,

    /// Value supplied by the caller for this node (input nodes only)
    pub run_input: Option<Value>,

    pub log: NodeLogger,
}

impl NodeContext {
    pub fn new(node_id: impl Into<String>, log: NodeLogger) -> Self {
        let node_id = node_id.into();
        Self {
            node_name: node_id.clone(),
            node_id,
            inputs: HashMap::new(),
            config: Map::new(),
            declared_inputs: Vec::new(),
            declared_outputs: Vec::new(),
            run_input: None,
            log,
        }
    }

    /// Context with a private log sink, for driving a node directly.
    pub fn detached(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self::new(node_id.clone(), NodeLogger::detached(node_id))
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_run_input(mut self, value: impl Into<Value>) -> Self {
        self.run_input = Some(value.into());
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// First input found under any of `names`, compared case-insensitively.
    pub fn find_input(&self, names: &[&str]) -> Option<&Value> {
        names.iter().find_map(|name| {
            self.inputs.get(*name).or_else(|| {
                self.inputs
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
        })
    }

    /// Value routed into the `index`-th declared input port.
    pub fn input_at(&self, index: usize) -> Option<&Value> {
        let port = self.declared_inputs.get(index)?;
        self.inputs
            .get(&port.id)
            .or_else(|| self.inputs.get(port.logical_name()))
    }

    /// Named lookup first, then the positional declared port, then any single input.
    pub fn primary_input(&self, names: &[&str]) -> Option<&Value> {
        self.find_input(names)
            .or_else(|| self.input_at(0))
            .or_else(|| {
                if self.inputs.len() == 1 {
                    self.inputs.values().next()
                } else {
                    None
                }
            })
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Non-empty string config value.
    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn config_f64(&self, name: &str) -> Option<f64> {
        match self.config.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn config_u64(&self, name: &str) -> Option<u64> {
        self.config_f64(name)
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as u64)
    }

    pub fn config_bool(&self, name: &str) -> Option<bool> {
        match self.config.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Output from node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// The node's result: a map keyed by output port, or a single scalar
    pub value: Value,

    /// Execution metadata
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    /// Empty port map, filled with [`NodeOutput::with_output`].
    pub fn new() -> Self {
        Self::value(Value::Object(Map::new()))
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self.value {
            Value::Object(map) => {
                map.insert(port.into(), value.into());
            }
            other => {
                let mut map = Map::new();
                map.insert(port.into(), value.into());
                *other = Value::Object(map);
            }
        }
        self
    }

    /// Shape a port map against declared outputs: one declared output yields the bare value.
    pub fn from_ports(mut ports: Map<String, Value>, declared: &[PortSpec]) -> Self {
        if let [only] = declared {
            let value = ports
                .remove(&only.id)
                .or_else(|| ports.remove(only.logical_name()))
                .unwrap_or(Value::Null);
            return Self::value(value);
        }
        Self::value(Value::Object(ports))
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.value.as_object().and_then(|map| map.get(port))
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.custom.insert(key.into(), value.into());
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub custom: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_input_is_case_insensitive() {
        let ctx = NodeContext::detached("n").with_input("User Message", "hello");
        assert_eq!(ctx.find_input(&["user message"]), Some(&json!("hello")));
        assert!(ctx.find_input(&["system"]).is_none());
    }

    #[test]
    fn single_declared_output_is_shaped_as_scalar() {
        let mut ports = Map::new();
        ports.insert("result".into(), json!(7));
        let out = NodeOutput::from_ports(ports, &[PortSpec::new("result", "Result", "number")]);
        assert_eq!(out.value, json!(7));

        let mut ports = Map::new();
        ports.insert("a".into(), json!(1));
        ports.insert("b".into(), json!(2));
        let declared = [PortSpec::new("a", "A", "number"), PortSpec::new("b", "B", "number")];
        let out = NodeOutput::from_ports(ports, &declared);
        assert_eq!(out.value, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn config_helpers_accept_strings() {
        let ctx = NodeContext::detached("n")
            .with_config("retries", "2")
            .with_config("failOnError", "true")
            .with_config("empty", "  ");
        assert_eq!(ctx.config_u64("retries"), Some(2));
        assert_eq!(ctx.config_bool("failOnError"), Some(true));
        assert_eq!(ctx.config_str("empty"), None);
    }
}
