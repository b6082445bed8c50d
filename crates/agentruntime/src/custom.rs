//! User-supplied node types.
//!
//! A descriptor declares ports, a property schema and a script body. Registration checks
//! the descriptor and compiles the body once; execution maps inputs and properties by
//! declared name, runs the body in the [`ScriptSandbox`], and maps the result back onto
//! the declared outputs.

use crate::sandbox::{ScriptSandbox, SandboxError};
use crate::validator::GraphValidator;
use agentcore::value::{coerce, DataKind};
use agentcore::{
    CustomNodeDescriptor, Node, NodeContext, NodeError, NodeLogger, NodeOutput, Value,
};
use async_trait::async_trait;
use serde_json::Map;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("invalid custom node '{node_type}': {}", .problems.join("; "))]
    Invalid {
        node_type: String,
        problems: Vec<String>,
    },

    #[error("custom node '{node_type}': {source}")]
    Code {
        node_type: String,
        #[source]
        source: SandboxError,
    },
}

/// A registered descriptor whose body passed the syntax check.
#[derive(Debug)]
pub struct CompiledCustomNode {
    descriptor: CustomNodeDescriptor,
}

impl CompiledCustomNode {
    pub fn descriptor(&self) -> &CustomNodeDescriptor {
        &self.descriptor
    }

    /// Inputs keyed by declared id, looked up by id and then by name.
    fn map_inputs(&self, inputs: &HashMap<String, Value>) -> Map<String, Value> {
        let mut mapped = Map::new();
        for port in &self.descriptor.inputs {
            let kind = DataKind::parse(&port.data_type);
            let value = inputs
                .get(&port.id)
                .or_else(|| inputs.get(port.logical_name()))
                .or_else(|| {
                    inputs
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(port.logical_name()))
                        .map(|(_, v)| v)
                })
                .cloned();
            let value = match value {
                Some(v) => coerce(v, kind),
                None => kind.default_value(),
            };
            mapped.insert(port.id.clone(), value.clone());
            if port.logical_name() != port.id {
                mapped.insert(port.logical_name().to_string(), value);
            }
        }
        mapped
    }

    /// Declared defaults, overlaid by `data.properties` and then by top-level `data` keys.
    fn map_properties(&self, data: &Map<String, Value>) -> Map<String, Value> {
        let nested = data.get("properties").and_then(Value::as_object);
        let mut mapped = Map::new();
        for prop in &self.descriptor.properties {
            let kind = DataKind::parse(&prop.data_type);
            let value = data
                .get(&prop.id)
                .or_else(|| nested.and_then(|n| n.get(&prop.id)))
                .cloned()
                .or_else(|| prop.default_value.clone());
            let value = match value {
                Some(v) => coerce(v, kind),
                None => kind.default_value(),
            };
            mapped.insert(prop.id.clone(), value);
        }
        mapped
    }

    /// Map the script result onto declared outputs. A single declared output is shaped
    /// as a scalar; a returned map is keyed by output id or name.
    fn map_outputs(&self, output: Value) -> NodeOutput {
        let declared = &self.descriptor.outputs;
        match output {
            Value::Object(map) if !declared.is_empty() => {
                let matches_port = declared
                    .iter()
                    .any(|p| map.contains_key(&p.id) || map.contains_key(p.logical_name()));
                if !matches_port {
                    return NodeOutput::value(Value::Object(map));
                }
                let mut ports = Map::new();
                for port in declared {
                    let value = map
                        .get(&port.id)
                        .or_else(|| map.get(port.logical_name()))
                        .cloned()
                        .unwrap_or(Value::Null);
                    ports.insert(port.id.clone(), value);
                }
                NodeOutput::from_ports(ports, declared)
            }
            other => NodeOutput::value(other),
        }
    }
}

/// Registry of custom node types owned by one runner.
#[derive(Default)]
pub struct CustomNodeManager {
    sandbox: ScriptSandbox,
    reserved: HashSet<String>,
    nodes: HashMap<String, Arc<CompiledCustomNode>>,
}

impl CustomNodeManager {
    pub fn new(sandbox: ScriptSandbox) -> Self {
        Self {
            sandbox,
            reserved: HashSet::new(),
            nodes: HashMap::new(),
        }
    }

    /// Type names custom descriptors may not take (the built-in types).
    pub fn with_reserved_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn sandbox(&self) -> &ScriptSandbox {
        &self.sandbox
    }

    /// Register a descriptor. Re-registering a type replaces the previous definition.
    pub fn register(&mut self, descriptor: CustomNodeDescriptor) -> Result<(), RegistrationError> {
        let problems = GraphValidator::new(self.reserved.iter().cloned()).check_descriptor(&descriptor);
        if !problems.is_empty() {
            return Err(RegistrationError::Invalid {
                node_type: descriptor.node_type,
                problems,
            });
        }
        self.sandbox
            .check_code(&descriptor.execution_code)
            .map_err(|source| RegistrationError::Code {
                node_type: descriptor.node_type.clone(),
                source,
            })?;

        tracing::debug!(node_type = %descriptor.node_type, "registered custom node");
        self.nodes.insert(
            descriptor.node_type.clone(),
            Arc::new(CompiledCustomNode { descriptor }),
        );
        Ok(())
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<CompiledCustomNode>> {
        self.nodes.get(node_type).cloned()
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.nodes.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run a registered type directly against an input map and node data.
    pub async fn execute(
        &self,
        node_type: &str,
        inputs: &HashMap<String, Value>,
        properties: &Map<String, Value>,
    ) -> Result<Value, NodeError> {
        let node = self.instantiate(node_type)?;
        let mut ctx = NodeContext::detached(node_type);
        ctx.inputs = inputs.clone();
        ctx.config = properties.clone();
        Ok(node.execute(ctx).await?.value)
    }

    /// A [`Node`] bound to this manager's sandbox, for uniform dispatch.
    pub fn instantiate(&self, node_type: &str) -> Result<CustomNode, NodeError> {
        let compiled = self.get(node_type).ok_or_else(|| {
            NodeError::Configuration(format!("Unknown custom node type: {}", node_type))
        })?;
        Ok(CustomNode {
            compiled,
            sandbox: self.sandbox.clone(),
        })
    }
}

pub struct CustomNode {
    compiled: Arc<CompiledCustomNode>,
    sandbox: ScriptSandbox,
}

#[async_trait]
impl Node for CustomNode {
    fn node_type(&self) -> &str {
        &self.compiled.descriptor.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let inputs = Value::Object(self.compiled.map_inputs(&ctx.inputs));
        let properties = Value::Object(self.compiled.map_properties(&ctx.config));

        let result = self
            .sandbox
            .run_custom(&self.compiled.descriptor.execution_code, &inputs, &properties)
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                ctx.log.error(format!("custom code failed: {}", e));
                return Err(e.into());
            }
        };
        forward_logs(&ctx.log, &outcome.logs);

        Ok(self.compiled.map_outputs(outcome.output))
    }
}

fn forward_logs(log: &NodeLogger, lines: &[crate::sandbox::ScriptLog]) {
    for line in lines {
        log.log(line.level, line.message.clone(), None);
    }
}
