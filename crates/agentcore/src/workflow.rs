use crate::{FlowError, Value};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// Marker written into the `format` field of the wrapped envelope.
pub const ENGINE_FORMAT: &str = "agentflow-sdk";

/// Node type that feeds caller-supplied values into a run.
pub const INPUT_NODE_TYPE: &str = "input";

/// Node type whose results make up a run's outputs.
pub const OUTPUT_NODE_TYPE: &str = "output";

pub type NodeId = String;

/// Complete workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_nodes: Vec<CustomNodeDescriptor>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(
        &mut self,
        source_node: impl Into<String>,
        source_port: impl Into<String>,
        target_node: impl Into<String>,
        target_port: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source_node_id: source_node.into(),
            source_port_id: source_port.into(),
            target_node_id: target_node.into(),
            target_port_id: target_port.into(),
        });
    }

    pub fn add_custom_node(&mut self, descriptor: CustomNodeDescriptor) {
        self.custom_nodes.push(descriptor);
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Parse either envelope from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, FlowError> {
        let document: Value = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Parse either envelope from an already decoded document.
    pub fn from_document(document: Value) -> Result<Self, FlowError> {
        Ok(serde_json::from_value(normalize_document(document))?)
    }

    /// Export using the wrapped envelope.
    pub fn to_wrapped(&self) -> Result<Value, FlowError> {
        let mut flow = serde_json::to_value(self)?;
        let custom_nodes = match flow.as_object_mut() {
            Some(obj) => obj.remove("customNodes").unwrap_or(Value::Array(Vec::new())),
            None => Value::Array(Vec::new()),
        };
        Ok(serde_json::json!({
            "format": ENGINE_FORMAT,
            "version": self.version.clone().unwrap_or_else(|| "1.0.0".to_string()),
            "flow": flow,
            "customNodes": custom_nodes,
        }))
    }
}

/// Rewrite a wrapped document (`{format, version, flow: {...}, customNodes}`) into the
/// direct shape. Direct documents pass through untouched.
pub fn normalize_document(document: Value) -> Value {
    let Value::Object(mut root) = document else {
        return document;
    };
    let is_wrapped = root.get("format").map(Value::is_string).unwrap_or(false)
        && root.get("flow").map(Value::is_object).unwrap_or(false);
    if !is_wrapped {
        return Value::Object(root);
    }

    let mut flow = match root.remove("flow") {
        Some(Value::Object(flow)) => flow,
        _ => Map::new(),
    };
    if !flow.contains_key("version") {
        if let Some(version) = root.remove("version") {
            flow.insert("version".to_string(), version);
        }
    }
    if let Some(custom) = root.remove("customNodes") {
        let keep_flow_list = flow
            .get("customNodes")
            .and_then(Value::as_array)
            .map(|list| !list.is_empty())
            .unwrap_or(false);
        if !keep_flow_list {
            flow.insert("customNodes".to_string(), custom);
        }
    }
    Value::Object(flow)
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: String::new(),
            data: Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    /// Name when set, id otherwise. Used to key run outputs.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn find_input(&self, port_id: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.id == port_id)
    }

    pub fn find_output(&self, port_id: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.id == port_id)
    }

    pub fn is_input(&self) -> bool {
        self.node_type == INPUT_NODE_TYPE
    }

    pub fn is_output(&self) -> bool {
        self.node_type == OUTPUT_NODE_TYPE
    }
}

/// Declared input or output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_data_type() -> String {
    "any".to_string()
}

impl PortSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data_type: data_type.into(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Logical name of the port: its display name, or its id when unnamed.
    pub fn logical_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Connection between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source_node_id: NodeId,
    #[serde(default)]
    pub source_port_id: String,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub target_port_id: String,
}

/// User-supplied node type: declared ports, a property schema and a script body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomNodeDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub execution_code: String,
}

impl CustomNodeDescriptor {
    pub fn new(node_type: impl Into<String>, execution_code: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            name: String::new(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: Vec::new(),
            execution_code: execution_code.into(),
        }
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_property(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }
}

/// Configurable property of a custom node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_data_type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl PropertySpec {
    pub fn new(id: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            data_type: data_type.into(),
            default_value: None,
            required: false,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}
