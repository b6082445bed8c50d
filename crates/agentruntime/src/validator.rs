//! Structural and semantic checks run before any node executes.
//!
//! Errors block the run; warnings are advisory. All problems are collected so a caller
//! sees every defect at once.

use crate::graph::FlowGraph;
use agentcore::{normalize_document, CustomNodeDescriptor, PortSpec, Value, WorkflowGraph};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn finish(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

pub struct GraphValidator {
    builtin_types: HashSet<String>,
    registered_custom: HashSet<String>,
}

impl GraphValidator {
    pub fn new<I, S>(builtin_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            builtin_types: builtin_types.into_iter().map(Into::into).collect(),
            registered_custom: HashSet::new(),
        }
    }

    /// Custom types already registered on the runner (outside the graph document).
    pub fn with_registered_custom<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registered_custom = types.into_iter().map(Into::into).collect();
        self
    }

    /// Validate a raw JSON document (either envelope), starting with the top-level shape.
    pub fn validate_document(&self, document: &Value) -> (ValidationReport, Option<WorkflowGraph>) {
        let normalized = normalize_document(document.clone());
        let errors = check_document_shape(&normalized);
        if !errors.is_empty() {
            return (ValidationReport::finish(errors, Vec::new()), None);
        }

        match serde_json::from_value::<WorkflowGraph>(normalized) {
            Ok(graph) => (self.validate(&graph), Some(graph)),
            Err(e) => (
                ValidationReport::finish(vec![format!("Malformed workflow document: {}", e)], Vec::new()),
                None,
            ),
        }
    }

    pub fn validate(&self, graph: &WorkflowGraph) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let graph_custom: HashSet<&str> = graph
            .custom_nodes
            .iter()
            .map(|d| d.node_type.as_str())
            .collect();

        // Node ids and types
        let mut seen_ids = HashSet::new();
        for (position, node) in graph.nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                errors.push(format!("Node at index {} has no id", position));
            } else if !seen_ids.insert(node.id.as_str()) {
                errors.push(format!("Duplicate node id '{}'", node.id));
            }

            if node.node_type.trim().is_empty() {
                errors.push(format!("Node '{}' has no type", node.id));
            } else if !self.builtin_types.contains(&node.node_type)
                && !graph_custom.contains(node.node_type.as_str())
                && !self.registered_custom.contains(&node.node_type)
            {
                errors.push(format!(
                    "Node '{}' has unknown type '{}'",
                    node.id, node.node_type
                ));
            }
        }

        // Connections
        let nodes_by_id: HashMap<&str, _> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut target_ports: HashMap<(&str, &str), usize> = HashMap::new();
        for (position, conn) in graph.connections.iter().enumerate() {
            let source = nodes_by_id.get(conn.source_node_id.as_str());
            let target = nodes_by_id.get(conn.target_node_id.as_str());

            if source.is_none() {
                errors.push(format!(
                    "Connection {} references missing source node '{}'",
                    position, conn.source_node_id
                ));
            }
            let Some(target) = target else {
                errors.push(format!(
                    "Connection {} references missing target node '{}'",
                    position, conn.target_node_id
                ));
                continue;
            };

            if !target.inputs.is_empty() && target.find_input(&conn.target_port_id).is_none() {
                errors.push(format!(
                    "Connection {} targets unknown input port '{}' on node '{}'",
                    position, conn.target_port_id, target.id
                ));
            }

            if let Some(source) = source {
                if !source.outputs.is_empty()
                    && !conn.source_port_id.is_empty()
                    && source.find_output(&conn.source_port_id).is_none()
                {
                    warnings.push(format!(
                        "Connection {} reads undeclared output port '{}' of node '{}'; the whole result is used",
                        position, conn.source_port_id, source.id
                    ));
                }
            }

            if conn.source_node_id == conn.target_node_id {
                errors.push(format!("Node '{}' is connected to itself", conn.source_node_id));
            }

            *target_ports
                .entry((conn.target_node_id.as_str(), conn.target_port_id.as_str()))
                .or_default() += 1;
        }

        let mut duplicated: Vec<_> = target_ports.into_iter().filter(|(_, count)| *count > 1).collect();
        duplicated.sort();
        for ((node, port), count) in duplicated {
            warnings.push(format!(
                "Input port '{}' of node '{}' has {} incoming connections; the last one wins",
                port, node, count
            ));
        }

        // Cycles (self-loops are already reported above)
        let edges: Vec<_> = graph
            .connections
            .iter()
            .filter(|c| c.source_node_id != c.target_node_id)
            .cloned()
            .collect();
        let (flow_graph, _) = FlowGraph::build_lenient(&graph.nodes, &edges);
        if let Some(cycle) = flow_graph.find_cycle() {
            let mut path: Vec<&str> = cycle.iter().map(|p| graph.nodes[*p].id.as_str()).collect();
            if let Some(first) = path.first().copied() {
                path.push(first);
            }
            errors.push(format!("Cycle detected: {}", path.join(" -> ")));
        }

        // Custom node descriptors
        let mut custom_types = HashSet::new();
        for descriptor in &graph.custom_nodes {
            errors.extend(self.check_descriptor(descriptor));
            if !descriptor.node_type.is_empty() && !custom_types.insert(descriptor.node_type.as_str()) {
                errors.push(format!("Duplicate custom node type '{}'", descriptor.node_type));
            }
        }

        // Advisory checks
        if graph.nodes.is_empty() {
            warnings.push("Workflow has no nodes".to_string());
        } else {
            if !graph.nodes.iter().any(|n| n.is_input()) {
                warnings.push("Workflow has no input node".to_string());
            }
            if !graph.nodes.iter().any(|n| n.is_output()) {
                warnings.push("Workflow has no output node; all node results will be returned".to_string());
            }
            if graph.nodes.len() > 1 {
                for idx in flow_graph.graph.node_indices() {
                    if flow_graph.degree(idx) == 0 {
                        let node = &graph.nodes[flow_graph.position(idx)];
                        warnings.push(format!("Node '{}' is not connected to anything", node.id));
                    }
                }
            }
        }

        ValidationReport::finish(errors, warnings)
    }

    /// Checks on one custom node descriptor, independent of any graph.
    pub fn check_descriptor(&self, descriptor: &CustomNodeDescriptor) -> Vec<String> {
        let mut errors = Vec::new();
        let label = if descriptor.node_type.is_empty() {
            "<unnamed>"
        } else {
            descriptor.node_type.as_str()
        };

        if descriptor.node_type.trim().is_empty() {
            errors.push("Custom node has no type".to_string());
        } else if self.builtin_types.contains(&descriptor.node_type) {
            errors.push(format!(
                "Custom node type '{}' collides with a built-in type",
                descriptor.node_type
            ));
        }

        if descriptor.execution_code.trim().is_empty() {
            errors.push(format!("Custom node '{}' has no execution code", label));
        }

        for (kind, ports) in [("input", &descriptor.inputs), ("output", &descriptor.outputs)] {
            if let Some(name) = first_duplicate_port(ports) {
                errors.push(format!(
                    "Custom node '{}' declares {} port '{}' more than once",
                    label, kind, name
                ));
            }
        }

        let mut property_ids = HashSet::new();
        for property in &descriptor.properties {
            if !property_ids.insert(property.id.as_str()) {
                errors.push(format!(
                    "Custom node '{}' declares property '{}' more than once",
                    label, property.id
                ));
            }
        }

        errors
    }
}

fn first_duplicate_port(ports: &[PortSpec]) -> Option<String> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for port in ports {
        if !ids.insert(port.id.as_str()) {
            return Some(port.id.clone());
        }
        if !port.name.is_empty() && !names.insert(port.name.to_lowercase()) {
            return Some(port.name.clone());
        }
    }
    None
}

/// Required top-level fields present and correctly typed.
fn check_document_shape(document: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(root) = document.as_object() else {
        return vec!["Workflow document must be a JSON object".to_string()];
    };

    match root.get("name") {
        Some(Value::String(_)) => {}
        Some(_) => errors.push("Field 'name' must be a string".to_string()),
        None => errors.push("Missing required field 'name'".to_string()),
    }
    if let Some(version) = root.get("version") {
        if !version.is_string() {
            errors.push("Field 'version' must be a string".to_string());
        }
    }

    match root.get("nodes") {
        Some(Value::Array(nodes)) => {
            for (i, node) in nodes.iter().enumerate() {
                let Some(node) = node.as_object() else {
                    errors.push(format!("Node at index {} must be an object", i));
                    continue;
                };
                if !node.get("id").map(Value::is_string).unwrap_or(false) {
                    errors.push(format!("Node at index {} must have a string 'id'", i));
                }
                if !node.get("type").map(Value::is_string).unwrap_or(false) {
                    errors.push(format!("Node at index {} must have a string 'type'", i));
                }
            }
        }
        Some(_) => errors.push("Field 'nodes' must be an array".to_string()),
        None => errors.push("Missing required field 'nodes'".to_string()),
    }

    match root.get("connections") {
        Some(Value::Array(connections)) => {
            for (i, conn) in connections.iter().enumerate() {
                let ok = ["sourceNodeId", "targetNodeId"]
                    .iter()
                    .all(|key| conn.get(*key).map(Value::is_string).unwrap_or(false));
                if !ok {
                    errors.push(format!(
                        "Connection at index {} must have string 'sourceNodeId' and 'targetNodeId'",
                        i
                    ));
                }
            }
        }
        Some(_) => errors.push("Field 'connections' must be an array".to_string()),
        None => errors.push("Missing required field 'connections'".to_string()),
    }

    if let Some(custom) = root.get("customNodes") {
        if !custom.is_array() {
            errors.push("Field 'customNodes' must be an array".to_string());
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore::NodeSpec;
    use serde_json::json;

    fn validator() -> GraphValidator {
        GraphValidator::new(["input", "output", "combine-text"])
    }

    #[test]
    fn reports_all_errors_together() {
        let mut wf = WorkflowGraph::new("broken");
        wf.add_node(NodeSpec::new("a", "input"));
        wf.add_node(NodeSpec::new("a", "output"));
        wf.add_node(NodeSpec::new("c", "teleport"));
        wf.connect("a", "out", "ghost", "in");
        wf.connect("c", "out", "c", "in");

        let report = validator().validate(&wf);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("Duplicate node id 'a'")));
        assert!(report.errors.iter().any(|e| e.contains("unknown type 'teleport'")));
        assert!(report.errors.iter().any(|e| e.contains("missing target node 'ghost'")));
        assert!(report.errors.iter().any(|e| e.contains("connected to itself")));
    }

    #[test]
    fn cycle_is_fatal() {
        let mut wf = WorkflowGraph::new("loop");
        wf.add_node(NodeSpec::new("a", "combine-text"));
        wf.add_node(NodeSpec::new("b", "combine-text"));
        wf.connect("a", "out", "b", "in");
        wf.connect("b", "out", "a", "in");

        let report = validator().validate(&wf);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.starts_with("Cycle detected")));
    }

    #[test]
    fn undeclared_target_port_is_an_error() {
        let mut wf = WorkflowGraph::new("ports");
        wf.add_node(NodeSpec::new("a", "input"));
        wf.add_node(NodeSpec::new("b", "output").with_input(PortSpec::new("in", "Value", "any")));
        wf.connect("a", "out", "b", "wrong");

        let report = validator().validate(&wf);
        assert!(report.errors.iter().any(|e| e.contains("unknown input port 'wrong'")));
    }

    #[test]
    fn warnings_do_not_block() {
        let mut wf = WorkflowGraph::new("warn");
        wf.add_node(NodeSpec::new("a", "combine-text"));
        wf.add_node(NodeSpec::new("b", "combine-text"));
        wf.add_node(NodeSpec::new("c", "combine-text"));
        wf.connect("a", "out", "b", "text1");
        wf.connect("a", "out", "b", "text1");

        let report = validator().validate(&wf);
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("no input node")));
        assert!(report.warnings.iter().any(|w| w.contains("'c' is not connected")));
        assert!(report.warnings.iter().any(|w| w.contains("last one wins")));
    }

    #[test]
    fn custom_descriptor_checks() {
        let mut wf = WorkflowGraph::new("custom");
        wf.add_custom_node(CustomNodeDescriptor::new("input", "function execute() {}"));
        wf.add_custom_node(
            CustomNodeDescriptor::new("doubler", "  ")
                .with_input(PortSpec::new("x", "X", "number"))
                .with_input(PortSpec::new("x", "Y", "number")),
        );
        wf.add_custom_node(CustomNodeDescriptor::new("doubler", "function execute() {}"));

        let report = validator().validate(&wf);
        assert!(report.errors.iter().any(|e| e.contains("collides with a built-in")));
        assert!(report.errors.iter().any(|e| e.contains("no execution code")));
        assert!(report.errors.iter().any(|e| e.contains("input port 'x' more than once")));
        assert!(report.errors.iter().any(|e| e.contains("Duplicate custom node type 'doubler'")));
    }

    #[test]
    fn document_shape_is_checked_first() {
        let (report, graph) = validator().validate_document(&json!({
            "name": 3,
            "nodes": {},
        }));
        assert!(graph.is_none());
        assert!(report.errors.contains(&"Field 'name' must be a string".to_string()));
        assert!(report.errors.contains(&"Field 'nodes' must be an array".to_string()));
        assert!(report.errors.contains(&"Missing required field 'connections'".to_string()));
    }

    #[test]
    fn wrapped_document_validates() {
        let (report, graph) = validator().validate_document(&json!({
            "format": "agentflow-sdk",
            "version": "1.0.0",
            "flow": {
                "name": "ok",
                "nodes": [
                    {"id": "in", "type": "input"},
                    {"id": "out", "type": "output"}
                ],
                "connections": [
                    {"sourceNodeId": "in", "sourcePortId": "output", "targetNodeId": "out", "targetPortId": "input"}
                ]
            }
        }));
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(graph.unwrap().nodes.len(), 2);
    }
}
