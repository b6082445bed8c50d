//! Resolves a node's input values from upstream results.
//!
//! Bindings are computed once per graph: for every connection the router knows which
//! field to pull out of the source result and under which keys to publish it on the
//! target. Keys are the target port id, its logical (display) name, and the conventional
//! alias of any semantic role the name mentions.

use agentcore::{Value, WorkflowGraph};
use std::collections::HashMap;

/// Semantic roles recognized in port names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticRole {
    Input,
    User,
    System,
    Context,
    Text,
}

impl SemanticRole {
    const ALL: [SemanticRole; 5] = [
        SemanticRole::Input,
        SemanticRole::User,
        SemanticRole::System,
        SemanticRole::Context,
        SemanticRole::Text,
    ];

    /// Canonical key handlers look the value up by.
    pub fn alias(&self) -> &'static str {
        match self {
            SemanticRole::Input => "input",
            SemanticRole::User => "user",
            SemanticRole::System => "system",
            SemanticRole::Context => "context",
            SemanticRole::Text => "text",
        }
    }

    /// Every role whose alias appears in `name`.
    pub fn detect(name: &str) -> Vec<SemanticRole> {
        let lowered = name.to_lowercase();
        Self::ALL
            .into_iter()
            .filter(|role| lowered.contains(role.alias()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct InputBinding {
    source_node_id: String,
    /// Field to extract from a map-shaped source result.
    source_field: Option<String>,
    keys: Vec<String>,
    aliases: Vec<&'static str>,
}

/// Per-graph routing table, built once before a run.
#[derive(Debug, Clone, Default)]
pub struct RoutingPlan {
    bindings: HashMap<String, Vec<InputBinding>>,
}

impl RoutingPlan {
    pub fn build(graph: &WorkflowGraph) -> Self {
        let mut bindings: HashMap<String, Vec<InputBinding>> = HashMap::new();

        for conn in &graph.connections {
            let (Some(source), Some(target)) = (
                graph.find_node(&conn.source_node_id),
                graph.find_node(&conn.target_node_id),
            ) else {
                continue;
            };

            let source_field = source
                .find_output(&conn.source_port_id)
                .map(|port| port.id.clone());

            let port_id = if conn.target_port_id.is_empty() {
                "input".to_string()
            } else {
                conn.target_port_id.clone()
            };
            let logical = target
                .find_input(&conn.target_port_id)
                .map(|port| port.logical_name().to_string())
                .unwrap_or_else(|| port_id.clone());

            let mut keys = vec![logical.clone()];
            if port_id != logical {
                keys.push(port_id);
            }
            let aliases = SemanticRole::detect(&logical)
                .into_iter()
                .map(|role| role.alias())
                .filter(|alias| !keys.iter().any(|k| k == alias))
                .collect();

            bindings.entry(target.id.clone()).or_default().push(InputBinding {
                source_node_id: source.id.clone(),
                source_field,
                keys,
                aliases,
            });
        }

        Self { bindings }
    }

    /// Input map for `node_id` given the results produced so far.
    ///
    /// Several connections into the same port overwrite each other in connection order.
    /// Explicit keys always win over semantic aliases.
    pub fn inputs_for(&self, node_id: &str, results: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut inputs = HashMap::new();
        let Some(bindings) = self.bindings.get(node_id) else {
            return inputs;
        };

        let resolved: Vec<(&InputBinding, Value)> = bindings
            .iter()
            .filter_map(|binding| {
                let result = results.get(&binding.source_node_id)?;
                Some((binding, extract(result, binding.source_field.as_deref())))
            })
            .collect();

        for (binding, value) in &resolved {
            for alias in &binding.aliases {
                inputs.insert(alias.to_string(), value.clone());
            }
        }
        for (binding, value) in resolved {
            for key in &binding.keys {
                inputs.insert(key.clone(), value.clone());
            }
        }

        inputs
    }

    pub fn upstream_count(&self, node_id: &str) -> usize {
        self.bindings.get(node_id).map(Vec::len).unwrap_or(0)
    }
}

fn extract(result: &Value, field: Option<&str>) -> Value {
    match (result, field) {
        (Value::Object(map), Some(field)) => map.get(field).cloned().unwrap_or(Value::Null),
        _ => result.clone(),
    }
}

/// One-shot routing without keeping a plan around.
pub struct DataRouter;

impl DataRouter {
    pub fn inputs_for(
        node_id: &str,
        graph: &WorkflowGraph,
        results: &HashMap<String, Value>,
    ) -> HashMap<String, Value> {
        RoutingPlan::build(graph).inputs_for(node_id, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore::{NodeSpec, PortSpec};
    use serde_json::json;

    fn results(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn extracts_declared_output_field() {
        let mut wf = WorkflowGraph::new("r");
        wf.add_node(
            NodeSpec::new("api", "api-request")
                .with_output(PortSpec::new("data", "Data", "json"))
                .with_output(PortSpec::new("status", "Status", "number")),
        );
        wf.add_node(NodeSpec::new("out", "output").with_input(PortSpec::new("in", "Value", "any")));
        wf.connect("api", "status", "out", "in");

        let inputs = DataRouter::inputs_for(
            "out",
            &wf,
            &results(&[("api", json!({"data": {"x": 1}, "status": 200}))]),
        );
        assert_eq!(inputs.get("Value"), Some(&json!(200)));
        assert_eq!(inputs.get("in"), Some(&json!(200)));
    }

    #[test]
    fn undeclared_port_uses_whole_result() {
        let mut wf = WorkflowGraph::new("r");
        wf.add_node(NodeSpec::new("a", "input"));
        wf.add_node(NodeSpec::new("b", "output"));
        wf.connect("a", "output", "b", "input");

        let inputs = DataRouter::inputs_for("b", &wf, &results(&[("a", json!({"k": "v"}))]));
        assert_eq!(inputs.get("input"), Some(&json!({"k": "v"})));
    }

    #[test]
    fn semantic_aliases_are_published() {
        let mut wf = WorkflowGraph::new("r");
        wf.add_node(NodeSpec::new("sys", "input"));
        wf.add_node(NodeSpec::new("msg", "input"));
        wf.add_node(
            NodeSpec::new("llm", "llm")
                .with_input(PortSpec::new("p1", "System Prompt", "text"))
                .with_input(PortSpec::new("p2", "User Message", "text")),
        );
        wf.connect("sys", "output", "llm", "p1");
        wf.connect("msg", "output", "llm", "p2");

        let inputs = DataRouter::inputs_for(
            "llm",
            &wf,
            &results(&[("sys", json!("be terse")), ("msg", json!("hi"))]),
        );
        assert_eq!(inputs.get("system"), Some(&json!("be terse")));
        assert_eq!(inputs.get("user"), Some(&json!("hi")));
        assert_eq!(inputs.get("User Message"), Some(&json!("hi")));
        assert_eq!(inputs.get("p1"), Some(&json!("be terse")));
    }

    #[test]
    fn last_connection_into_a_port_wins() {
        let mut wf = WorkflowGraph::new("r");
        wf.add_node(NodeSpec::new("a", "input"));
        wf.add_node(NodeSpec::new("b", "input"));
        wf.add_node(NodeSpec::new("c", "output"));
        wf.connect("a", "output", "c", "input");
        wf.connect("b", "output", "c", "input");

        let inputs = DataRouter::inputs_for(
            "c",
            &wf,
            &results(&[("a", json!("first")), ("b", json!("second"))]),
        );
        assert_eq!(inputs.get("input"), Some(&json!("second")));
    }

    #[test]
    fn explicit_key_beats_alias() {
        let mut wf = WorkflowGraph::new("r");
        wf.add_node(NodeSpec::new("a", "input"));
        wf.add_node(NodeSpec::new("b", "input"));
        wf.add_node(
            NodeSpec::new("c", "json-parse")
                .with_input(PortSpec::new("input", "input", "text"))
                .with_input(PortSpec::new("raw", "Raw input", "text")),
        );
        wf.connect("a", "output", "c", "input");
        wf.connect("b", "output", "c", "raw");

        let inputs = DataRouter::inputs_for("c", &wf, &results(&[("a", json!("A")), ("b", json!("B"))]));
        assert_eq!(inputs.get("input"), Some(&json!("A")));
        assert_eq!(inputs.get("Raw input"), Some(&json!("B")));
    }
}
