use crate::graph::FlowGraph;
use agentcore::{Connection, NodeSpec, WorkflowError};
use std::collections::VecDeque;

/// Topological ordering of workflow nodes (Kahn's algorithm).
pub struct ExecutionScheduler;

impl ExecutionScheduler {
    /// Total order over `nodes` consistent with every connection.
    ///
    /// Among nodes that become ready together the declared node order is kept, but callers
    /// must not rely on any particular order between independent nodes.
    pub fn order<'a>(
        nodes: &'a [NodeSpec],
        connections: &[Connection],
    ) -> Result<Vec<&'a NodeSpec>, WorkflowError> {
        let graph = FlowGraph::build(nodes, connections)?;

        let mut in_degree: Vec<usize> = graph
            .graph
            .node_indices()
            .map(|idx| graph.in_degree(idx))
            .collect();

        let mut queue: VecDeque<_> = graph
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        let mut ordered = Vec::with_capacity(nodes.len());
        while let Some(idx) = queue.pop_front() {
            ordered.push(&nodes[graph.position(idx)]);
            for next in graph.successors(idx) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }

        // The validator rejects cycles up front; this catches graphs that skipped it.
        if ordered.len() < graph.node_count() {
            return Err(WorkflowError::CyclicDependency);
        }

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore::WorkflowGraph;

    fn ids(order: &[&NodeSpec]) -> Vec<String> {
        order.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn diamond_respects_edges() {
        let mut wf = WorkflowGraph::new("diamond");
        for id in ["d", "b", "c", "a"] {
            wf.add_node(NodeSpec::new(id, "input"));
        }
        wf.connect("a", "out", "b", "in");
        wf.connect("a", "out", "c", "in");
        wf.connect("b", "out", "d", "in");
        wf.connect("c", "out", "d", "in");

        let order = ids(&ExecutionScheduler::order(&wf.nodes, &wf.connections).unwrap());
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        for conn in &wf.connections {
            assert!(pos(&conn.source_node_id) < pos(&conn.target_node_id));
        }
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut wf = WorkflowGraph::new("loop");
        wf.add_node(NodeSpec::new("a", "input"));
        wf.add_node(NodeSpec::new("b", "output"));
        wf.connect("a", "out", "b", "in");
        wf.connect("b", "out", "a", "in");

        let err = ExecutionScheduler::order(&wf.nodes, &wf.connections).unwrap_err();
        assert_eq!(err, WorkflowError::CyclicDependency);
    }

    #[test]
    fn duplicate_connections_count_once_each() {
        let mut wf = WorkflowGraph::new("dup");
        wf.add_node(NodeSpec::new("a", "input"));
        wf.add_node(NodeSpec::new("b", "output"));
        wf.connect("a", "out", "b", "in");
        wf.connect("a", "out", "b", "in");

        let order = ids(&ExecutionScheduler::order(&wf.nodes, &wf.connections).unwrap());
        assert_eq!(order, vec!["a", "b"]);
    }
}
