use agentcore::{Connection, NodeSpec, WorkflowError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Dependency graph over a workflow's nodes.
///
/// Node weights are positions in the node slice; edge weights are positions in the
/// connection slice, so callers can always get back to the declared order.
pub struct FlowGraph {
    pub graph: DiGraph<usize, usize>,
    index: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    /// Build the graph, failing on connections whose endpoints do not exist.
    pub fn build(nodes: &[NodeSpec], connections: &[Connection]) -> Result<Self, WorkflowError> {
        let (graph, dangling) = Self::build_lenient(nodes, connections);
        if let Some(conn) = dangling.first() {
            let missing = if graph.index_of(&conn.source_node_id).is_none() {
                &conn.source_node_id
            } else {
                &conn.target_node_id
            };
            return Err(WorkflowError::NodeNotFound(missing.clone()));
        }
        Ok(graph)
    }

    /// Build the graph, skipping (and returning) connections with unknown endpoints.
    pub fn build_lenient<'c>(
        nodes: &[NodeSpec],
        connections: &'c [Connection],
    ) -> (Self, Vec<&'c Connection>) {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for (position, node) in nodes.iter().enumerate() {
            let idx = graph.add_node(position);
            index.entry(node.id.clone()).or_insert(idx);
        }

        let mut dangling = Vec::new();
        for (position, conn) in connections.iter().enumerate() {
            match (index.get(&conn.source_node_id), index.get(&conn.target_node_id)) {
                (Some(from), Some(to)) => {
                    graph.add_edge(*from, *to, position);
                }
                _ => dangling.push(conn),
            }
        }

        (Self { graph, index }, dangling)
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.index.get(node_id).copied()
    }

    /// Position of a graph node in the original node slice.
    pub fn position(&self, idx: NodeIndex) -> usize {
        self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Successors in connection-list order (one entry per connection).
    pub fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        edges.sort_by_key(|(position, _)| *position);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges_directed(idx, Direction::Incoming).count()
    }

    pub fn degree(&self, idx: NodeIndex) -> usize {
        self.in_degree(idx) + self.graph.edges_directed(idx, Direction::Outgoing).count()
    }

    /// Find one cycle using a depth-first search with an explicit recursion stack.
    /// Returns the node positions along the cycle, in order.
    pub fn find_cycle(&self) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }

            // Each frame holds a node and the successors still to visit.
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(start, self.successors(start))];
            marks[start.index()] = Mark::OnStack;

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(next) => match marks[next.index()] {
                        Mark::Unvisited => {
                            marks[next.index()] = Mark::OnStack;
                            let succ = self.successors(next);
                            stack.push((next, succ));
                        }
                        Mark::OnStack => {
                            let from = stack
                                .iter()
                                .position(|(n, _)| *n == next)
                                .unwrap_or(0);
                            return Some(
                                stack[from..]
                                    .iter()
                                    .map(|(n, _)| self.position(*n))
                                    .collect(),
                            );
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node.index()] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }
        None
    }
}
