use crate::dispatch::NodeRuntime;
use crate::router::RoutingPlan;
use crate::scheduler::ExecutionScheduler;
use agentcore::{
    Diagnostics, EventBus, ExecutionEvent, ExecutionId, FlowError, LogLevel, Node, NodeContext,
    NodeLogger, NodeSpec, Value, WorkflowError, WorkflowGraph,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Run-scoped node results. Each node id can be written once.
#[derive(Debug, Default)]
pub struct ResultStore {
    values: HashMap<String, Value>,
}

impl ResultStore {
    pub fn insert(&mut self, node_id: &str, value: Value) -> Result<(), WorkflowError> {
        if self.values.contains_key(node_id) {
            return Err(WorkflowError::DuplicateResult(node_id.to_string()));
        }
        self.values.insert(node_id.to_string(), value);
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.values.get(node_id)
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}

/// Result of workflow execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    /// Output node results keyed by node name (or id when unnamed)
    pub outputs: HashMap<String, Value>,
    /// Every executed node's result keyed by node id
    pub node_results: HashMap<String, Value>,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub duration_ms: u64,
}

/// Executes one workflow run: nodes strictly one at a time, in scheduler order.
pub struct WorkflowExecutor {
    diagnostics: Arc<Diagnostics>,
    events: Arc<EventBus>,
}

impl WorkflowExecutor {
    pub fn new(diagnostics: Arc<Diagnostics>, events: Arc<EventBus>) -> Self {
        Self { diagnostics, events }
    }

    /// Execute a validated workflow.
    ///
    /// `inputs` are keyed by input node id or name. Cancellation is checked between
    /// nodes; a node that has started always runs to completion.
    pub async fn execute(
        &self,
        workflow: &WorkflowGraph,
        runtime: &NodeRuntime<'_>,
        inputs: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, FlowError> {
        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();

        self.events.emit(ExecutionEvent::RunStarted {
            execution_id,
            workflow_name: workflow.name.clone(),
            node_count: workflow.nodes.len(),
            timestamp: Utc::now(),
        });
        self.diagnostics.info(format!(
            "Starting workflow '{}' ({} nodes)",
            workflow.name,
            workflow.nodes.len()
        ));

        let result = self
            .run_nodes(workflow, runtime, inputs, cancel, execution_id)
            .await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        self.events.emit(ExecutionEvent::RunCompleted {
            execution_id,
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(results) => {
                self.diagnostics.info(format!(
                    "Workflow '{}' completed in {}ms",
                    workflow.name, duration_ms
                ));
                let outputs = collect_outputs(workflow, &results);
                Ok(ExecutionResult {
                    execution_id,
                    outputs,
                    completed_nodes: results.len(),
                    total_nodes: workflow.nodes.len(),
                    node_results: results.into_inner(),
                    duration_ms,
                })
            }
            Err(e) => {
                self.diagnostics.error(format!("Workflow '{}' failed: {}", workflow.name, e));
                Err(e)
            }
        }
    }

    async fn run_nodes(
        &self,
        workflow: &WorkflowGraph,
        runtime: &NodeRuntime<'_>,
        inputs: &HashMap<String, Value>,
        cancel: &CancellationToken,
        execution_id: ExecutionId,
    ) -> Result<ResultStore, FlowError> {
        let order = ExecutionScheduler::order(&workflow.nodes, &workflow.connections)?;

        // Every handler is resolved before anything runs, so an unknown type or bad
        // config never leaves a run half done.
        let mut handlers: Vec<(&NodeSpec, Box<dyn Node>)> = Vec::with_capacity(order.len());
        for spec in order {
            handlers.push((spec, runtime.resolve(spec)?));
        }

        let plan = RoutingPlan::build(workflow);
        let mut results = ResultStore::default();

        for (spec, node) in handlers {
            if cancel.is_cancelled() {
                self.diagnostics
                    .warn(format!("Run cancelled before node '{}'", spec.display_name()));
                return Err(FlowError::Cancelled);
            }

            let ctx = self.context_for(spec, &plan, &results, inputs);
            self.events.emit(ExecutionEvent::NodeStarted {
                execution_id,
                node_id: spec.id.clone(),
                node_type: spec.node_type.clone(),
                timestamp: Utc::now(),
            });
            tracing::debug!(node = %spec.id, node_type = %spec.node_type, "executing node");

            let start = Instant::now();
            let outcome = node.execute(ctx).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    self.events.emit(ExecutionEvent::NodeCompleted {
                        execution_id,
                        node_id: spec.id.clone(),
                        result: output.value.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    self.node_log(spec, LogLevel::Debug, format!("completed in {}ms", duration_ms));
                    results.insert(&spec.id, output.value)?;
                }
                Err(e) => {
                    self.node_log(spec, LogLevel::Error, format!("failed: {}", e));
                    self.events.emit(ExecutionEvent::NodeFailed {
                        execution_id,
                        node_id: spec.id.clone(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Err(FlowError::NodeExecution {
                        node_id: spec.id.clone(),
                        node_name: spec.display_name().to_string(),
                        source: e,
                    });
                }
            }
        }

        Ok(results)
    }

    fn context_for(
        &self,
        spec: &NodeSpec,
        plan: &RoutingPlan,
        results: &ResultStore,
        inputs: &HashMap<String, Value>,
    ) -> NodeContext {
        let log = NodeLogger::new(&spec.id, spec.display_name(), self.diagnostics.clone());
        let mut ctx = NodeContext::new(&spec.id, log);
        ctx.node_name = spec.display_name().to_string();
        ctx.inputs = plan.inputs_for(&spec.id, results.as_map());
        ctx.config = spec.data.clone();
        ctx.declared_inputs = spec.inputs.clone();
        ctx.declared_outputs = spec.outputs.clone();
        if spec.is_input() {
            ctx.run_input = inputs
                .get(&spec.id)
                .or_else(|| inputs.get(&spec.name))
                .cloned();
        }
        ctx
    }

    fn node_log(&self, spec: &NodeSpec, level: LogLevel, message: String) {
        NodeLogger::new(&spec.id, spec.display_name(), self.diagnostics.clone()).log(level, message, None);
    }
}

/// Output nodes keyed by name. Without any output node, every non-input result is
/// returned instead.
fn collect_outputs(workflow: &WorkflowGraph, results: &ResultStore) -> HashMap<String, Value> {
    let has_outputs = workflow.nodes.iter().any(NodeSpec::is_output);
    workflow
        .nodes
        .iter()
        .filter(|spec| if has_outputs { spec.is_output() } else { !spec.is_input() })
        .filter_map(|spec| {
            results
                .get(&spec.id)
                .map(|value| (spec.display_name().to_string(), value.clone()))
        })
        .collect()
}
