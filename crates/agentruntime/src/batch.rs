//! Runs one workflow against many input sets.
//!
//! Input sets are processed in chunks of `concurrency`; every item gets its own runner,
//! so runs overlap only across items. Inside a run nodes stay strictly sequential.

use crate::executor::ExecutionResult;
use crate::registry::NodeRegistry;
use crate::runtime::{RuntimeConfig, WorkflowRunner};
use agentcore::{CustomNodeDescriptor, Diagnostics, Value, WorkflowGraph};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressCallback = Box<dyn Fn(BatchProgress) + Send + Sync>;

pub struct BatchOptions {
    pub concurrency: usize,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            on_progress: None,
        }
    }
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(BatchProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }
}

pub struct BatchCoordinator {
    registry: Arc<NodeRegistry>,
    config: RuntimeConfig,
    custom_nodes: Vec<CustomNodeDescriptor>,
    diagnostics: Arc<Diagnostics>,
}

impl BatchCoordinator {
    pub fn new(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let diagnostics = Arc::new(Diagnostics::new(config.log_capacity));
        Self {
            registry,
            config,
            custom_nodes: Vec::new(),
            diagnostics,
        }
    }

    /// Custom node types registered on every per-item runner.
    pub fn with_custom_nodes(mut self, descriptors: Vec<CustomNodeDescriptor>) -> Self {
        self.custom_nodes = descriptors;
        self
    }

    /// Log sink shared by all per-item runners.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Results come back in input order, one per input set. Failures are captured per
    /// item and never abort the batch.
    pub async fn run_batch(
        &self,
        workflow: &WorkflowGraph,
        input_sets: Vec<HashMap<String, Value>>,
        options: BatchOptions,
    ) -> Vec<BatchItemResult> {
        let total = input_sets.len();
        let concurrency = options.concurrency.max(1);
        let mut results = Vec::with_capacity(total);

        let mut indexed = input_sets.into_iter().enumerate().peekable();
        while indexed.peek().is_some() {
            let chunk: Vec<_> = indexed.by_ref().take(concurrency).collect();
            let runs = chunk
                .into_iter()
                .map(|(index, inputs)| self.run_item(workflow, index, inputs));
            results.extend(join_all(runs).await);

            self.diagnostics
                .debug(format!("Batch progress: {}/{}", results.len(), total));
            if let Some(callback) = &options.on_progress {
                callback(BatchProgress {
                    completed: results.len(),
                    total,
                });
            }
        }

        let failed = results.iter().filter(|r| !r.success).count();
        self.diagnostics.info(format!(
            "Batch of {} finished: {} succeeded, {} failed",
            total,
            total - failed,
            failed
        ));
        results
    }

    async fn run_item(
        &self,
        workflow: &WorkflowGraph,
        index: usize,
        inputs: HashMap<String, Value>,
    ) -> BatchItemResult {
        let runner = WorkflowRunner::with_diagnostics(
            self.registry.clone(),
            self.config.clone(),
            self.diagnostics.clone(),
        );
        for descriptor in &self.custom_nodes {
            if let Err(e) = runner.register_custom_node(descriptor.clone()).await {
                return BatchItemResult {
                    index,
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                };
            }
        }

        match runner.execute(workflow, inputs).await {
            Ok(result) => BatchItemResult {
                index,
                success: true,
                result: Some(result),
                error: None,
            },
            Err(e) => BatchItemResult {
                index,
                success: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}
