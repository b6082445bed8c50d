use crate::custom::{CustomNodeManager, RegistrationError};
use crate::dispatch::NodeRuntime;
use crate::executor::{ExecutionResult, WorkflowExecutor};
use crate::registry::NodeRegistry;
use crate::sandbox::{SandboxConfig, SandboxMode, ScriptSandbox};
use crate::validator::{GraphValidator, ValidationReport};
use agentcore::diagnostics::DEFAULT_LOG_CAPACITY;
use agentcore::{
    CustomNodeDescriptor, Diagnostics, EventBus, ExecutionEvent, ExecutionLogEntry, FlowError,
    Value, WorkflowGraph,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Whole-run timeout; `None` disables it
    pub run_timeout_ms: Option<u64>,
    pub log_capacity: usize,
    pub event_buffer_size: usize,
    pub sandbox_mode: SandboxMode,
    pub script_timeout_ms: u64,
    pub max_loop_iterations: u64,
    pub max_code_length: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
            event_buffer_size: 1000,
            sandbox_mode: SandboxMode::Sandboxed,
            script_timeout_ms: 5000,
            max_loop_iterations: 1_000_000,
            max_code_length: 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `AGENTFLOW_*` environment variables. Unparsable values are
    /// ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var("AGENTFLOW_RUN_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.run_timeout_ms = None,
                Ok(ms) => self.run_timeout_ms = Some(ms),
                Err(_) => tracing::warn!("Ignoring AGENTFLOW_RUN_TIMEOUT_MS={}", raw),
            }
        }
        if let Ok(raw) = std::env::var("AGENTFLOW_SANDBOX_MODE") {
            match raw.parse() {
                Ok(mode) => self.sandbox_mode = mode,
                Err(e) => tracing::warn!("Ignoring AGENTFLOW_SANDBOX_MODE: {}", e),
            }
        }
        if let Ok(raw) = std::env::var("AGENTFLOW_LOG_CAPACITY") {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => self.log_capacity = capacity,
                _ => tracing::warn!("Ignoring AGENTFLOW_LOG_CAPACITY={}", raw),
            }
        }
        self
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            mode: self.sandbox_mode,
            timeout: Duration::from_millis(self.script_timeout_ms),
            max_loop_iterations: self.max_loop_iterations,
            max_code_length: self.max_code_length,
            ..SandboxConfig::default()
        }
    }
}

/// Runs workflows against an injected node registry.
///
/// A runner executes one workflow at a time; a second `execute` while a run is in
/// flight fails with [`FlowError::Busy`]. Custom node types registered on a runner are
/// visible to that runner only.
pub struct WorkflowRunner {
    registry: Arc<NodeRegistry>,
    custom: RwLock<CustomNodeManager>,
    diagnostics: Arc<Diagnostics>,
    events: Arc<EventBus>,
    config: RuntimeConfig,
    in_flight: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
}

impl WorkflowRunner {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let diagnostics = Arc::new(Diagnostics::new(config.log_capacity));
        Self::with_diagnostics(registry, config, diagnostics)
    }

    /// Runner reporting into an existing diagnostics sink.
    pub fn with_diagnostics(
        registry: Arc<NodeRegistry>,
        config: RuntimeConfig,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let custom = CustomNodeManager::new(ScriptSandbox::new(config.sandbox_config()))
            .with_reserved_types(registry.list_node_types());
        Self {
            registry,
            custom: RwLock::new(custom),
            diagnostics,
            events: Arc::new(EventBus::new(config.event_buffer_size)),
            config,
            in_flight: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<ExecutionLogEntry> {
        self.diagnostics.subscribe()
    }

    /// Register a custom node type. Waits for an in-flight run to finish first.
    pub async fn register_custom_node(
        &self,
        descriptor: CustomNodeDescriptor,
    ) -> Result<(), RegistrationError> {
        let node_type = descriptor.node_type.clone();
        let result = self.custom.write().await.register(descriptor);
        match &result {
            Ok(()) => self
                .diagnostics
                .info(format!("Registered custom node type '{}'", node_type)),
            Err(e) => self.diagnostics.error(e.to_string()),
        }
        result
    }

    pub async fn custom_node_types(&self) -> Vec<String> {
        self.custom.read().await.types()
    }

    pub async fn validate(&self, workflow: &WorkflowGraph) -> ValidationReport {
        self.validator().await.validate(workflow)
    }

    async fn validator(&self) -> GraphValidator {
        GraphValidator::new(self.registry.list_node_types())
            .with_registered_custom(self.custom.read().await.types())
    }

    /// Stop the current run before its next node. Work already started is not
    /// interrupted.
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Validate and run a raw JSON document in either envelope.
    pub async fn execute_document(
        &self,
        document: &Value,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        let (report, graph) = self.validator().await.validate_document(document);
        match graph {
            Some(graph) if report.valid => self.execute(&graph, inputs).await,
            _ => Err(self.reject(report)),
        }
    }

    /// Validate and run a workflow.
    pub async fn execute(
        &self,
        workflow: &WorkflowGraph,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            self.diagnostics
                .warn(format!("Rejected run of '{}': runner is busy", workflow.name));
            FlowError::Busy
        })?;

        let cancel = CancellationToken::new();
        *self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = cancel.clone();

        let report = self.validate(workflow).await;
        for warning in &report.warnings {
            self.diagnostics.warn(warning.clone());
        }
        if !report.valid {
            return Err(self.reject(report));
        }

        if !workflow.custom_nodes.is_empty() {
            let mut custom = self.custom.write().await;
            let mut errors = Vec::new();
            for descriptor in &workflow.custom_nodes {
                if let Err(e) = custom.register(descriptor.clone()) {
                    errors.push(e.to_string());
                }
            }
            if !errors.is_empty() {
                return Err(self.reject(ValidationReport {
                    valid: false,
                    errors,
                    warnings: Vec::new(),
                }));
            }
        }

        let custom = self.custom.read().await;
        let runtime = NodeRuntime::new(&self.registry, &custom);
        let executor = WorkflowExecutor::new(self.diagnostics.clone(), self.events.clone());
        let run = executor.execute(workflow, &runtime, &inputs, &cancel);

        match self.config.run_timeout_ms {
            Some(timeout_ms) => match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    self.diagnostics.error(format!(
                        "Workflow '{}' exceeded timeout of {}ms",
                        workflow.name, timeout_ms
                    ));
                    Err(FlowError::Timeout { timeout_ms })
                }
            },
            None => run.await,
        }
    }

    fn reject(&self, report: ValidationReport) -> FlowError {
        for error in &report.errors {
            self.diagnostics.error(error.clone());
        }
        FlowError::Validation {
            errors: report.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"run_timeout_ms": 250, "sandbox_mode": "direct"}"#).unwrap();
        assert_eq!(config.run_timeout_ms, Some(250));
        assert_eq!(config.sandbox_mode, SandboxMode::Direct);
        assert_eq!(config.log_capacity, 1000);
        assert_eq!(config.sandbox_config().timeout, Duration::from_millis(5000));
    }
}
