//! Workflow execution runtime
//!
//! This crate validates workflow graphs, orders their nodes, routes data between them,
//! and executes built-in and custom nodes one at a time through a [`WorkflowRunner`].

mod batch;
mod custom;
mod dispatch;
mod executor;
mod graph;
mod loader;
mod registry;
mod router;
mod runtime;
pub mod sandbox;
mod scheduler;
mod validator;

pub use batch::{BatchCoordinator, BatchItemResult, BatchOptions, BatchProgress, ProgressCallback};
pub use custom::{CompiledCustomNode, CustomNode, CustomNodeManager, RegistrationError};
pub use dispatch::NodeRuntime;
pub use executor::{ExecutionResult, ResultStore, WorkflowExecutor};
pub use graph::FlowGraph;
pub use loader::{load_custom_nodes, load_document, load_workflow};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry, PortDefinition};
pub use router::{DataRouter, RoutingPlan, SemanticRole};
pub use runtime::{RuntimeConfig, WorkflowRunner};
pub use sandbox::{SandboxConfig, SandboxError, SandboxMode, ScriptSandbox};
pub use scheduler::ExecutionScheduler;
pub use validator::{GraphValidator, ValidationReport};
