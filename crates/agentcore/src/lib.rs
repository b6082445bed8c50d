//! Core abstractions for the agentflow engine
//!
//! This crate provides the workflow data model, the node trait, the error taxonomy and
//! the diagnostics sink that every other crate depends on.

pub mod diagnostics;
mod error;
mod events;
mod node;
pub mod value;
mod workflow;

pub use diagnostics::{Diagnostics, ExecutionLogEntry, LogLevel, NodeLogger};
pub use error::{FlowError, NodeError, WorkflowError};
pub use events::{EventBus, ExecutionEvent, ExecutionId};
pub use node::{Node, NodeContext, NodeMetadata, NodeOutput};
pub use value::{DataKind, Value};
pub use workflow::{
    normalize_document, Connection, CustomNodeDescriptor, NodeId, NodeSpec, PortSpec,
    PropertySpec, WorkflowGraph, ENGINE_FORMAT, INPUT_NODE_TYPE, OUTPUT_NODE_TYPE,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
