//! Standard node library
//!
//! Built-in nodes for workflow I/O, text, JSON, branching, HTTP, chat completion and
//! document/audio ingestion.

mod condition;
mod config;
mod http;
mod ingest;
mod io;
pub mod llm;
pub mod payload;
mod text;
mod transform;

pub use condition::IfElseNode;
pub use config::{NodeDefaults, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL};
pub use http::{send_with_retry, ApiRequestNode, RetryPolicy, MAX_RETRIES};
pub use ingest::{FileUploadNode, ImageFormat, ImageInputNode, PdfInputNode, WhisperTranscriptionNode};
pub use io::{InputNode, OutputNode};
pub use llm::{LlmNode, StructuredLlmNode};
pub use text::CombineTextNode;
pub use transform::JsonParseNode;

use agentruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry. No credentials are configured, so the AI
/// and transcription nodes return placeholders.
pub fn register_all(registry: &mut NodeRegistry) {
    register_with(registry, NodeDefaults::default());
}

/// Register all standard nodes, sharing `defaults` with the nodes that call external APIs.
pub fn register_with(registry: &mut NodeRegistry, defaults: NodeDefaults) {
    registry.register(Arc::new(io::InputNodeFactory));
    registry.register(Arc::new(io::OutputNodeFactory));
    registry.register(Arc::new(text::CombineTextNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(condition::IfElseNodeFactory));
    registry.register(Arc::new(http::ApiRequestNodeFactory::new(defaults.clone())));
    registry.register(Arc::new(llm::LlmNodeFactory::new(defaults.clone())));
    registry.register(Arc::new(llm::StructuredLlmNodeFactory::new(defaults.clone())));
    registry.register(Arc::new(ingest::PdfInputNodeFactory));
    registry.register(Arc::new(ingest::WhisperTranscriptionNodeFactory::new(defaults)));
    registry.register(Arc::new(ingest::ImageInputNodeFactory));
    registry.register(Arc::new(ingest::FileUploadNodeFactory));
}

/// Registry holding every standard node.
pub fn standard_registry(defaults: NodeDefaults) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_with(&mut registry, defaults);
    registry
}
