//! Chat-completion nodes backed by an OpenAI-compatible endpoint.
//!
//! Both nodes degrade to a flagged placeholder result when no API key is configured.

mod chat;
mod client;
mod structured;

pub use chat::{LlmNode, LlmNodeFactory};
pub use client::{ChatClient, ChatCompletion, ChatMessage, ChatSettings};
pub use structured::{derive_schema, extract_json, supports_structured_output, StructuredLlmNode, StructuredLlmNodeFactory};
