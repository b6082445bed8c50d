use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Node '{node_name}' ({node_id}) failed: {source}")]
    NodeExecution {
        node_id: String,
        node_name: String,
        #[source]
        source: NodeError,
    },

    #[error("Workflow run exceeded timeout of {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Runner is already executing a workflow")]
    Busy,

    #[error("Workflow run was cancelled")]
    Cancelled,

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// The node error behind a `NodeExecution` failure, if any.
    pub fn node_error(&self) -> Option<&NodeError> {
        match self {
            FlowError::NodeExecution { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Network error after {retry_count} retries: {message}")]
    Network { message: String, retry_count: u32 },

    #[error("HTTP {status} after {retry_count} retries: {message}")]
    Http {
        status: u16,
        message: String,
        retry_count: u32,
    },

    #[error("Request timed out after {timeout_ms}ms ({retry_count} retries)")]
    Timeout { timeout_ms: u64, retry_count: u32 },

    #[error("Structured output error: {0}")]
    Schema(String),

    #[error("Custom node code failed: {0}")]
    CustomCode(String),
}

impl NodeError {
    /// Network failures, timeouts and 5xx responses may succeed on a later attempt.
    /// Client errors (4xx) never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Network { .. } | NodeError::Timeout { .. } => true,
            NodeError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Number of retries spent before this error was surfaced.
    pub fn retry_count(&self) -> u32 {
        match self {
            NodeError::Network { retry_count, .. }
            | NodeError::Http { retry_count, .. }
            | NodeError::Timeout { retry_count, .. } => *retry_count,
            _ => 0,
        }
    }

    pub fn with_retry_count(self, count: u32) -> Self {
        match self {
            NodeError::Network { message, .. } => NodeError::Network {
                message,
                retry_count: count,
            },
            NodeError::Http { status, message, .. } => NodeError::Http {
                status,
                message,
                retry_count: count,
            },
            NodeError::Timeout { timeout_ms, .. } => NodeError::Timeout {
                timeout_ms,
                retry_count: count,
            },
            other => other,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Node {0} already produced a result in this run")]
    DuplicateResult(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_retryable() {
        let not_found = NodeError::Http {
            status: 404,
            message: "Not Found".into(),
            retry_count: 0,
        };
        assert!(!not_found.is_retryable());

        let unavailable = NodeError::Http {
            status: 503,
            message: "Service Unavailable".into(),
            retry_count: 0,
        };
        assert!(unavailable.is_retryable());
        assert!(NodeError::Timeout { timeout_ms: 10, retry_count: 0 }.is_retryable());
        assert!(!NodeError::Schema("bad".into()).is_retryable());
    }

    #[test]
    fn retry_count_is_carried_over() {
        let err = NodeError::Network {
            message: "connection reset".into(),
            retry_count: 0,
        }
        .with_retry_count(3);
        assert_eq!(err.retry_count(), 3);
    }

    #[test]
    fn validation_error_lists_every_problem() {
        let err = FlowError::Validation {
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Workflow validation failed: a; b");
    }
}
