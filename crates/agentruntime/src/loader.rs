use agentcore::{CustomNodeDescriptor, FlowError, Value, WorkflowGraph};
use std::path::Path;

/// Read every `*.json` custom node descriptor in `dir`, in file name order.
///
/// A file may hold a single descriptor or an array of them.
pub fn load_custom_nodes(dir: impl AsRef<Path>) -> Result<Vec<CustomNodeDescriptor>, FlowError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() && path.extension() == Some("json".as_ref()) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut descriptors = Vec::new();
    for path in paths {
        let document: Value = serde_json::from_reader(std::fs::File::open(&path)?)?;
        match document {
            Value::Array(items) => {
                for item in items {
                    descriptors.push(serde_json::from_value(item)?);
                }
            }
            other => descriptors.push(serde_json::from_value(other)?),
        }
        tracing::debug!("Loaded custom node descriptors from {}", path.display());
    }
    Ok(descriptors)
}

/// Read a workflow in either envelope.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowGraph, FlowError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    WorkflowGraph::from_json_str(&text)
}

/// Read a workflow file as a raw document, for validation before parsing.
pub fn load_document(path: impl AsRef<Path>) -> Result<Value, FlowError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&text)?)
}
