use crate::custom::CustomNodeManager;
use crate::registry::NodeRegistry;
use agentcore::{Node, NodeSpec, WorkflowError};

/// Maps a node's declared type to an executable handler.
///
/// Custom types registered on the runner are resolved before built-ins, so both kinds
/// are executed through the same [`Node`] interface.
pub struct NodeRuntime<'a> {
    registry: &'a NodeRegistry,
    custom: &'a CustomNodeManager,
}

impl<'a> NodeRuntime<'a> {
    pub fn new(registry: &'a NodeRegistry, custom: &'a CustomNodeManager) -> Self {
        Self { registry, custom }
    }

    pub fn knows(&self, node_type: &str) -> bool {
        self.custom.contains(node_type) || self.registry.contains(node_type)
    }

    /// Instantiate the handler for `spec`, checking its configuration.
    pub fn resolve(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, WorkflowError> {
        let node: Box<dyn Node> = if self.custom.contains(&spec.node_type) {
            let custom = self.custom.instantiate(&spec.node_type).map_err(|e| {
                WorkflowError::Invalid(format!("Node '{}': {}", spec.id, e))
            })?;
            Box::new(custom)
        } else {
            self.registry.create_node(&spec.node_type, &spec.data)?
        };

        node.validate_config(&spec.data)
            .map_err(|e| WorkflowError::Invalid(format!("Node '{}': {}", spec.id, e)))?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore::CustomNodeDescriptor;

    #[test]
    fn custom_types_resolve_and_unknown_types_fail() {
        let registry = NodeRegistry::new();
        let mut custom = CustomNodeManager::default();
        custom
            .register(CustomNodeDescriptor::new("echo", "function execute(i) { return i; }"))
            .unwrap();
        let runtime = NodeRuntime::new(&registry, &custom);

        let node = runtime.resolve(&NodeSpec::new("e", "echo")).unwrap();
        assert_eq!(node.node_type(), "echo");
        assert!(runtime.knows("echo"));

        let err = runtime.resolve(&NodeSpec::new("x", "teleport")).err().unwrap();
        assert_eq!(err, WorkflowError::UnknownNodeType("teleport".into()));
    }
}
