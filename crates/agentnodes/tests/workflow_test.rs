use agentcore::{FlowError, NodeError, NodeSpec, PortSpec, WorkflowGraph};
use agentnodes::{register_all, standard_registry, NodeDefaults};
use agentruntime::{NodeRegistry, WorkflowRunner};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn create_runner() -> WorkflowRunner {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    WorkflowRunner::new(Arc::new(registry))
}

fn greeting_workflow() -> WorkflowGraph {
    let mut wf = WorkflowGraph::new("greeting");
    wf.add_node(NodeSpec::new("first", "input").with_name("first").with_data("value", "Hello"));
    wf.add_node(NodeSpec::new("second", "input").with_name("second").with_data("value", "world"));
    wf.add_node(
        NodeSpec::new("join", "combine-text")
            .with_data("mode", "space")
            .with_input(PortSpec::new("text1", "Text 1", "string"))
            .with_input(PortSpec::new("text2", "Text 2", "string")),
    );
    wf.add_node(NodeSpec::new("out", "output").with_name("greeting"));
    wf.connect("first", "output", "join", "text1");
    wf.connect("second", "output", "join", "text2");
    wf.connect("join", "output", "out", "input");
    wf
}

#[tokio::test]
async fn test_registers_every_builtin() {
    let registry = standard_registry(NodeDefaults::default());
    for node_type in [
        "input",
        "output",
        "combine-text",
        "json-parse",
        "if-else",
        "api-request",
        "llm",
        "structured-llm",
        "pdf-input",
        "whisper-transcription",
        "image-input",
        "file-upload",
    ] {
        assert!(registry.contains(node_type), "{} should be registered", node_type);
        let metadata = registry.get_metadata(node_type).unwrap();
        assert!(!metadata.description.is_empty());
    }
}

#[tokio::test]
async fn test_text_pipeline_end_to_end() {
    let runner = create_runner();
    let result = runner.execute(&greeting_workflow(), HashMap::new()).await.unwrap();
    assert_eq!(result.outputs.get("greeting"), Some(&json!("Hello world")));

    let mut inputs = HashMap::new();
    inputs.insert("second".to_string(), json!("there"));
    let result = runner.execute(&greeting_workflow(), inputs).await.unwrap();
    assert_eq!(result.outputs.get("greeting"), Some(&json!("Hello there")));
}

#[tokio::test]
async fn test_json_parse_feeds_condition() {
    let mut wf = WorkflowGraph::new("triage");
    wf.add_node(NodeSpec::new("payload", "input").with_name("payload").with_data("inputType", "string"));
    wf.add_node(NodeSpec::new("score", "json-parse").with_data("field", "score"));
    wf.add_node(
        NodeSpec::new("gate", "if-else")
            .with_data("expression", "input >= 50")
            .with_data("trueValue", "pass")
            .with_data("falseValue", "fail"),
    );
    wf.add_node(NodeSpec::new("out", "output").with_name("verdict"));
    wf.connect("payload", "output", "score", "input");
    wf.connect("score", "output", "gate", "input");
    wf.connect("gate", "output", "out", "input");

    let runner = create_runner();
    for (payload, verdict) in [(r#"{"score": 72}"#, "pass"), (r#"{"score": 12}"#, "fail")] {
        let mut inputs = HashMap::new();
        inputs.insert("payload".to_string(), json!(payload));
        let result = runner.execute(&wf, inputs).await.unwrap();
        assert_eq!(result.outputs.get("verdict"), Some(&json!(verdict)));
    }
}

#[tokio::test]
async fn test_strict_json_parse_aborts_the_run() {
    let mut wf = WorkflowGraph::new("strict");
    wf.add_node(NodeSpec::new("raw", "input").with_data("value", "{broken"));
    wf.add_node(NodeSpec::new("parse", "json-parse").with_name("Parse").with_data("failOnError", true));
    wf.add_node(NodeSpec::new("out", "output"));
    wf.connect("raw", "output", "parse", "input");
    wf.connect("parse", "output", "out", "input");

    let err = create_runner().execute(&wf, HashMap::new()).await.unwrap_err();
    match err {
        FlowError::NodeExecution { node_id, node_name, source } => {
            assert_eq!(node_id, "parse");
            assert_eq!(node_name, "Parse");
            assert!(matches!(source, NodeError::JsonParse(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_llm_placeholder_keeps_graph_runnable() {
    let mut wf = WorkflowGraph::new("assistant");
    wf.add_node(NodeSpec::new("question", "input").with_name("question").with_data("value", "What is Rust?"));
    wf.add_node(NodeSpec::new("model", "llm").with_input(PortSpec::new("user", "User Message", "string")));
    wf.add_node(NodeSpec::new("out", "output").with_name("answer"));
    wf.connect("question", "output", "model", "user");
    wf.connect("model", "output", "out", "input");

    let result = create_runner().execute(&wf, HashMap::new()).await.unwrap();
    let answer = result.outputs.get("answer").unwrap();
    assert_eq!(answer["placeholder"], json!(true));
}

#[tokio::test]
async fn test_unknown_node_type_fails_validation() {
    let mut wf = WorkflowGraph::new("bad");
    wf.add_node(NodeSpec::new("in", "input"));
    wf.add_node(NodeSpec::new("mystery", "does-not-exist"));
    wf.connect("in", "output", "mystery", "input");

    let err = create_runner().execute(&wf, HashMap::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::Validation { .. }));
}
