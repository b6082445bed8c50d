use agentcore::{ExecutionEvent, LogLevel, NodeSpec, Value, WorkflowGraph};
use agentnodes::NodeDefaults;
use agentruntime::{
    load_custom_nodes, load_document, NodeRegistry, RuntimeConfig, SandboxMode, WorkflowRunner,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Run and inspect agentflow workflows", long_about = None)]
struct Cli {
    /// JSON file with `runtime` and `nodes` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Workflow JSON, plain or wrapped
        file: PathBuf,

        /// Input node override as name=value (value parsed as JSON when possible)
        #[arg(short, long = "input", value_name = "NAME=VALUE")]
        inputs: Vec<String>,

        /// JSON object of input overrides
        #[arg(long)]
        inputs_file: Option<PathBuf>,

        /// Directory of custom node descriptors to register first
        #[arg(long)]
        custom_nodes: Option<PathBuf>,

        /// Override the configured sandbox mode (sandboxed | direct)
        #[arg(long)]
        sandbox: Option<SandboxMode>,

        /// Print the full execution result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow file without running it
    Validate {
        file: PathBuf,

        #[arg(long)]
        custom_nodes: Option<PathBuf>,
    },

    /// List available node types
    Nodes,

    /// Write an example workflow
    Init {
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    runtime: RuntimeConfig,
    nodes: NodeDefaults,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => CliConfig::default(),
        };
        Ok(CliConfig {
            runtime: config.runtime.with_env_overrides(),
            nodes: config.nodes.with_env_overrides(),
        })
    }

    fn registry(&self) -> Arc<NodeRegistry> {
        Arc::new(agentnodes::standard_registry(self.nodes.clone()))
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            inputs,
            inputs_file,
            custom_nodes,
            sandbox,
            json,
        } => {
            let mut runtime = config.runtime.clone();
            if let Some(mode) = sandbox {
                runtime.sandbox_mode = mode;
            }
            let inputs = collect_inputs(&inputs, inputs_file.as_deref())?;
            run_workflow(&config, runtime, &file, inputs, custom_nodes.as_deref(), json).await?;
        }

        Commands::Validate { file, custom_nodes } => {
            validate_workflow(&config, &file, custom_nodes.as_deref()).await?;
        }

        Commands::Nodes => list_nodes(&config),

        Commands::Init { output } => create_example_workflow(&output)?,
    }

    Ok(())
}

/// `--inputs-file` first, then each `--input name=value` on top.
fn collect_inputs(pairs: &[String], file: Option<&Path>) -> Result<HashMap<String, Value>> {
    let mut inputs = HashMap::new();

    if let Some(file) = file {
        let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => inputs.extend(map),
            _ => bail!("{} must contain a JSON object", file.display()),
        }
    }

    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("input '{}' is not NAME=VALUE", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(name.trim().to_string(), value);
    }
    Ok(inputs)
}

async fn build_runner(
    config: &CliConfig,
    runtime: RuntimeConfig,
    custom_nodes: Option<&Path>,
) -> Result<WorkflowRunner> {
    let runner = WorkflowRunner::with_config(config.registry(), runtime);
    if let Some(dir) = custom_nodes {
        let descriptors = load_custom_nodes(dir)?;
        let count = descriptors.len();
        for descriptor in descriptors {
            let node_type = descriptor.node_type.clone();
            runner
                .register_custom_node(descriptor)
                .await
                .with_context(|| format!("registering custom node '{}'", node_type))?;
        }
        tracing::info!("Registered {} custom node type(s) from {}", count, dir.display());
    }
    Ok(runner)
}

async fn run_workflow(
    config: &CliConfig,
    runtime: RuntimeConfig,
    file: &Path,
    inputs: HashMap<String, Value>,
    custom_nodes: Option<&Path>,
    json: bool,
) -> Result<()> {
    let document = load_document(file)?;
    let runner = build_runner(config, runtime, custom_nodes).await?;

    let mut events = runner.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { workflow_name, node_count, .. } => {
                    eprintln!("▶ Running '{}' ({} nodes)", workflow_name, node_count);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    eprintln!("  ⚡ {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    eprintln!("  ✅ {} in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    eprintln!("  ❌ {}: {}", node_id, error);
                }
                ExecutionEvent::RunCompleted { success, duration_ms, .. } => {
                    if success {
                        eprintln!("✨ Completed in {}ms", duration_ms);
                    } else {
                        eprintln!("💥 Failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let outcome = runner.execute_document(&document, inputs).await;
    // let the listener drain the final events
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    event_task.abort();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            for entry in runner.diagnostics().entries() {
                if entry.level >= LogLevel::Warn {
                    eprintln!("  [{:?}] {}", entry.level, entry.message);
                }
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Execution {}", result.execution_id);
    println!("  Completed: {}/{} nodes in {}ms", result.completed_nodes, result.total_nodes, result.duration_ms);
    let mut names: Vec<&String> = result.outputs.keys().collect();
    names.sort();
    for name in names {
        println!("  {}: {}", name, result.outputs[name]);
    }
    Ok(())
}

async fn validate_workflow(config: &CliConfig, file: &Path, custom_nodes: Option<&Path>) -> Result<()> {
    let document = load_document(file)?;
    let graph = WorkflowGraph::from_document(document)?;
    let runner = build_runner(config, config.runtime.clone(), custom_nodes).await?;

    let report = runner.validate(&graph).await;
    for warning in &report.warnings {
        println!("⚠ {}", warning);
    }
    for error in &report.errors {
        println!("✗ {}", error);
    }
    if !report.valid {
        bail!("{} validation error(s) in {}", report.errors.len(), file.display());
    }

    println!(
        "✓ '{}' is valid: {} nodes, {} connections",
        graph.name,
        graph.nodes.len(),
        graph.connections.len()
    );
    Ok(())
}

fn list_nodes(config: &CliConfig) {
    let registry = config.registry();
    for node_type in registry.list_node_types() {
        match registry.get_metadata(&node_type) {
            Some(metadata) => {
                println!("{} ({})", node_type, metadata.category);
                println!("    {}", metadata.description);
                for port in &metadata.inputs {
                    let marker = if port.required { "*" } else { "" };
                    println!("    in  {}{}: {}", port.name, marker, port.description);
                }
                for port in &metadata.outputs {
                    println!("    out {}: {}", port.name, port.description);
                }
            }
            None => println!("{}", node_type),
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = WorkflowGraph::new("Example greeting");
    workflow.add_node(NodeSpec::new("name", "input").with_name("name").with_data("value", "world"));
    workflow.add_node(NodeSpec::new("greeting", "input").with_name("greeting").with_data("value", "Hello,"));
    workflow.add_node(
        NodeSpec::new("join", "combine-text")
            .with_name("Join")
            .with_data("mode", "space")
            .with_input(agentcore::PortSpec::new("text1", "Text 1", "string"))
            .with_input(agentcore::PortSpec::new("text2", "Text 2", "string")),
    );
    workflow.add_node(NodeSpec::new("out", "output").with_name("message"));
    workflow.connect("greeting", "output", "join", "text1");
    workflow.connect("name", "output", "join", "text2");
    workflow.connect("join", "output", "out", "input");

    let json = serde_json::to_string_pretty(&workflow.to_wrapped()?)?;
    std::fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;

    println!("Created {}", output.display());
    println!("Run it with:");
    println!("  agentflow run {} --input name=agentflow", output.display());
    Ok(())
}
