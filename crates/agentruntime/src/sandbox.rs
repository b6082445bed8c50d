//! Embedded JavaScript interpreter for custom node bodies and `if-else` conditions.
//!
//! Scripts run in a fresh boa context on the blocking pool. In sandboxed mode every global
//! outside a fixed allowlist is removed before user code runs, so scripts only see data
//! utilities, math, dates and the injected logging context.

use agentcore::{LogLevel, NodeError, Value};
use boa_engine::{Context, JsValue, Source};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

const ALLOWED_GLOBALS: &[&str] = &[
    "JSON",
    "Math",
    "Date",
    "Promise",
    "Number",
    "String",
    "Boolean",
    "Array",
    "Object",
    "Error",
    "TypeError",
    "RangeError",
    "RegExp",
    "Map",
    "Set",
    "Symbol",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURIComponent",
    "decodeURIComponent",
    "encodeURI",
    "decodeURI",
    "undefined",
    "NaN",
    "Infinity",
    "__logs",
    "__fmt",
    "__context",
    "__state",
    "console",
];

const CONDITION_FORBIDDEN: &[&str] = &[
    "function",
    "while",
    "for",
    "new",
    "import",
    "eval",
    "this",
    "globalThis",
    "constructor",
    "prototype",
];

/// How custom code is isolated from the interpreter's globals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    #[default]
    Sandboxed,
    Direct,
}

impl std::str::FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandboxed" | "sandbox" => Ok(SandboxMode::Sandboxed),
            "direct" => Ok(SandboxMode::Direct),
            other => Err(format!("unknown sandbox mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    pub timeout: Duration,
    pub max_loop_iterations: u64,
    pub recursion_limit: usize,
    pub max_code_length: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Sandboxed,
            timeout: Duration::from_millis(5000),
            max_loop_iterations: 1_000_000,
            recursion_limit: 512,
            max_code_length: 1024 * 1024,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("code is empty")]
    EmptyCode,

    #[error("code too large: {actual} bytes (max {max})")]
    CodeTooLarge { max: usize, actual: usize },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("{0}")]
    Execution(String),

    #[error("script exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("script did not settle its result")]
    Unsettled,

    #[error("rejected expression: {0}")]
    RejectedExpression(String),

    #[error("invalid script result: {0}")]
    InvalidOutput(String),

    #[error("sandbox failure: {0}")]
    Internal(String),
}

impl From<SandboxError> for NodeError {
    fn from(err: SandboxError) -> Self {
        NodeError::CustomCode(err.to_string())
    }
}

/// Line logged by a script through `context.log/warn/error` or `console`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLog {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub output: Value,
    pub logs: Vec<ScriptLog>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Size and syntax checks done once, when a descriptor is registered.
    ///
    /// The body is compiled as a function expression and never invoked.
    pub fn check_code(&self, code: &str) -> Result<(), SandboxError> {
        if code.trim().is_empty() {
            return Err(SandboxError::EmptyCode);
        }
        if code.len() > self.config.max_code_length {
            return Err(SandboxError::CodeTooLarge {
                max: self.config.max_code_length,
                actual: code.len(),
            });
        }

        let mut context = Context::default();
        context
            .eval(Source::from_bytes(&format!("(function() {{\n{}\n}});", code)))
            .map(|_| ())
            .map_err(|e| SandboxError::Syntax(e.to_string()))
    }

    /// Run a custom node body. The code must define
    /// `function execute(inputs, properties, context)`, which may return a promise.
    pub async fn run_custom(
        &self,
        code: &str,
        inputs: &Value,
        properties: &Value,
    ) -> Result<ScriptOutcome, SandboxError> {
        if code.len() > self.config.max_code_length {
            return Err(SandboxError::CodeTooLarge {
                max: self.config.max_code_length,
                actual: code.len(),
            });
        }

        let scripts = custom_scripts(code, inputs, properties, self.config.mode)?;
        let raw = self.run_blocking(scripts, SETTLED_STATE).await?;
        parse_outcome(&raw)
    }

    /// Evaluate a boolean expression against `input` (also visible as `value`).
    /// Always sandboxed, regardless of the configured mode.
    pub async fn eval_condition(&self, expression: &str, input: &Value) -> Result<bool, SandboxError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(SandboxError::RejectedExpression("empty expression".into()));
        }
        if expression.contains(';') || expression.contains('{') || expression.contains("=>") {
            return Err(SandboxError::RejectedExpression(expression.to_string()));
        }
        if let Some(word) = expression
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .find(|word| CONDITION_FORBIDDEN.contains(word))
        {
            return Err(SandboxError::RejectedExpression(format!(
                "'{}' is not allowed in conditions",
                word
            )));
        }

        let input_json =
            serde_json::to_string(input).map_err(|e| SandboxError::Internal(e.to_string()))?;
        let script = format!(
            "(function(input) {{ var value = input; return !!({expr}); }})({input});",
            expr = expression,
            input = input_json,
        );

        let raw = self.run_blocking(vec![isolation_prelude(), script], "").await?;
        match raw {
            Evaluated::Bool(b) => Ok(b),
            Evaluated::Text(text) => Err(SandboxError::InvalidOutput(text)),
        }
    }

    async fn run_blocking(
        &self,
        scripts: Vec<String>,
        settle: &'static str,
    ) -> Result<Evaluated, SandboxError> {
        let loop_limit = self.config.max_loop_iterations;
        let recursion_limit = self.config.recursion_limit;
        let timeout = self.config.timeout;

        // The interpreter cannot be interrupted; the loop limit bounds the blocking thread
        // once the timeout has given up waiting on it.
        let task = tokio::task::spawn_blocking(move || {
            evaluate(&scripts, settle, loop_limit, recursion_limit, timeout)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(|e| SandboxError::Internal(e.to_string()))?,
            Err(_) => Err(SandboxError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

enum Evaluated {
    Bool(bool),
    Text(String),
}

const SETTLED_STATE: &str = "JSON.stringify({ done: __state.done, output: __state.output, \
     error: __state.error, logs: __logs });";

/// Scripts are evaluated one after another in the same context, so declarations in a
/// later script are not hoisted above an earlier one.
fn evaluate(
    scripts: &[String],
    settle: &str,
    loop_limit: u64,
    recursion_limit: usize,
    timeout: Duration,
) -> Result<Evaluated, SandboxError> {
    let started = Instant::now();
    let mut context = Context::default();
    context.runtime_limits_mut().set_loop_iteration_limit(loop_limit);
    context.runtime_limits_mut().set_recursion_limit(recursion_limit);

    let mut value = JsValue::undefined();
    for script in scripts {
        value = context
            .eval(Source::from_bytes(script))
            .map_err(|e| SandboxError::Execution(e.to_string()))?;
    }

    let value = if settle.is_empty() {
        value
    } else {
        context.run_jobs();
        context
            .eval(Source::from_bytes(settle))
            .map_err(|e| SandboxError::Execution(e.to_string()))?
    };

    if started.elapsed() > timeout {
        return Err(SandboxError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        });
    }

    if let Some(b) = value.as_boolean() {
        return Ok(Evaluated::Bool(b));
    }
    value
        .as_string()
        .map(|s| Evaluated::Text(s.to_std_string_escaped()))
        .ok_or_else(|| SandboxError::InvalidOutput("script produced no result".into()))
}

fn isolation_prelude() -> String {
    let allowed = ALLOWED_GLOBALS
        .iter()
        .map(|name| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"(function() {{
    var allowed = [{allowed}];
    var g = globalThis;
    var blocked = function() {{ throw new TypeError("Function constructor is not available"); }};
    function lock(proto) {{
        try {{
            Object.defineProperty(proto, "constructor", {{ value: blocked, writable: false, configurable: false }});
        }} catch (e) {{ }}
    }}
    [function() {{}}, async function() {{}}, function*() {{}}].forEach(function(f) {{
        lock(Object.getPrototypeOf(f));
    }});
    try {{ lock(Object.getPrototypeOf(Function("return async function*() {{}}")())); }} catch (e) {{ }}
    Object.getOwnPropertyNames(g).forEach(function(key) {{
        if (allowed.indexOf(key) >= 0) {{ return; }}
        try {{ if (!delete g[key]) {{ g[key] = undefined; }} }} catch (e) {{ }}
    }});
}})();"#,
        allowed = allowed
    )
}

fn custom_scripts(
    code: &str,
    inputs: &Value,
    properties: &Value,
    mode: SandboxMode,
) -> Result<Vec<String>, SandboxError> {
    let inputs = serde_json::to_string(inputs).map_err(|e| SandboxError::Internal(e.to_string()))?;
    let properties =
        serde_json::to_string(properties).map_err(|e| SandboxError::Internal(e.to_string()))?;

    let prelude = r#"var __logs = [];
var __state = { done: false, output: null, error: null };
function __fmt(args) {
    var parts = [];
    for (var i = 0; i < args.length; i++) {
        var a = args[i];
        parts.push(typeof a === 'object' ? JSON.stringify(a) : String(a));
    }
    return parts.join(' ');
}
var __context = {
    log: function() { __logs.push({ level: 'info', message: __fmt(arguments) }); },
    warn: function() { __logs.push({ level: 'warn', message: __fmt(arguments) }); },
    error: function() { __logs.push({ level: 'error', message: __fmt(arguments) }); }
};
var console = {
    log: __context.log, info: __context.log, debug: __context.log,
    warn: __context.warn, error: __context.error
};"#;

    let invoke = format!(
        r#"(function(inputs, properties) {{
    function fail(e) {{
        __state.done = true;
        __state.error = String(e && e.message !== undefined ? e.message : e);
    }}
    try {{
        if (typeof execute !== 'function') {{
            throw new Error('custom node code must define function execute(inputs, properties, context)');
        }}
        Promise.resolve(execute(inputs, properties, __context)).then(function(v) {{
            __state.done = true;
            __state.output = v === undefined ? null : v;
        }}, fail);
    }} catch (e) {{
        fail(e);
    }}
}})({inputs}, {properties});"#,
        inputs = inputs,
        properties = properties,
    );

    let mut scripts = vec![prelude.to_string()];
    if mode == SandboxMode::Sandboxed {
        scripts.push(isolation_prelude());
    }
    scripts.push(code.to_string());
    scripts.push(invoke);
    Ok(scripts)
}

fn parse_outcome(raw: &Evaluated) -> Result<ScriptOutcome, SandboxError> {
    let Evaluated::Text(text) = raw else {
        return Err(SandboxError::InvalidOutput("expected serialized state".into()));
    };
    let state: Value =
        serde_json::from_str(text).map_err(|e| SandboxError::InvalidOutput(e.to_string()))?;

    let logs = state
        .get("logs")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| ScriptLog {
                    level: match entry.get("level").and_then(Value::as_str) {
                        Some("warn") => LogLevel::Warn,
                        Some("error") => LogLevel::Error,
                        _ => LogLevel::Info,
                    },
                    message: entry
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some(error) = state.get("error").and_then(Value::as_str) {
        return Err(SandboxError::Execution(error.to_string()));
    }
    if state.get("done").and_then(Value::as_bool) != Some(true) {
        return Err(SandboxError::Unsettled);
    }

    Ok(ScriptOutcome {
        output: state.get("output").cloned().unwrap_or(Value::Null),
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox(mode: SandboxMode) -> ScriptSandbox {
        ScriptSandbox::new(SandboxConfig {
            mode,
            ..SandboxConfig::default()
        })
    }

    #[tokio::test]
    async fn runs_execute_with_inputs_and_properties() {
        let code = r#"
            function execute(inputs, properties, context) {
                context.log('doubling', inputs.n);
                return { result: inputs.n * properties.factor };
            }
        "#;
        let outcome = sandbox(SandboxMode::Sandboxed)
            .run_custom(code, &json!({"n": 21}), &json!({"factor": 2}))
            .await
            .unwrap();
        assert_eq!(outcome.output, json!({"result": 42}));
        assert_eq!(outcome.logs[0].message, "doubling 21");
    }

    #[tokio::test]
    async fn async_execute_is_awaited() {
        let code = r#"
            async function execute(inputs) {
                var v = await Promise.resolve(inputs.word);
                return v.toUpperCase();
            }
        "#;
        let outcome = sandbox(SandboxMode::Sandboxed)
            .run_custom(code, &json!({"word": "hey"}), &json!({}))
            .await
            .unwrap();
        assert_eq!(outcome.output, json!("HEY"));
    }

    #[tokio::test]
    async fn sandboxed_mode_hides_non_allowlisted_globals() {
        let code = r#"
            function execute() {
                return { eval: typeof eval, fn: typeof Function, json: typeof JSON };
            }
        "#;
        let sandboxed = sandbox(SandboxMode::Sandboxed)
            .run_custom(code, &json!({}), &json!({}))
            .await
            .unwrap();
        assert_eq!(sandboxed.output["eval"], "undefined");
        assert_eq!(sandboxed.output["fn"], "undefined");
        assert_eq!(sandboxed.output["json"], "object");

        let direct = sandbox(SandboxMode::Direct)
            .run_custom(code, &json!({}), &json!({}))
            .await
            .unwrap();
        assert_eq!(direct.output["eval"], "function");
    }

    #[tokio::test]
    async fn function_constructor_is_unreachable_through_prototypes() {
        let code = r#"
            function execute() {
                var samples = {
                    plain: function() {},
                    async: async function() {},
                    generator: function*() {},
                };
                var reached = {};
                Object.keys(samples).forEach(function(kind) {
                    try {
                        samples[kind].constructor("return 1");
                        reached[kind] = true;
                    } catch (e) {
                        reached[kind] = e instanceof TypeError ? "blocked" : String(e);
                    }
                });
                return reached;
            }
        "#;
        let outcome = sandbox(SandboxMode::Sandboxed)
            .run_custom(code, &json!({}), &json!({}))
            .await
            .unwrap();
        assert_eq!(
            outcome.output,
            json!({"plain": "blocked", "async": "blocked", "generator": "blocked"})
        );

        let direct = sandbox(SandboxMode::Direct)
            .run_custom(
                "function execute() { return (function() {}).constructor('return 7')(); }",
                &json!({}),
                &json!({}),
            )
            .await
            .unwrap();
        assert_eq!(direct.output, json!(7));
    }

    #[tokio::test]
    async fn thrown_errors_become_sandbox_errors() {
        let err = sandbox(SandboxMode::Sandboxed)
            .run_custom("function execute() { throw new Error('nope'); }", &json!({}), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, SandboxError::Execution("nope".into()));
    }

    #[tokio::test]
    async fn runaway_loops_are_stopped() {
        let sandbox = ScriptSandbox::new(SandboxConfig {
            max_loop_iterations: 10_000,
            ..SandboxConfig::default()
        });
        let result = sandbox
            .run_custom("function execute() { while (true) {} }", &json!({}), &json!({}))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn syntax_is_checked_without_running() {
        let sandbox = ScriptSandbox::default();
        assert!(sandbox.check_code("function execute() { while(true) {} }").is_ok());
        assert!(matches!(
            sandbox.check_code("function execute( {"),
            Err(SandboxError::Syntax(_))
        ));
        assert_eq!(sandbox.check_code("   "), Err(SandboxError::EmptyCode));
    }

    #[tokio::test]
    async fn conditions_evaluate_against_input() {
        let sandbox = ScriptSandbox::default();
        assert!(sandbox.eval_condition("input > 0", &json!(5)).await.unwrap());
        assert!(!sandbox.eval_condition("value > 0", &json!(-1)).await.unwrap());
        assert!(sandbox
            .eval_condition("input.name === 'Alice'", &json!({"name": "Alice"}))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn statements_are_rejected_in_conditions() {
        let sandbox = ScriptSandbox::default();
        assert!(matches!(
            sandbox.eval_condition("x = 1; true", &json!(1)).await,
            Err(SandboxError::RejectedExpression(_))
        ));
        assert!(sandbox.eval_condition("input >", &json!(1)).await.is_err());
    }
}
