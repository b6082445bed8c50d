use crate::config::NodeDefaults;
use crate::payload::decode_payload;
use agentcore::value::value_to_text;
use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Map};
use std::future::Future;
use std::time::{Duration, Instant};

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Drive `attempt` until it succeeds, fails with a non-retryable error, or the policy is
/// exhausted. Returns the value with the number of retries spent.
///
/// The closure receives the zero-based attempt number. Only errors for which
/// [`NodeError::is_retryable`] holds are retried; the surfaced error carries the retry count.
pub async fn send_with_retry<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<(T, u32), NodeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let mut retries = 0;
    loop {
        match attempt(retries).await {
            Ok(value) => return Ok((value, retries)),
            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                let delay = policy.delay_for(retries);
                tracing::debug!("Attempt {} failed ({}), retrying in {:?}", retries + 1, e, delay);
                tokio::time::sleep(delay).await;
                retries += 1;
            }
            Err(e) => return Err(e.with_retry_count(retries)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Auth {
    None,
    ApiKey { name: String, key: String, in_query: bool },
    Bearer(String),
    Basic { username: String, password: String },
    Custom { name: String, value: String },
}

impl Auth {
    fn parse(value: Option<&Value>) -> Result<Self, NodeError> {
        let Some(Value::Object(auth)) = value else {
            return Ok(Auth::None);
        };
        let text = |key: &str| auth.get(key).map(value_to_text).unwrap_or_default();

        match auth.get("type").and_then(Value::as_str).unwrap_or("none") {
            "none" | "" => Ok(Auth::None),
            "apiKey" | "api_key" | "api-key" => {
                let in_query = auth.get("location").and_then(Value::as_str) == Some("query");
                let name = if in_query {
                    auth.get("paramName").and_then(Value::as_str).unwrap_or("api_key")
                } else {
                    auth.get("headerName").and_then(Value::as_str).unwrap_or("X-API-Key")
                };
                Ok(Auth::ApiKey {
                    name: name.to_string(),
                    key: text("key"),
                    in_query,
                })
            }
            "bearer" => Ok(Auth::Bearer(text("token"))),
            "basic" => Ok(Auth::Basic {
                username: text("username"),
                password: text("password"),
            }),
            "custom" => Ok(Auth::Custom {
                name: text("headerName"),
                value: text("headerValue"),
            }),
            other => Err(NodeError::Configuration(format!("Unsupported auth type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    None,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(Map<String, Value>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
enum ResponseType {
    Auto,
    Json,
    Text,
    Binary,
}

/// Everything needed to issue one attempt. Rebuilt into a fresh `reqwest` request each time,
/// since a multipart body cannot be replayed.
#[derive(Debug, Clone)]
struct PreparedRequest {
    url: String,
    method: reqwest::Method,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Body,
    auth: Auth,
    timeout: Duration,
    response_type: ResponseType,
}

impl PreparedRequest {
    fn from_context(ctx: &NodeContext, defaults: &NodeDefaults) -> Result<Self, NodeError> {
        let setting = |name: &str| ctx.find_input(&[name]).or_else(|| ctx.config.get(name));

        let url = setting("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| NodeError::Configuration("api-request requires a url".into()))?
            .to_string();

        let method_name = setting("method").and_then(Value::as_str).unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method_name.trim().to_uppercase().as_bytes())
            .map_err(|_| NodeError::Configuration(format!("Unsupported method: {}", method_name)))?;

        let headers = pairs(setting("headers"));
        let query = pairs(ctx.find_input(&["params", "queryParams"]).or_else(|| ctx.config.get("queryParams")));

        let body_value = setting("body").filter(|b| !b.is_null()).cloned();
        let body = match (ctx.config_str("bodyType").unwrap_or("json"), body_value) {
            (_, None) | ("none", _) => Body::None,
            ("form", Some(value)) => Body::Form(pairs(Some(&value))),
            ("multipart", Some(Value::Object(map))) => Body::Multipart(map),
            ("multipart", Some(other)) => {
                return Err(NodeError::InvalidInputType {
                    field: "body".into(),
                    expected: "object".into(),
                    actual: agentcore::value::kind_label(&other).into(),
                })
            }
            ("raw", Some(value)) => Body::Raw(value_to_text(&value)),
            (_, Some(Value::String(text))) => match serde_json::from_str(&text) {
                Ok(parsed) => Body::Json(parsed),
                Err(_) => Body::Raw(text),
            },
            (_, Some(value)) => Body::Json(value),
        };

        let response_type = match ctx.config_str("responseType").unwrap_or("auto") {
            "json" => ResponseType::Json,
            "text" => ResponseType::Text,
            "binary" | "blob" => ResponseType::Binary,
            _ => ResponseType::Auto,
        };

        Ok(Self {
            url,
            method,
            headers,
            query,
            body,
            auth: Auth::parse(setting("auth"))?,
            timeout: Duration::from_millis(ctx.config_u64("timeout").unwrap_or(defaults.http_timeout_ms)),
            response_type,
        })
    }

    fn build(&self, client: &reqwest::Client) -> Result<reqwest::RequestBuilder, NodeError> {
        let mut request = client
            .request(self.method.clone(), &self.url)
            .timeout(self.timeout);

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }

        request = match &self.auth {
            Auth::None => request,
            Auth::ApiKey { name, key, in_query: true } => request.query(&[(name, key)]),
            Auth::ApiKey { name, key, .. } => request.header(name.as_str(), key.as_str()),
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                request.header(reqwest::header::AUTHORIZATION, format!("Basic {}", encoded))
            }
            Auth::Custom { name, value } if !name.is_empty() => request.header(name.as_str(), value.as_str()),
            Auth::Custom { .. } => request,
        };

        Ok(match &self.body {
            Body::None => request,
            Body::Json(value) => request.json(value),
            Body::Form(fields) => request.form(fields),
            Body::Raw(text) => request.body(text.clone()),
            Body::Multipart(fields) => request.multipart(multipart_form(fields)?),
        })
    }

    async fn send(&self, client: &reqwest::Client) -> Result<HttpResponse, NodeError> {
        let response = self.build(client)?.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or_default().to_string())))
            .collect();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(NodeError::Http {
                status: status.as_u16(),
                message: format!(
                    "{} {}",
                    status.canonical_reason().unwrap_or("Error"),
                    body.chars().take(200).collect::<String>()
                )
                .trim()
                .to_string(),
                retry_count: 0,
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            data: parse_body(&bytes, &content_type, &self.response_type),
            headers,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> NodeError {
        if e.is_timeout() {
            NodeError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
                retry_count: 0,
            }
        } else {
            NodeError::Network {
                message: e.to_string(),
                retry_count: 0,
            }
        }
    }
}

struct HttpResponse {
    status: u16,
    status_text: String,
    headers: Map<String, Value>,
    data: Value,
}

/// Headers and query parameters: an object, or an array of `{key, value}` rows.
fn pairs(value: Option<&Value>) -> Vec<(String, String)> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), value_to_text(v)))
            .collect(),
        Some(Value::Array(rows)) => rows
            .iter()
            .filter_map(|row| {
                let key = row.get("key").and_then(Value::as_str)?;
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), row.get("value").map(value_to_text).unwrap_or_default()))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn multipart_form(fields: &Map<String, Value>) -> Result<reqwest::multipart::Form, NodeError> {
    let mut form = reqwest::multipart::Form::new();
    for (name, value) in fields {
        form = match value {
            Value::Object(file) if file.contains_key("filename") => {
                let payload = decode_payload(value)?;
                let mut part = reqwest::multipart::Part::bytes(payload.bytes)
                    .file_name(payload.filename.unwrap_or_else(|| name.clone()));
                if let Some(mime) = payload.mime_type {
                    part = part
                        .mime_str(&mime)
                        .map_err(|e| NodeError::Configuration(format!("Invalid MIME type '{}': {}", mime, e)))?;
                }
                form.part(name.clone(), part)
            }
            other => form.text(name.clone(), value_to_text(other)),
        };
    }
    Ok(form)
}

fn parse_body(bytes: &[u8], content_type: &str, response_type: &ResponseType) -> Value {
    let text = || String::from_utf8_lossy(bytes).into_owned();
    let json_or_text = || serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(text()));
    let binary = || Value::String(base64::engine::general_purpose::STANDARD.encode(bytes));

    match response_type {
        ResponseType::Json => json_or_text(),
        ResponseType::Text => Value::String(text()),
        ResponseType::Binary => binary(),
        ResponseType::Auto => {
            if content_type.contains("json") {
                json_or_text()
            } else if content_type.is_empty()
                || content_type.starts_with("text/")
                || content_type.contains("xml")
                || content_type.contains("javascript")
                || content_type.contains("x-www-form-urlencoded")
            {
                Value::String(text())
            } else {
                binary()
            }
        }
    }
}

/// Upper bound on configured retries; larger values are clamped.
pub const MAX_RETRIES: u32 = 10;

fn retry_policy(ctx: &NodeContext) -> RetryPolicy {
    let defaults = RetryPolicy::default();
    let max_retries = match ctx.config_u64("retries") {
        Some(requested) => {
            let clamped = u32::try_from(requested).unwrap_or(u32::MAX).min(MAX_RETRIES);
            if u64::from(clamped) != requested {
                ctx.log.warn(format!("retries={} exceeds the limit; using {}", requested, clamped));
            }
            clamped
        }
        None => defaults.max_retries,
    };
    RetryPolicy {
        max_retries,
        base_delay: ctx
            .config_u64("retryDelay")
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay),
        ..defaults
    }
}

/// HTTP client node with auth, body encodings and retry on transient failures.
pub struct ApiRequestNode {
    client: reqwest::Client,
    defaults: NodeDefaults,
}

impl ApiRequestNode {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self {
            client: reqwest::Client::new(),
            defaults,
        }
    }
}

#[async_trait]
impl Node for ApiRequestNode {
    fn node_type(&self) -> &str {
        "api-request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let request = PreparedRequest::from_context(&ctx, &self.defaults)?;
        let policy = retry_policy(&ctx);

        ctx.log.info(format!("{} {}", request.method, request.url));
        let started = Instant::now();

        let (response, retries) = send_with_retry(&policy, |attempt| {
            if attempt > 0 {
                ctx.log.warn(format!("Retrying {} (attempt {})", request.url, attempt + 1));
            }
            request.send(&self.client)
        })
        .await
        .map_err(|e| {
            ctx.log.error(format!("Request to {} failed: {}", request.url, e));
            e
        })?;

        let elapsed = started.elapsed().as_millis() as u64;
        ctx.log.info(format!("Response {} in {}ms", response.status, elapsed));

        Ok(NodeOutput::value(json!({
            "data": response.data,
            "status": response.status,
            "statusText": response.status_text,
            "headers": response.headers,
            "success": true,
            "metadata": {
                "requestTime": elapsed,
                "retryCount": retries,
                "url": request.url,
                "method": request.method.as_str(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        })))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), NodeError> {
        Auth::parse(config.get("auth")).map(|_| ())
    }
}

pub struct ApiRequestNodeFactory {
    defaults: NodeDefaults,
}

impl ApiRequestNodeFactory {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self { defaults }
    }
}

impl NodeFactory for ApiRequestNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ApiRequestNode::new(self.defaults.clone())))
    }

    fn node_type(&self) -> &str {
        "api-request"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "HTTP request with auth, body encodings and retry on 5xx/network errors".to_string(),
            category: "http".to_string(),
            inputs: vec![
                PortDefinition::new("url", "Overrides the configured URL"),
                PortDefinition::new("body", "Request body"),
                PortDefinition::new("headers", "Extra headers"),
                PortDefinition::new("params", "Query parameters"),
                PortDefinition::new("auth", "Authentication settings"),
            ],
            outputs: vec![
                PortDefinition::new("data", "Parsed response body"),
                PortDefinition::new("status", "HTTP status"),
                PortDefinition::new("headers", "Response headers"),
                PortDefinition::new("success", "True for a 2xx response"),
                PortDefinition::new("metadata", "Timing and retry details"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(500));
    }

    #[test]
    fn configured_retries_are_clamped() {
        let ctx = NodeContext::detached("api").with_config("retries", json!(u64::MAX));
        assert_eq!(retry_policy(&ctx).max_retries, MAX_RETRIES);

        let ctx = NodeContext::detached("api").with_config("retries", json!(4_294_967_297u64));
        assert_eq!(retry_policy(&ctx).max_retries, MAX_RETRIES);

        let ctx = NodeContext::detached("api")
            .with_config("retries", json!(2))
            .with_config("retryDelay", json!(5));
        let policy = retry_policy(&ctx);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(5));

        assert_eq!(retry_policy(&NodeContext::detached("api")), RetryPolicy::default());
    }

    #[test]
    fn pairs_accept_rows_and_objects() {
        let rows = json!([{"key": "a", "value": "1"}, {"key": "", "value": "x"}, {"key": "b", "value": 2}]);
        assert_eq!(
            pairs(Some(&rows)),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
        assert_eq!(pairs(Some(&json!({"q": "rust"}))), vec![("q".to_string(), "rust".to_string())]);
    }

    #[test]
    fn auth_modes_parse() {
        let header = Auth::parse(Some(&json!({"type": "apiKey", "key": "k"}))).unwrap();
        assert_eq!(
            header,
            Auth::ApiKey {
                name: "X-API-Key".into(),
                key: "k".into(),
                in_query: false
            }
        );
        let query = Auth::parse(Some(&json!({"type": "apiKey", "key": "k", "location": "query", "paramName": "token"}))).unwrap();
        assert!(matches!(query, Auth::ApiKey { in_query: true, ref name, .. } if name == "token"));
        assert!(Auth::parse(Some(&json!({"type": "oauth"}))).is_err());
        assert_eq!(Auth::parse(None).unwrap(), Auth::None);
    }

    #[test]
    fn auto_response_parsing_follows_content_type() {
        assert_eq!(parse_body(br#"{"a":1}"#, "application/json", &ResponseType::Auto), json!({"a": 1}));
        assert_eq!(parse_body(b"hello", "text/plain", &ResponseType::Auto), json!("hello"));
        assert_eq!(parse_body(&[0, 1], "application/octet-stream", &ResponseType::Auto), json!("AAE="));
        assert_eq!(parse_body(b"not json", "application/json", &ResponseType::Auto), json!("not json"));
    }
}
