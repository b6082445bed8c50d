use serde::{Deserialize, Serialize};

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Endpoints and credentials shared by the built-in nodes.
///
/// Node `data` always takes precedence over these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDefaults {
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub http_timeout_ms: u64,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            llm_api_key: None,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            http_timeout_ms: 30_000,
        }
    }
}

impl NodeDefaults {
    /// Defaults overlaid with `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `AGENTFLOW_LLM_MODEL`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            self.llm_api_key = Some(key);
        }
        if let Some(url) = non_empty_env("OPENAI_BASE_URL") {
            self.llm_base_url = url;
        }
        if let Some(model) = non_empty_env("AGENTFLOW_LLM_MODEL") {
            self.llm_model = model;
        }
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
