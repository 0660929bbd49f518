//! Provider configuration for prompt execution

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for a single prompt provider
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Command to execute, or base URL for OpenAI-compatible APIs
    pub command: String,

    /// Arguments placed before the prompt (CLI providers)
    #[serde(default)]
    pub args: Vec<String>,

    /// Whether this provider may be used
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Timeout in seconds for one request
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Model used when a prompt does not name one
    pub model: Option<String>,

    /// API key (HTTP providers)
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Additional environment variables for the command
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            enabled: true,
            timeout: default_timeout(),
            model: None,
            api_key: None,
            api_key_env: None,
            env: HashMap::new(),
        }
    }
}

impl ProviderConfig {
    /// Returns true if this is an HTTP API provider (URL starts with http)
    pub fn is_http(&self) -> bool {
        self.command.starts_with("http://") || self.command.starts_with("https://")
    }

    /// Resolve the API key, preferring the literal value over the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
        })
    }
}
