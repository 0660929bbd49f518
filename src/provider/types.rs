//! Core types and traits for prompt execution

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure classes reported by providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    Timeout,
    /// The request was rejected (bad model, auth, unknown provider, ...)
    Invalid,
    Unknown,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Invalid => "invalid request",
            ProviderErrorKind::Unknown => "provider error",
        };
        f.write_str(label)
    }
}

/// Error from a provider call; `message` is the provider's own diagnostic
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Invalid, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }
}

/// One rendered prompt ready to send
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub text: String,

    /// Provider name; the registry default applies when unset
    pub provider: Option<String>,

    pub model: Option<String>,

    /// Free-form parameters forwarded to the provider
    pub parameters: Map<String, Value>,
}

impl PromptRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptResponse {
    pub raw_text: String,
    pub turnaround_ms: u64,
}

/// Something that can answer a prompt
#[async_trait]
pub trait PromptExecutor: Send + Sync {
    async fn execute(&self, request: &PromptRequest) -> Result<PromptResponse, ProviderError>;

    fn name(&self) -> &str;

    /// Check whether the provider can be reached
    async fn is_available(&self) -> bool {
        true
    }
}

#[async_trait]
impl PromptExecutor for Arc<dyn PromptExecutor> {
    async fn execute(&self, request: &PromptRequest) -> Result<PromptResponse, ProviderError> {
        (**self).execute(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }
}
