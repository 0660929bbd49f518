//! Name → provider resolution

use super::cli::CliProvider;
use super::echo::{ECHO_PROVIDER, EchoProvider};
use super::http::HttpProvider;
use super::types::{PromptExecutor, PromptRequest, PromptResponse, ProviderError};
use crate::config::{BatchConfig, ProviderConfig};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Create the provider a config entry describes
pub fn create_provider(
    name: &str,
    config: &ProviderConfig,
) -> Result<Arc<dyn PromptExecutor>, ProviderError> {
    if config.is_http() {
        Ok(Arc::new(HttpProvider::from_config(name, config)?))
    } else {
        Ok(Arc::new(CliProvider::from_config(name, config)))
    }
}

/// Dispatches each request to the provider it names
///
/// The built-in `echo` provider is always registered.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn PromptExecutor>>,
    default: Option<String>,
    /// Route every request here regardless of what the prompt asks for
    forced: Option<String>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut providers: BTreeMap<String, Arc<dyn PromptExecutor>> = BTreeMap::new();
        providers.insert(ECHO_PROVIDER.into(), Arc::new(EchoProvider));
        Self {
            providers,
            default: None,
            forced: None,
        }
    }

    /// Build every enabled provider from configuration
    pub fn from_config(config: &BatchConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        for (name, provider) in config.enabled_providers() {
            registry.register(name.clone(), create_provider(name, provider)?);
        }
        registry.default = config.defaults.provider.clone();
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn PromptExecutor>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    /// Send every prompt to one provider (dry runs use `echo`)
    pub fn force(mut self, name: impl Into<String>) -> Self {
        self.forced = Some(name.into());
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PromptExecutor>> {
        self.providers.get(name)
    }

    fn resolve(&self, request: &PromptRequest) -> Result<&Arc<dyn PromptExecutor>, ProviderError> {
        let name = self
            .forced
            .as_deref()
            .or(request.provider.as_deref())
            .or(self.default.as_deref())
            .ok_or_else(|| ProviderError::invalid("prompt names no provider and no default is configured"))?;

        self.get(name)
            .ok_or_else(|| ProviderError::invalid(format!("unknown provider '{}'", name)))
    }
}

#[async_trait]
impl PromptExecutor for ProviderRegistry {
    async fn execute(&self, request: &PromptRequest) -> Result<PromptResponse, ProviderError> {
        self.resolve(request)?.execute(request).await
    }

    fn name(&self) -> &str {
        "registry"
    }
}
