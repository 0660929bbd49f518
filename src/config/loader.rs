//! Configuration loading with multi-layer merge

use super::ProviderConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,

    /// Provider definitions
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Global default settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Worker count when a run does not ask for one
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Step budget per item when a workflow does not set one
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Provider used by prompts that do not name one
    pub provider: Option<String>,

    /// Upper bound on `--repeat`
    #[serde(default = "default_repeat_cap")]
    pub repeat_cap: usize,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_steps() -> usize {
    10_000
}

fn default_repeat_cap() -> usize {
    1_000
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_steps: default_max_steps(),
            provider: None,
            repeat_cap: default_repeat_cap(),
        }
    }
}

impl BatchConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/prompt-batch/config.toml
    /// 3. .prompt-batch/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(".prompt-batch/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".prompt-batch/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/prompt-batch/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("prompt-batch/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.defaults.concurrency != default_concurrency() {
            self.defaults.concurrency = other.defaults.concurrency;
        }
        if other.defaults.max_steps != default_max_steps() {
            self.defaults.max_steps = other.defaults.max_steps;
        }
        if other.defaults.repeat_cap != default_repeat_cap() {
            self.defaults.repeat_cap = other.defaults.repeat_cap;
        }
        if other.defaults.provider.is_some() {
            self.defaults.provider = other.defaults.provider;
        }

        for (name, provider) in other.providers {
            self.providers.insert(name, provider);
        }
    }

    /// Get all enabled providers
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.enabled)
    }
}
