//! Subprocess provider: the rendered prompt is passed as the final argument

use super::types::{PromptExecutor, PromptRequest, PromptResponse, ProviderError};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CliProvider {
    name: String,

    command: String,

    /// Arguments placed before the prompt
    args: Vec<String>,

    timeout: Duration,

    env: Vec<(String, String)>,
}

impl CliProvider {
    pub fn from_config(name: impl Into<String>, config: &ProviderConfig) -> Self {
        let mut env: Vec<_> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        Self {
            name: name.into(),
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout),
            env,
        }
    }

    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
            env: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_command(&self, request: &PromptRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.arg(&request.text);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        // Dropping the wait future on timeout must not leave the child running
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PromptExecutor for CliProvider {
    async fn execute(&self, request: &PromptRequest) -> Result<PromptResponse, ProviderError> {
        let start = Instant::now();

        tracing::debug!(
            provider = %self.name,
            command = %self.command,
            chars = request.text.len(),
            "spawning provider"
        );

        let child = self
            .build_command(request)
            .spawn()
            .map_err(|e| ProviderError::invalid(format!("failed to spawn '{}': {}", self.command, e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProviderError::unknown(format!(
                    "failed to wait for '{}': {}",
                    self.command, e
                )));
            }
            Err(_) => {
                return Err(ProviderError::timeout(format!(
                    "'{}' did not finish within {}s",
                    self.command,
                    self.timeout.as_secs_f64()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(ProviderError::unknown(format!(
                "exit code {}: {}",
                code,
                stderr.trim_end()
            )));
        }

        Ok(PromptResponse {
            raw_text: String::from_utf8_lossy(&output.stdout).into_owned(),
            turnaround_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        Command::new("which")
            .arg(&self.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}
