//! Provider that answers with the prompt itself, for dry runs

use super::types::{PromptExecutor, PromptRequest, PromptResponse, ProviderError};
use async_trait::async_trait;

pub const ECHO_PROVIDER: &str = "echo";

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProvider;

#[async_trait]
impl PromptExecutor for EchoProvider {
    async fn execute(&self, request: &PromptRequest) -> Result<PromptResponse, ProviderError> {
        Ok(PromptResponse {
            raw_text: request.text.clone(),
            turnaround_ms: 0,
        })
    }

    fn name(&self) -> &str {
        ECHO_PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_prompt() {
        let response = EchoProvider
            .execute(&PromptRequest::new("ANSWER: 4"))
            .await
            .unwrap();
        assert_eq!(response.raw_text, "ANSWER: 4");
        assert_eq!(response.turnaround_ms, 0);
    }
}
