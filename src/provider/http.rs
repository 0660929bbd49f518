//! OpenAI-compatible chat completion provider

use super::types::{PromptExecutor, PromptRequest, PromptResponse, ProviderError, ProviderErrorKind};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: String,

    /// Base URL for the API
    base_url: String,

    api_key: Option<String>,

    /// Model used when the prompt does not name one
    model: Option<String>,

    timeout: Duration,

    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl HttpProvider {
    pub fn from_config(name: impl Into<String>, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.timeout);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::invalid(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_url: config.command.clone(),
            api_key: config.resolved_api_key(),
            model: config.model.clone(),
            timeout,
            client,
        })
    }

    fn chat_completion_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Request body: model and message, then the prompt's free-form parameters
    fn request_body(&self, request: &PromptRequest) -> Result<Value, ProviderError> {
        let model = request
            .model
            .as_ref()
            .or(self.model.as_ref())
            .ok_or_else(|| ProviderError::invalid(format!("no model configured for '{}'", self.name)))?;

        let mut body = Map::new();
        body.insert("model".into(), json!(model));
        body.insert(
            "messages".into(),
            json!([{ "role": "user", "content": request.text }]),
        );
        for (key, value) in &request.parameters {
            body.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(Value::Object(body))
    }

    /// Map HTTP status to a provider error, keeping the body as-is
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
        let message = format!("HTTP {}: {}", status.as_u16(), body);
        let kind = match status.as_u16() {
            429 => ProviderErrorKind::RateLimited,
            408 | 504 => ProviderErrorKind::Timeout,
            400..=499 => ProviderErrorKind::Invalid,
            _ => ProviderErrorKind::Unknown,
        };
        ProviderError::new(kind, message)
    }
}

#[async_trait]
impl PromptExecutor for HttpProvider {
    async fn execute(&self, request: &PromptRequest) -> Result<PromptResponse, ProviderError> {
        let start = Instant::now();
        let body = self.request_body(request)?;

        let mut http_request = self.client.post(self.chat_completion_url()).json(&body);
        if let Some(ref key) = self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        tracing::debug!(provider = %self.name, chars = request.text.len(), "sending chat completion");

        let response = match tokio::time::timeout(self.timeout, http_request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(ProviderError::timeout(e.to_string())),
            Ok(Err(e)) => return Err(ProviderError::unknown(format!("request failed: {}", e))),
            Err(_) => {
                return Err(ProviderError::timeout(format!(
                    "no response after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::unknown(format!("malformed completion: {}", e)))?;

        let raw_text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(PromptResponse {
            raw_text,
            turnaround_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        match tokio::time::timeout(Duration::from_secs(5), request.send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: Option<&str>) -> HttpProvider {
        let config = ProviderConfig {
            command: "https://api.example.com/v1/".into(),
            model: model.map(String::from),
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        HttpProvider::from_config("openai", &config).unwrap()
    }

    #[test]
    fn test_from_config() {
        let p = provider(Some("gpt-4o-mini"));
        assert_eq!(p.name(), "openai");
        assert_eq!(p.api_key.as_deref(), Some("sk-test"));
        assert_eq!(p.timeout, Duration::from_secs(120));
        assert_eq!(
            p.chat_completion_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_merges_parameters() {
        let p = provider(Some("gpt-4o-mini"));
        let mut request = PromptRequest::new("hi");
        request.parameters.insert("temperature".into(), json!(0.2));
        request.parameters.insert("model".into(), json!("ignored"));

        let body = p.request_body(&request).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_prompt_model_overrides_default() {
        let p = provider(Some("gpt-4o-mini"));
        let body = p
            .request_body(&PromptRequest::new("hi").with_model("gpt-4o"))
            .unwrap();
        assert_eq!(body["model"], "gpt-4o");
    }

    #[test]
    fn test_missing_model() {
        let err = provider(None).request_body(&PromptRequest::new("hi")).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Invalid);
    }

    #[test]
    fn test_map_http_error() {
        let err = HttpProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err.kind, ProviderErrorKind::RateLimited);
        assert_eq!(err.message, "HTTP 429: slow down");

        let err = HttpProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(err.kind, ProviderErrorKind::Invalid);

        let err = HttpProvider::map_http_error(reqwest::StatusCode::GATEWAY_TIMEOUT, "");
        assert_eq!(err.kind, ProviderErrorKind::Timeout);

        let err = HttpProvider::map_http_error(reqwest::StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.kind, ProviderErrorKind::Unknown);
    }
}
