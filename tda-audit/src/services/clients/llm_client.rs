//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_status, http_client, RateLimiter};
use crate::config::ProviderConfig;
use crate::services::providers::{LlmPrompt, LlmProvider, Metered, ProviderError, ProviderResult};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

pub struct HttpLlmClient {
    name: String,
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    cost_per_1k_tokens: f64,
    unit_cost: f64,
    rate_limiter: RateLimiter,
}

impl HttpLlmClient {
    pub fn new(name: &str, config: &ProviderConfig) -> ProviderResult<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("base_url".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("api_key".to_string()))?;

        Ok(Self {
            name: name.to_string(),
            http: http_client(config.timeout())?,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            cost_per_1k_tokens: config.cost_per_1k_tokens,
            unit_cost: config.unit_cost,
            rate_limiter: RateLimiter::new(config.min_interval_ms),
        })
    }

    fn price(&self, usage: Option<&ChatUsage>) -> f64 {
        match usage {
            Some(usage) => usage.total_tokens as f64 / 1000.0 * self.cost_per_1k_tokens,
            None => self.unit_cost,
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit_cost(&self) -> f64 {
        self.unit_cost
    }

    async fn complete(&self, prompt: &LlmPrompt) -> ProviderResult<Metered<String>> {
        self.rate_limiter.wait().await;

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: prompt.max_tokens,
            temperature: 0.2,
        };

        tracing::debug!(model = %self.model, max_tokens = prompt.max_tokens, "Calling LLM");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let body: ChatResponse = check_status(response).await?.json().await?;

        let cost = self.price(body.usage.as_ref());
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::Parse("completion has no content".to_string()))?;

        Ok(Metered::new(content, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            base_url: Some("http://localhost:4000/".to_string()),
            api_key: Some("key".to_string()),
            cost_per_1k_tokens: 0.5,
            unit_cost: 0.01,
            ..Default::default()
        }
    }

    #[test]
    fn endpoint_is_normalized() {
        let client = HttpLlmClient::new("llm", &config()).unwrap();
        assert_eq!(client.endpoint, "http://localhost:4000/v1/chat/completions");
    }

    #[test]
    fn cost_follows_token_usage() {
        let client = HttpLlmClient::new("llm", &config()).unwrap();
        let usage = ChatUsage { total_tokens: 2000 };
        assert!((client.price(Some(&usage)) - 1.0).abs() < 1e-9);
        assert!((client.price(None) - 0.01).abs() < 1e-9);
        assert!((LlmProvider::unit_cost(&client) - 0.01).abs() < 1e-9);
    }

    #[test]
    fn missing_key_is_not_configured() {
        let mut config = config();
        config.api_key = None;
        assert!(matches!(
            HttpLlmClient::new("llm", &config),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn response_parses_openai_shape() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}],"usage":{"prompt_tokens":3,"total_tokens":12}}"#,
        )
        .unwrap();
        assert_eq!(body.choices[0].message.content.as_deref(), Some("ok"));
        assert_eq!(body.usage.unwrap().total_tokens, 12);
    }
}
