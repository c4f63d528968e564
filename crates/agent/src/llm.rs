use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use tagdesk_core::config::{LlmConfig, LlmProvider};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible endpoints (OpenAI itself or
/// a local Ollama server exposing the `/v1` surface).
pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiChatClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| match config.provider {
                LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
                LlmProvider::Ollama => "http://localhost:11434/v1".to_string(),
            });

        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": user_prompt },
                ],
                "temperature": 0.2,
            }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("chat completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion returned {status}: {body}"));
        }

        let data = response
            .json::<serde_json::Value>()
            .await
            .context("chat completion body was not json")?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("chat completion response had no message content"))
    }
}
