use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{LlmClient, LlmResponse, Message, UpstreamError, Usage};
use crate::config::LlmConfig;

/// Generic client for any OpenAI-compatible chat completions API.
///
/// Works with: OpenAI, OpenRouter, Google Gemini, Groq, Together AI,
/// DeepSeek, vLLM, Ollama, LiteLLM, and any other provider that
/// implements the `/chat/completions` endpoint.
pub struct OpenAICompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAICompatibleClient {
    pub fn new(config: &LlmConfig, base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAICompatibleClient {
    async fn chat(&self, messages: Vec<Message>, model: Option<&str>) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: model.unwrap_or(&self.model),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to call {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError {
                provider: "LLM",
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Empty response from LLM"))?;

        Ok(LlmResponse {
            content,
            usage: body.usage,
        })
    }
}
