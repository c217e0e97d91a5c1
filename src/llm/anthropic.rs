use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{LlmClient, LlmResponse, Message, UpstreamError, Usage};
use crate::config::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

// --- Request types ---

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// System messages go to the top-level `system` field; consecutive
    /// messages with the same role are merged since the API requires
    /// alternating turns.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system: Option<String> = None;
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => match &mut system {
                    Some(s) => {
                        s.push_str("\n\n");
                        s.push_str(&msg.content);
                    }
                    None => system = Some(msg.content.clone()),
                },
                role @ ("user" | "assistant") => {
                    if let Some(last) = result.last_mut()
                        && last.role == role
                    {
                        last.content.push_str("\n\n");
                        last.content.push_str(&msg.content);
                        continue;
                    }
                    result.push(AnthropicMessage {
                        role: role.to_string(),
                        content: msg.content.clone(),
                    });
                }
                _ => {}
            }
        }

        (system, result)
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, messages: Vec<Message>, model: Option<&str>) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let (system, api_messages) = Self::convert_messages(&messages);

        let request = AnthropicRequest {
            model: model.unwrap_or(&self.model),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: api_messages,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to call Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError {
                provider: "Anthropic",
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if content.is_empty() {
            anyhow::bail!("Empty response from Anthropic");
        }

        let usage = body.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(LlmResponse { content, usage })
    }
}
