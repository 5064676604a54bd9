//! Model providers
//!
//! A provider turns (system prompt, user query) into raw model text. The
//! shipped implementation speaks the OpenAI-compatible chat completions
//! API used by OpenRouter and local inference servers; credentials and
//! provider selection are read from the environment at construction.

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// The raw-generation interface driven by the tool-call loop
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Produce raw model text for the given prompt pair
    async fn generate(&self, system_prompt: &str, user_query: &str) -> Result<String>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// OpenAI-compatible chat completions provider
pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    json_output: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

impl OpenRouterProvider {
    /// Create a provider from configuration plus environment credentials
    /// (`OPENROUTER_API_KEY`, falling back to `OPENAI_API_KEY`).
    pub fn from_env(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map(SecretString::from)
            .map_err(|_| {
                Error::Config(
                    "No model credentials: set OPENROUTER_API_KEY or OPENAI_API_KEY".to_string(),
                )
            })?;

        Self::new(config, api_key)
    }

    /// Create a provider with an explicit API key
    pub fn new(config: &LlmConfig, api_key: SecretString) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
                .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(OpenRouterProvider {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            json_output: config.json_output,
        })
    }
}

#[async_trait]
impl ModelProvider for OpenRouterProvider {
    async fn generate(&self, system_prompt: &str, user_query: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_query,
                },
            ],
            temperature: self.temperature,
            response_format: self.json_output.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("LLM request -> {} (model {})", url, self.model);

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "chat completions returned {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Provider("chat completions returned no choices".to_string()))?;

        debug!("LLM response <- {} chars", content.len());
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
