//! OpenAI-compatible chat completion backend.
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! (OpenAI, vLLM, llama.cpp server, LiteLLM proxy). Transient failures are
//! retried with exponential backoff; the orchestrator itself never retries.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AgentInvoker, AgentOutput};

/// Connection settings for an OpenAI-compatible server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; local servers usually need none
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}
fn default_model() -> String {
    "gpt-4".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    32000
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Exponential backoff between attempts at one chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, first call included
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt after `failed`, or `None` once attempts are spent
    pub fn backoff(&self, failed: u32) -> Option<Duration> {
        if failed >= self.attempts {
            return None;
        }
        let exponent = failed.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = (self.base_delay_ms as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay_ms as f64);
        Some(Duration::from_millis(millis as u64))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

/// Agent backend speaking the OpenAI chat completions API
pub struct OpenAiInvoker {
    settings: OpenAiSettings,
    client: reqwest::Client,
}

impl OpenAiInvoker {
    pub fn new(settings: OpenAiSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn complete_once(&self, role: &str, prompt: &str) -> Result<AgentOutput> {
        debug!(model = %self.settings.model, role, prompt, "Chat completion request");

        let system = format!("You are acting as the {} in a research team.", role);
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let mut builder = self.client.post(self.endpoint("chat/completions")).json(&request);
        if let Some(ref key) = self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to reach chat completions endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completions returned {}: {}", status, body.trim());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Chat completions response has no content"))?;

        let tokens_used = parsed.usage.map(|u| u.total_tokens);
        info!(model = %self.settings.model, role, tokens_used, "Chat completion finished");
        debug!(role, response = %content, "Chat completion response");

        Ok(AgentOutput {
            content,
            tokens_used,
        })
    }
}

#[async_trait]
impl AgentInvoker for OpenAiInvoker {
    fn name(&self) -> &str {
        "openai"
    }

    async fn invoke(&self, role: &str, prompt: &str) -> Result<AgentOutput> {
        let policy = &self.settings.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.complete_once(role, prompt).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };
            match policy.backoff(attempt) {
                Some(delay) => {
                    warn!(
                        role,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Agent call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(error.context(format!("Agent call failed after {} attempts", attempt)))
                }
            }
        }
    }

    async fn health_check(&self) -> Result<()> {
        let mut builder = self.client.get(self.endpoint("models"));
        if let Some(ref key) = self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.context("Failed to reach model server")?;
        if !response.status().is_success() {
            anyhow::bail!("Model server health check failed: {}", response.status());
        }
        Ok(())
    }
}
