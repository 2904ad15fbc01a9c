//! Adapter interfaces for external systems.
//!
//! Agent invokers turn a rendered prompt into generated text. The terminal gate
//! is the interactive side of the approval checkpoint.

pub mod command;
pub mod openai;
pub mod terminal;

use anyhow::Result;
use async_trait::async_trait;

pub use command::CommandInvoker;
pub use openai::{OpenAiInvoker, OpenAiSettings, RetryPolicy};
pub use terminal::TerminalGate;

/// Output from an agent invocation
#[derive(Debug, Clone)]
pub struct AgentOutput {
    /// The generated text
    pub content: String,

    /// Tokens used (if available)
    pub tokens_used: Option<u64>,
}

impl AgentOutput {
    /// Create a new output with just content
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
        }
    }
}

/// Reasoning backend that produces a document for a role and prompt
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Generate text for `prompt` acting as `role`
    async fn invoke(&self, role: &str, prompt: &str) -> Result<AgentOutput>;

    /// Health check (for HTTP backends)
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
