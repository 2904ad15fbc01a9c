//! Subprocess agent backend.
//!
//! Spawns a configured executable, pipes the prompt to stdin and reads the
//! generated document from stdout. The agent role is passed in `LABFLOW_ROLE`.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{AgentInvoker, AgentOutput};

/// Agent backend that shells out to an external command
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl AgentInvoker for CommandInvoker {
    fn name(&self) -> &str {
        "command"
    }

    async fn invoke(&self, role: &str, prompt: &str) -> Result<AgentOutput> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("LABFLOW_ROLE", role)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The orchestrator's timeout drops this future; take the child with it
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for role '{}'", self.program, role))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to agent stdin")?;
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "'{}' failed for role '{}' with exit code {}: {}",
                self.program,
                role,
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Agent output is not valid UTF-8")?;

        Ok(AgentOutput::new(stdout))
    }

    async fn health_check(&self) -> Result<()> {
        Command::new(&self.program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Agent command '{}' is not runnable", self.program))?;
        Ok(())
    }
}
