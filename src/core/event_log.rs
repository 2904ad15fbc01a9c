//! Append-only audit log with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) at
//! `<output>/logs/events.jsonl` for easy inspection. Events tied to a phase
//! are also written as one readable line to that phase's own log file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{Event, Phase};

/// File-based event log using JSONL format
#[derive(Debug, Clone)]
pub struct EventLog {
    logs_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl EventLog {
    /// Create or open the event log under `logs_dir`
    pub async fn open(logs_dir: &Path) -> Result<Self> {
        fs::create_dir_all(logs_dir)
            .await
            .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;

        Ok(Self {
            logs_dir: logs_dir.to_path_buf(),
            events_path: logs_dir.join("events.jsonl"),
        })
    }

    /// Human-readable log for one phase
    pub fn phase_log_path(&self, phase: Phase) -> PathBuf {
        self.logs_dir.join(phase.log_file_name())
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        if let Some(phase) = event.phase {
            self.append_phase_line(phase, event).await?;
        }

        Ok(())
    }

    async fn append_phase_line(&self, phase: Phase, event: &Event) -> Result<()> {
        let path = self.phase_log_path(phase);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open phase log: {}", path.display()))?;

        file.write_all(format!("{}\n", phase_line(event)).as_bytes())
            .await
            .context("Failed to write phase log")?;
        file.flush().await.context("Failed to flush phase log")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// The most recent `limit` events, oldest first
    pub async fn tail(&self, limit: usize) -> Result<Vec<Event>> {
        let events = self.replay().await?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.into_iter().skip(skip).collect())
    }

}

fn phase_line(event: &Event) -> String {
    let mut line = format!(
        "{} [{}] {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.event_type.as_str(),
        event.summary
    );
    if let Some(ref artifact) = event.artifact {
        line.push_str(&format!(" artifact={}", artifact));
    }
    if let Some(ms) = event.duration_ms {
        line.push_str(&format!(" duration_ms={}", ms));
    }
    if let Some(tokens) = event.tokens_used {
        line.push_str(&format!(" tokens={}", tokens));
    }
    if let Some(ref error) = event.error {
        line.push_str(&format!(" error={}", error));
    }
    line
}
