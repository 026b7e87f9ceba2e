use super::state::SessionState;
use crate::engine::Artifact;
use crate::health::Component;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Why a session moved between states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransitionCause {
    VoiceActivity { channel_id: String },
    EngineStarted { output_path: PathBuf },
    StopRequested,
    MaxDuration { limit_secs: u64 },
    ArtifactProduced { artifact: Artifact },
    PipelineComplete,
    EngineFailure { error: String },
    RequiredStageFailed { stage: String, error: String },
    ComponentStale { component: Component },
    OperatorAbort { reason: String },
    Recovered { previous: SessionState },
}

/// One entry of a session's append-only transition log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub from: SessionState,
    pub to: SessionState,
    pub cause: TransitionCause,
}

/// Destination for transition events (file log, message bus, ...)
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &TransitionEvent) -> Result<()>;

    fn name(&self) -> &str;
}

/// Append-only JSON-lines transition log used for crash recovery
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonlEventLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create event log directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open event log {}", path.display()))?;

        info!("Session event log: {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Read every event in the log, in write order
    ///
    /// A torn final line (crash mid-write) is skipped rather than failing recovery.
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<TransitionEvent>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read event log {}", path.display()))?;

        let mut events = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TransitionEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping unreadable event log line {}: {}", line_no + 1, e),
            }
        }

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl EventSink for JsonlEventLog {
    async fn append(&self, event: &TransitionEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
