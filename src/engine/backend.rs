use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the engine reports about one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Capture is running
    Recording,
    /// Nothing is being captured for this session
    Idle,
    /// The capture process died or reported a fault
    Error,
}

/// Where and how a capture should be written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Directory the recording is written to
    pub output_dir: PathBuf,

    /// File name without extension (e.g. "2025-10-28_14-30-00-ab12cd34")
    pub file_stem: String,

    /// Container extension (e.g. "mp4", "mkv", "wav")
    pub extension: String,
}

impl CaptureConfig {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.file_stem, self.extension))
    }
}

/// Reference to an in-flight capture held by the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHandle {
    pub session_id: String,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Recording engine trait
///
/// Implementations drive an external recording process (OBS over its
/// websocket, an ffmpeg child process, ...). The adapter layers idempotency,
/// timeouts and partial-artifact recovery on top.
#[async_trait::async_trait]
pub trait RecordingEngine: Send + Sync {
    /// Start capturing for a session, returning the file being written
    async fn start(&self, session_id: &str, config: &CaptureConfig) -> Result<PathBuf, EngineError>;

    /// Stop capturing; returns once the engine confirms the file is finalized
    async fn stop(&self, session_id: &str) -> Result<(), EngineError>;

    /// Forced stop, used when a graceful stop did not complete
    async fn abort(&self, session_id: &str) -> Result<(), EngineError>;

    /// Current capture status for a session
    async fn status(&self, session_id: &str) -> EngineStatus;

    /// Cheap liveness check of the engine itself
    async fn ping(&self) -> Result<(), EngineError>;

    /// Restart the underlying recording process
    async fn restart(&self) -> Result<(), EngineError>;

    /// Engine name for logging
    fn name(&self) -> &str;
}
