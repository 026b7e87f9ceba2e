//! Recording engine backed by an external capture command
//!
//! Runs one child process per session (ffmpeg, gst-launch, obs --startrecording,
//! ...). `{output}` in the argument list is replaced with the target file.
//! A graceful stop writes `stop_input` to the child's stdin (ffmpeg quits on
//! "q") and waits for it to exit.

use super::backend::{CaptureConfig, EngineStatus, RecordingEngine};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Capture command configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessEngineConfig {
    /// Program to run (empty = engine unavailable)
    #[serde(default)]
    pub program: String,

    /// Arguments; `{output}` is replaced with the recording path
    #[serde(default)]
    pub args: Vec<String>,

    /// Written to stdin to request a graceful stop; killed if unset
    #[serde(default)]
    pub stop_input: Option<String>,
}

struct Capture {
    child: Child,
    output: PathBuf,
}

pub struct ProcessEngine {
    config: ProcessEngineConfig,
    captures: Mutex<HashMap<String, Capture>>,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig) -> Self {
        Self {
            config,
            captures: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self, output: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.config.args.iter().map(|a| a.replace("{output}", output)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl RecordingEngine for ProcessEngine {
    async fn start(&self, session_id: &str, config: &CaptureConfig) -> Result<PathBuf, EngineError> {
        if self.config.program.is_empty() {
            return Err(EngineError::Unavailable(
                "no capture program configured".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&config.output_dir).await.map_err(|e| {
            EngineError::Unavailable(format!(
                "cannot create {}: {}",
                config.output_dir.display(),
                e
            ))
        })?;

        let output = config.output_path();
        let child = self
            .command(&output.to_string_lossy())
            .spawn()
            .map_err(|e| {
                EngineError::Unavailable(format!("failed to spawn {}: {}", self.config.program, e))
            })?;

        info!(
            "Capture process {} started for session {} (pid {:?})",
            self.config.program,
            session_id,
            child.id()
        );

        self.captures.lock().await.insert(
            session_id.to_string(),
            Capture {
                child,
                output: output.clone(),
            },
        );

        Ok(output)
    }

    async fn stop(&self, session_id: &str) -> Result<(), EngineError> {
        let mut capture = self
            .captures
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| EngineError::NoActiveRecording(session_id.to_string()))?;

        match (&self.config.stop_input, capture.child.stdin.take()) {
            (Some(input), Some(mut stdin)) => {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!("Failed to send stop input to capture {}: {}", session_id, e);
                }
                let _ = stdin.flush().await;
                drop(stdin);
            }
            _ => {
                let _ = capture.child.start_kill();
            }
        }

        let status = capture
            .child
            .wait()
            .await
            .map_err(|e| EngineError::Unavailable(format!("wait failed: {e}")))?;

        info!(
            "Capture process for session {} exited with {} ({})",
            session_id,
            status,
            capture.output.display()
        );

        // Killed without a stop sequence is the expected shutdown path
        if status.success() || self.config.stop_input.is_none() {
            Ok(())
        } else {
            Err(EngineError::Unavailable(format!(
                "capture exited with {status}"
            )))
        }
    }

    async fn abort(&self, session_id: &str) -> Result<(), EngineError> {
        let capture = self.captures.lock().await.remove(session_id);
        if let Some(mut capture) = capture {
            warn!("Killing capture process for session {}", session_id);
            let _ = capture.child.start_kill();
            let _ = capture.child.wait().await;
        }
        Ok(())
    }

    async fn status(&self, session_id: &str) -> EngineStatus {
        let mut captures = self.captures.lock().await;
        match captures.get_mut(session_id) {
            None => EngineStatus::Idle,
            Some(capture) => match capture.child.try_wait() {
                Ok(None) => EngineStatus::Recording,
                Ok(Some(_)) | Err(_) => EngineStatus::Error,
            },
        }
    }

    async fn ping(&self) -> Result<(), EngineError> {
        let mut captures = self.captures.lock().await;
        for (session_id, capture) in captures.iter_mut() {
            if !matches!(capture.child.try_wait(), Ok(None)) {
                return Err(EngineError::Unavailable(format!(
                    "capture process for session {session_id} is no longer running"
                )));
            }
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), EngineError> {
        let mut captures = self.captures.lock().await;
        let mut dead = Vec::new();
        for (id, capture) in captures.iter_mut() {
            if !matches!(capture.child.try_wait(), Ok(None)) {
                dead.push(id.clone());
            }
        }

        if dead.is_empty() {
            return Ok(());
        }

        // A died capture can't be resumed into the same file; its sessions
        // finalize with whatever was written
        for id in &dead {
            captures.remove(id);
        }
        Err(EngineError::Unavailable(format!(
            "capture processes died for sessions {dead:?}"
        )))
    }

    fn name(&self) -> &str {
        "process"
    }
}
