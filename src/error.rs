//! Domain error types
//!
//! Engine, stage, and session failures are typed so the orchestrator can tell
//! a fatal cause from a retryable one. Application plumbing (config loading,
//! provider I/O) stays on `anyhow`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the recording engine adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("recording engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine is already recording session {0}")]
    AlreadyRecording(String),

    #[error("engine did not finalize within {0:?} and no media was captured")]
    StopTimeout(Duration),

    #[error("no active recording for session {0}")]
    NoActiveRecording(String),
}

/// Failure of a single stage attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("stage attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("stage cancelled")]
    Cancelled,

    #[error("stage attempt stale: no progress within {0:?}")]
    Stale(Duration),

    #[error("required prerequisite {0} did not succeed")]
    DependencyUnmet(String),

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("{0}")]
    Failed(String),
}

impl StageError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StageError::Cancelled | StageError::DependencyUnmet(_) | StageError::NotConfigured(_)
        )
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        // Keep the whole context chain so the last error is recorded verbatim
        Self::Failed(format!("{err:#}"))
    }
}

/// Errors from the session state machine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),

    #[error("invalid transition {from} -> {to} for session {session_id}")]
    InvalidTransition {
        session_id: String,
        from: crate::session::SessionState,
        to: crate::session::SessionState,
    },

    #[error("session {0} already has an artifact")]
    ArtifactAlreadySet(String),

    #[error("session {0} has already terminated")]
    Terminal(String),
}

/// Errors raised while validating a stage dependency graph
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("stage {0} declared twice")]
    Duplicate(String),

    #[error("stage {stage} depends on unknown stage {prerequisite}")]
    UnknownPrerequisite { stage: String, prerequisite: String },

    #[error("dependency cycle through stages: {0:?}")]
    Cycle(Vec<String>),

    #[error("no implementation registered for stage {0}")]
    MissingStage(String),
}

/// Non-fatal annotations carried by a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionWarning {
    /// The engine did not confirm finalization; media may be truncated
    PartialArtifact { reason: String },
    /// An optional stage exhausted its retries or was skipped
    OptionalStageFailed { stage: String, error: String },
}

impl std::fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PartialArtifact { reason } => write!(f, "partial artifact: {reason}"),
            Self::OptionalStageFailed { stage, error } => {
                write!(f, "optional stage {stage} failed: {error}")
            }
        }
    }
}

/// Errors surfaced by orchestrator operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("session {session_id} is {state}, cannot {action}")]
    WrongState {
        session_id: String,
        state: crate::session::SessionState,
        action: &'static str,
    },
}
