use super::state::SessionState;
use crate::engine::{Artifact, EngineHandle};
use crate::error::SessionWarning;
use crate::pipeline::StageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One recording attempt, from voice trigger to archive or failure
///
/// Only the [`SessionMachine`](super::SessionMachine) mutates sessions.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub channel_id: String,
    pub state: SessionState,

    /// When the voice trigger armed the session
    pub armed_at: DateTime<Utc>,

    /// When the engine confirmed the capture started
    pub started_at: Option<DateTime<Utc>>,

    /// When recording ended (entered finalizing)
    pub ended_at: Option<DateTime<Utc>>,

    /// At most one per session
    pub artifact: Option<Artifact>,

    /// Active capture, while recording
    pub engine: Option<EngineHandle>,

    pub stage_results: BTreeMap<String, StageResult>,
    pub warnings: Vec<SessionWarning>,

    /// Every error observed for this session, oldest first
    pub errors: Vec<String>,
}

impl Session {
    pub fn new(id: String, channel_id: String, armed_at: DateTime<Utc>) -> Self {
        Self {
            id,
            channel_id,
            state: SessionState::Idle,
            armed_at,
            started_at: None,
            ended_at: None,
            artifact: None,
            engine: None,
            stage_results: BTreeMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            state: self.state,
            armed_at: self.armed_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            artifact: self.artifact.clone(),
            stage_results: self.stage_results.values().cloned().collect(),
            warnings: self.warnings.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Read-only view returned to operator tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub channel_id: String,
    pub state: SessionState,
    pub armed_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub artifact: Option<Artifact>,
    pub stage_results: Vec<StageResult>,
    pub warnings: Vec<SessionWarning>,
    pub errors: Vec<String>,
}

impl SessionSnapshot {
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage == name)
    }
}
