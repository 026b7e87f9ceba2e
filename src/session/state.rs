//! Session lifecycle states
//!
//! `idle → armed → recording → finalizing → publishing → archived` with
//! `archived-with-warnings` as an alternate clean end and `failed` reachable
//! from every non-terminal state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Armed,
    Recording,
    Finalizing,
    Publishing,
    Archived,
    ArchivedWithWarnings,
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Archived | SessionState::ArchivedWithWarnings | SessionState::Failed
        )
    }

    /// Whether the session still owns its channel (duplicate voice events are no-ops)
    pub fn holds_channel(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Armed | SessionState::Recording
        )
    }

    /// Whether `next` is a legal single step from this state
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (*self, next),
            (_, Failed)
                | (Idle, Armed)
                | (Armed, Recording)
                | (Recording, Finalizing)
                | (Finalizing, Publishing)
                | (Publishing, Archived)
                | (Publishing, ArchivedWithWarnings)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Recording => "recording",
            SessionState::Finalizing => "finalizing",
            SessionState::Publishing => "publishing",
            SessionState::Archived => "archived",
            SessionState::ArchivedWithWarnings => "archived-with-warnings",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
