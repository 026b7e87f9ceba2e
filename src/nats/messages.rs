use crate::session::{SessionState, TransitionEvent};
use serde::{Deserialize, Serialize};

/// Session transition published to NATS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionMessage {
    pub session_id: String,
    pub from: SessionState,
    pub to: SessionState,
    pub timestamp: String, // RFC3339 timestamp
    /// Transition cause, as logged
    pub cause: serde_json::Value,
    pub terminal: bool,
}

impl TransitionMessage {
    pub fn from_event(event: &TransitionEvent) -> serde_json::Result<Self> {
        Ok(Self {
            session_id: event.session_id.clone(),
            from: event.from,
            to: event.to,
            timestamp: event.timestamp.to_rfc3339(),
            cause: serde_json::to_value(&event.cause)?,
            terminal: event.to.is_terminal(),
        })
    }
}
