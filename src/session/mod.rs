//! Recording session management
//!
//! This module provides the session state machine that owns every session's
//! lifecycle:
//! - Lifecycle states and the legal transitions between them
//! - Per-session exclusive transition token
//! - Ordered, replayable transition log with pluggable sinks
//! - Crash recovery from a persisted log

mod event;
mod machine;
mod session;
mod state;

pub use event::{EventSink, JsonlEventLog, TransitionCause, TransitionEvent};
pub use machine::{ArmOutcome, Recovery, SessionMachine};
pub use session::{Session, SessionSnapshot};
pub use state::SessionState;
