use super::event::{EventSink, TransitionCause, TransitionEvent};
use super::session::{Session, SessionSnapshot};
use super::state::SessionState;
use crate::engine::{Artifact, EngineHandle};
use crate::error::{SessionError, SessionWarning};
use crate::health::{Component, Probe};
use crate::pipeline::StageResult;
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info, warn};

/// A session plus its transition log, guarded by the session's exclusive token
struct Entry {
    session: Session,
    events: Vec<TransitionEvent>,
}

type Slot = Arc<tokio::sync::Mutex<Entry>>;

/// Result of a voice-activity arm request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmOutcome {
    pub session_id: String,

    /// False when the channel already had an armed or recording session
    pub created: bool,
}

/// What crash recovery decided for a session found in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Artifact exists; session now sits in finalizing and should publish
    Resume(String),
    /// No artifact; session marked failed
    Failed(String),
    /// Already terminal; restored read-only
    Restored(String),
}

/// Single authority over every session's lifecycle
///
/// Each session carries its own async mutex (the exclusive transition
/// token), so transitions for one session never interleave while sessions
/// proceed independently of each other.
pub struct SessionMachine {
    sessions: RwLock<HashMap<String, Slot>>,

    /// Channel → session currently holding it (idle/armed/recording)
    channels: Mutex<HashMap<String, String>>,

    sinks: Vec<Arc<dyn EventSink>>,
    registry: Arc<Registry>,
}

impl SessionMachine {
    pub fn new(registry: Arc<Registry>, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            sinks,
            registry,
        }
    }

    fn slot(&self, session_id: &str) -> Result<Slot, SessionError> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn slots(&self) -> Vec<Slot> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Arm a session for a channel on voice activity
    ///
    /// While the channel already has a session in idle/armed/recording the
    /// existing session is returned and nothing changes.
    pub async fn arm(&self, channel_id: &str, at: DateTime<Utc>) -> Result<ArmOutcome, SessionError> {
        let session_id = {
            let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(existing) = channels.get(channel_id) {
                return Ok(ArmOutcome {
                    session_id: existing.clone(),
                    created: false,
                });
            }

            let session_id = format!("session-{}", uuid::Uuid::new_v4());
            channels.insert(channel_id.to_string(), session_id.clone());

            let session = Session::new(session_id.clone(), channel_id.to_string(), at);
            self.sessions
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .insert(
                    session_id.clone(),
                    Arc::new(tokio::sync::Mutex::new(Entry {
                        session,
                        events: Vec::new(),
                    })),
                );
            session_id
        };

        self.transition(
            &session_id,
            SessionState::Armed,
            TransitionCause::VoiceActivity {
                channel_id: channel_id.to_string(),
            },
        )
        .await?;

        Ok(ArmOutcome {
            session_id,
            created: true,
        })
    }

    /// Move a session one step along its lifecycle
    pub async fn transition(
        &self,
        session_id: &str,
        to: SessionState,
        cause: TransitionCause,
    ) -> Result<SessionState, SessionError> {
        let slot = self.slot(session_id)?;
        let mut entry = slot.lock().await;
        self.apply(&mut entry, to, cause, false).await
    }

    /// Transition only if the session is currently in `from`
    ///
    /// Returns `Ok(false)` without changing anything when the state differs.
    pub async fn transition_from(
        &self,
        session_id: &str,
        from: SessionState,
        to: SessionState,
        cause: TransitionCause,
    ) -> Result<bool, SessionError> {
        let slot = self.slot(session_id)?;
        let mut entry = slot.lock().await;
        if entry.session.state != from {
            return Ok(false);
        }
        self.apply(&mut entry, to, cause, false).await?;
        Ok(true)
    }

    async fn apply(
        &self,
        entry: &mut Entry,
        to: SessionState,
        cause: TransitionCause,
        recovering: bool,
    ) -> Result<SessionState, SessionError> {
        let session = &mut entry.session;
        let from = session.state;

        if !recovering && !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                session_id: session.id.clone(),
                from,
                to,
            });
        }

        let now = Utc::now();
        session.state = to;
        match to {
            SessionState::Recording => session.started_at = Some(now),
            SessionState::Finalizing if session.ended_at.is_none() => session.ended_at = Some(now),
            _ => {}
        }

        match &cause {
            TransitionCause::EngineFailure { error }
            | TransitionCause::RequiredStageFailed { error, .. } => {
                session.errors.push(error.clone());
            }
            TransitionCause::ComponentStale { component } => {
                session.errors.push(format!("{component} stale"));
            }
            _ => {}
        }

        if !to.holds_channel() {
            let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
            if channels.get(&session.channel_id) == Some(&session.id) {
                channels.remove(&session.channel_id);
            }
        }

        let event = TransitionEvent {
            session_id: session.id.clone(),
            timestamp: now,
            from,
            to,
            cause,
        };

        match to {
            SessionState::Failed => error!("Session {} {} → {}", session.id, from, to),
            _ => info!("Session {} {} → {}", session.id, from, to),
        }

        entry.events.push(event.clone());
        for sink in &self.sinks {
            if let Err(e) = sink.append(&event).await {
                warn!("Event sink {} rejected transition: {:#}", sink.name(), e);
            }
        }

        self.registry.beat(Component::SessionMachine);
        Ok(to)
    }

    pub async fn current_state(&self, session_id: &str) -> Option<SessionState> {
        let slot = self.slot(session_id).ok()?;
        let state = slot.lock().await.session.state;
        Some(state)
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let slot = self.slot(session_id).ok()?;
        let snapshot = slot.lock().await.session.snapshot();
        Some(snapshot)
    }

    /// All sessions, oldest first
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let mut all = Vec::new();
        for slot in self.slots() {
            all.push(slot.lock().await.session.snapshot());
        }
        all.sort_by_key(|s| s.armed_at);
        all
    }

    /// Ordered, replayable transition log of one session
    pub async fn events(&self, session_id: &str) -> Option<Vec<TransitionEvent>> {
        let slot = self.slot(session_id).ok()?;
        let events = slot.lock().await.events.clone();
        Some(events)
    }

    /// Ids of sessions currently in `state`
    pub async fn sessions_in(&self, state: SessionState) -> Vec<String> {
        let mut ids = Vec::new();
        for slot in self.slots() {
            let entry = slot.lock().await;
            if entry.session.state == state {
                ids.push(entry.session.id.clone());
            }
        }
        ids
    }

    pub async fn artifact(&self, session_id: &str) -> Option<Artifact> {
        let slot = self.slot(session_id).ok()?;
        let artifact = slot.lock().await.session.artifact.clone();
        artifact
    }

    pub async fn engine_handle(&self, session_id: &str) -> Option<EngineHandle> {
        let slot = self.slot(session_id).ok()?;
        let handle = slot.lock().await.session.engine.clone();
        handle
    }

    pub async fn set_engine_handle(
        &self,
        session_id: &str,
        handle: Option<EngineHandle>,
    ) -> Result<(), SessionError> {
        let slot = self.slot(session_id)?;
        slot.lock().await.session.engine = handle;
        Ok(())
    }

    /// Attach the session's artifact; a session has at most one
    pub async fn set_artifact(&self, session_id: &str, artifact: Artifact) -> Result<(), SessionError> {
        let slot = self.slot(session_id)?;
        let mut entry = slot.lock().await;
        if entry.session.artifact.is_some() {
            return Err(SessionError::ArtifactAlreadySet(session_id.to_string()));
        }
        entry.session.artifact = Some(artifact);
        Ok(())
    }

    pub async fn add_warning(&self, session_id: &str, warning: SessionWarning) -> Result<(), SessionError> {
        let slot = self.slot(session_id)?;
        let mut entry = slot.lock().await;
        warn!("Session {}: {}", session_id, warning);
        entry.session.warnings.push(warning);
        Ok(())
    }

    /// Store a stage result update
    ///
    /// Updates to a result that is already terminal are ignored, as are
    /// updates for sessions that have already ended.
    pub async fn record_stage_result(&self, session_id: &str, result: StageResult) -> Result<(), SessionError> {
        let slot = self.slot(session_id)?;
        let mut entry = slot.lock().await;
        let session = &mut entry.session;

        if session.state.is_terminal() {
            return Ok(());
        }
        if session
            .stage_results
            .get(&result.stage)
            .is_some_and(|existing| existing.is_terminal())
        {
            return Ok(());
        }

        if let (true, Some(error)) = (result.is_terminal(), &result.last_error) {
            session.errors.push(format!("{}: {}", result.stage, error));
        }
        session.stage_results.insert(result.stage.clone(), result);
        Ok(())
    }

    /// Fail every non-terminal stage result, keeping terminal ones
    pub async fn fail_pending_stages(&self, session_id: &str, error: &str) -> Result<usize, SessionError> {
        let slot = self.slot(session_id)?;
        let mut entry = slot.lock().await;
        let session = &mut entry.session;

        let mut failed = 0;
        for result in session.stage_results.values_mut() {
            if result.fail_if_pending(error) {
                failed += 1;
            }
        }
        if failed > 0 {
            session.errors.push(error.to_string());
        }
        Ok(failed)
    }

    /// Rebuild sessions from a persisted transition log
    ///
    /// Sessions that were mid-flight resume at finalizing when an artifact
    /// had been produced, otherwise they are marked failed.
    pub async fn recover(&self, events: Vec<TransitionEvent>) -> Vec<Recovery> {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<TransitionEvent>> = HashMap::new();
        for event in events {
            if !grouped.contains_key(&event.session_id) {
                order.push(event.session_id.clone());
            }
            grouped.entry(event.session_id.clone()).or_default().push(event);
        }

        let mut outcomes = Vec::new();
        for session_id in order {
            let Some(history) = grouped.remove(&session_id) else {
                continue;
            };
            if self.slot(&session_id).is_ok() {
                continue;
            }

            let session = rebuild(&session_id, &history);
            let state = session.state;
            let has_artifact = session.artifact.is_some();
            let partial = session.artifact.as_ref().is_some_and(|a| a.partial);

            let slot: Slot = Arc::new(tokio::sync::Mutex::new(Entry {
                session,
                events: history,
            }));
            self.sessions
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .insert(session_id.clone(), Arc::clone(&slot));

            if state.is_terminal() {
                outcomes.push(Recovery::Restored(session_id));
                continue;
            }

            let mut entry = slot.lock().await;
            let cause = TransitionCause::Recovered { previous: state };
            if has_artifact {
                if partial {
                    entry.session.warnings.push(SessionWarning::PartialArtifact {
                        reason: "recovered truncated recording".to_string(),
                    });
                }
                if state != SessionState::Finalizing {
                    let _ = self.apply(&mut entry, SessionState::Finalizing, cause, true).await;
                }
                info!("Recovered session {} at finalizing", session_id);
                outcomes.push(Recovery::Resume(session_id));
            } else {
                let _ = self.apply(&mut entry, SessionState::Failed, cause, true).await;
                outcomes.push(Recovery::Failed(session_id));
            }
        }

        outcomes
    }
}

fn rebuild(session_id: &str, history: &[TransitionEvent]) -> Session {
    let armed_at = history.first().map(|e| e.timestamp).unwrap_or_else(Utc::now);
    let channel_id = history
        .iter()
        .find_map(|e| match &e.cause {
            TransitionCause::VoiceActivity { channel_id } => Some(channel_id.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let mut session = Session::new(session_id.to_string(), channel_id, armed_at);
    for event in history {
        session.state = event.to;
        match (&event.to, &event.cause) {
            (SessionState::Recording, _) => session.started_at = Some(event.timestamp),
            (SessionState::Finalizing, _) if session.ended_at.is_none() => {
                session.ended_at = Some(event.timestamp)
            }
            _ => {}
        }
        match &event.cause {
            TransitionCause::ArtifactProduced { artifact } => {
                session.artifact = Some(artifact.clone());
            }
            TransitionCause::EngineFailure { error }
            | TransitionCause::RequiredStageFailed { error, .. } => {
                session.errors.push(error.clone());
            }
            _ => {}
        }
    }
    session
}

#[async_trait::async_trait]
impl Probe for SessionMachine {
    fn component(&self) -> Component {
        Component::SessionMachine
    }

    async fn probe(&self) -> Result<(), String> {
        drop(
            self.sessions
                .read()
                .map_err(|_| "session table poisoned".to_string())?,
        );
        self.registry.beat(Component::SessionMachine);
        Ok(())
    }
}
