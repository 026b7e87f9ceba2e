//! Session orchestration
//!
//! Wires the engine adapter, session machine and stage runner together:
//! voice activity arms and starts a recording, stop finalizes it into an
//! artifact, and the publish pipeline runs in the background until the
//! session archives or fails.

use crate::engine::{CaptureConfig, EngineAdapter, StopReport};
use crate::error::{OrchestratorError, SessionError, SessionWarning};
use crate::health::{Component, HealthRecord, Remediation};
use crate::pipeline::{
    PipelineOutcome, PipelineVerdict, SessionMeta, StageInput, StageObserver, StageResult, StageRunner,
    StageSet,
};
use crate::registry::Registry;
use crate::session::{
    ArmOutcome, Recovery, SessionMachine, SessionSnapshot, SessionState, TransitionCause, TransitionEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Voice activity detected on a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceActivity {
    pub channel_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Capture settings applied to every session
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub capture_dir: PathBuf,
    pub extension: String,

    /// Recordings are stopped automatically after this long
    pub max_duration: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            capture_dir: PathBuf::from("recordings"),
            extension: "mkv".to_string(),
            max_duration: None,
        }
    }
}

struct PipelineTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Forwards stage progress into the session machine
struct SessionObserver {
    machine: Arc<SessionMachine>,
}

#[async_trait::async_trait]
impl StageObserver for SessionObserver {
    async fn stage_updated(&self, session_id: &str, result: &StageResult) {
        if let Err(e) = self.machine.record_stage_result(session_id, result.clone()).await {
            debug!("Dropping stage update for {}: {}", session_id, e);
        }
    }
}

pub struct Orchestrator {
    me: Weak<Orchestrator>,
    machine: Arc<SessionMachine>,
    engine: Arc<EngineAdapter>,
    runner: Arc<StageRunner>,
    stages: Arc<StageSet>,
    registry: Arc<Registry>,
    settings: OrchestratorSettings,

    pipelines: Mutex<HashMap<String, PipelineTask>>,

    /// Max-duration auto-stop timers, per recording session
    timers: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        machine: Arc<SessionMachine>,
        engine: Arc<EngineAdapter>,
        runner: Arc<StageRunner>,
        stages: Arc<StageSet>,
        registry: Arc<Registry>,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            machine,
            engine,
            runner,
            stages,
            registry,
            settings,
            pipelines: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        })
    }

    pub fn machine(&self) -> &Arc<SessionMachine> {
        &self.machine
    }

    fn pipelines(&self) -> MutexGuard<'_, HashMap<String, PipelineTask>> {
        self.pipelines.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.timers.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Arm and start recording for a channel
    ///
    /// Repeated activity on a channel that already has an armed or recording
    /// session returns that session unchanged.
    pub async fn on_voice_activity(&self, activity: VoiceActivity) -> Result<ArmOutcome, OrchestratorError> {
        let outcome = self.machine.arm(&activity.channel_id, activity.timestamp).await?;
        if !outcome.created {
            debug!(
                "Channel {} already has session {}",
                activity.channel_id, outcome.session_id
            );
            return Ok(outcome);
        }

        let session_id = outcome.session_id.as_str();
        info!("Voice activity on {}, starting {}", activity.channel_id, session_id);

        let capture = CaptureConfig {
            output_dir: self.settings.capture_dir.clone(),
            file_stem: file_stem(session_id, activity.timestamp),
            extension: self.settings.extension.clone(),
        };

        let handle = match self.engine.start(session_id, &capture).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Engine failed to start for {}: {}", session_id, e);
                self.machine
                    .transition(
                        session_id,
                        SessionState::Failed,
                        TransitionCause::EngineFailure { error: e.to_string() },
                    )
                    .await?;
                return Err(e.into());
            }
        };

        self.machine
            .set_engine_handle(session_id, Some(handle.clone()))
            .await?;
        let moved = self
            .machine
            .transition_from(
                session_id,
                SessionState::Armed,
                SessionState::Recording,
                TransitionCause::EngineStarted {
                    output_path: handle.output_path.clone(),
                },
            )
            .await?;
        if !moved {
            // Aborted while the engine was starting
            self.engine.discard(session_id).await;
            let state = self.machine.current_state(session_id).await.unwrap_or(SessionState::Failed);
            return Err(OrchestratorError::WrongState {
                session_id: session_id.to_string(),
                state,
                action: "start recording",
            });
        }

        if let Some(limit) = self.settings.max_duration {
            self.arm_timer(session_id, limit);
        }

        Ok(outcome)
    }

    fn arm_timer(&self, session_id: &str, limit: Duration) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        let token = CancellationToken::new();
        self.timers().insert(session_id.to_string(), token.clone());

        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    info!("Session {} reached max duration {:?}", session_id, limit);
                    let cause = TransitionCause::MaxDuration { limit_secs: limit.as_secs() };
                    if let Err(e) = this.stop_with_cause(&session_id, cause).await {
                        warn!("Auto-stop of {} failed: {}", session_id, e);
                    }
                }
            }
        });
    }

    fn cancel_timer(&self, session_id: &str) {
        if let Some(token) = self.timers().remove(session_id) {
            token.cancel();
        }
    }

    /// Operator stop: finalize the recording and start publishing
    pub async fn stop(&self, session_id: &str) -> Result<SessionSnapshot, OrchestratorError> {
        self.stop_with_cause(session_id, TransitionCause::StopRequested).await
    }

    pub async fn stop_with_cause(
        &self,
        session_id: &str,
        cause: TransitionCause,
    ) -> Result<SessionSnapshot, OrchestratorError> {
        self.cancel_timer(session_id);

        let state = self
            .machine
            .current_state(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        match state {
            SessionState::Recording => {}
            // Already stopping or stopped
            SessionState::Finalizing | SessionState::Publishing => return self.snapshot(session_id).await,
            state => {
                return Err(OrchestratorError::WrongState {
                    session_id: session_id.to_string(),
                    state,
                    action: "stop",
                })
            }
        }

        let handle = self.machine.engine_handle(session_id).await;
        if !self
            .machine
            .transition_from(session_id, SessionState::Recording, SessionState::Finalizing, cause)
            .await?
        {
            return self.snapshot(session_id).await;
        }

        let Some(handle) = handle else {
            self.fail(session_id, "recording has no engine handle").await;
            return self.snapshot(session_id).await;
        };

        match self.engine.stop(&handle).await {
            Ok(report) => self.finalize(session_id, report).await?,
            Err(e) => {
                error!("Session {} produced no artifact: {}", session_id, e);
                self.fail(session_id, &e.to_string()).await;
            }
        }

        self.snapshot(session_id).await
    }

    async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, OrchestratorError> {
        self.machine
            .snapshot(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()).into())
    }

    async fn fail(&self, session_id: &str, error: &str) {
        let _ = self.machine.set_engine_handle(session_id, None).await;
        if let Err(e) = self
            .machine
            .transition(
                session_id,
                SessionState::Failed,
                TransitionCause::EngineFailure {
                    error: error.to_string(),
                },
            )
            .await
        {
            warn!("Could not fail session {}: {}", session_id, e);
        }
    }

    /// Attach the artifact, move to publishing and launch the pipeline
    async fn finalize(&self, session_id: &str, report: StopReport) -> Result<(), OrchestratorError> {
        let StopReport { artifact, warning } = report;

        self.machine.set_engine_handle(session_id, None).await?;
        self.machine.set_artifact(session_id, artifact.clone()).await?;
        if let Some(warning) = warning {
            self.machine.add_warning(session_id, warning).await?;
        }

        let moved = self
            .machine
            .transition_from(
                session_id,
                SessionState::Finalizing,
                SessionState::Publishing,
                TransitionCause::ArtifactProduced { artifact },
            )
            .await?;
        if moved {
            self.spawn_pipeline(session_id).await?;
        }
        Ok(())
    }

    async fn spawn_pipeline(&self, session_id: &str) -> Result<(), OrchestratorError> {
        let snapshot = self.snapshot(session_id).await?;
        let Some(artifact) = snapshot.artifact else {
            self.fail(session_id, "publishing without an artifact").await;
            return Ok(());
        };
        let Some(this) = self.me.upgrade() else {
            return Ok(());
        };

        let input = StageInput {
            session: SessionMeta {
                session_id: snapshot.session_id.clone(),
                channel_id: snapshot.channel_id.clone(),
                started_at: snapshot.started_at,
                ended_at: snapshot.ended_at,
            },
            artifact,
            prior: Default::default(),
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let id = session_id.to_string();

        let mut pipelines = self.pipelines();
        let handle = tokio::spawn(async move {
            let observer = SessionObserver {
                machine: Arc::clone(&this.machine),
            };
            let outcome = this
                .runner
                .run_pipeline(input, &this.stages, &token, &observer)
                .await;
            this.complete(&id, outcome, &token).await;
        });
        pipelines.insert(session_id.to_string(), PipelineTask { cancel, handle });
        Ok(())
    }

    async fn complete(&self, session_id: &str, outcome: PipelineOutcome, cancel: &CancellationToken) {
        self.pipelines().remove(session_id);

        if cancel.is_cancelled() {
            // Whoever cancelled owns the session's terminal transition
            debug!("Pipeline for {} cancelled", session_id);
            return;
        }

        for failed in outcome.optional_failures() {
            let warning = SessionWarning::OptionalStageFailed {
                stage: failed.stage.clone(),
                error: failed.last_error.clone().unwrap_or_default(),
            };
            let _ = self.machine.add_warning(session_id, warning).await;
        }

        let (to, cause) = match outcome.verdict() {
            PipelineVerdict::Failed { stage, error } => (
                SessionState::Failed,
                TransitionCause::RequiredStageFailed { stage, error },
            ),
            PipelineVerdict::Archived | PipelineVerdict::ArchivedWithWarnings => {
                let warned = self
                    .machine
                    .snapshot(session_id)
                    .await
                    .is_some_and(|s| !s.warnings.is_empty());
                let to = if warned {
                    SessionState::ArchivedWithWarnings
                } else {
                    SessionState::Archived
                };
                (to, TransitionCause::PipelineComplete)
            }
        };

        match self
            .machine
            .transition_from(session_id, SessionState::Publishing, to, cause)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Session {} left publishing before its pipeline finished", session_id),
            Err(e) => warn!("Could not complete session {}: {}", session_id, e),
        }
    }

    /// Operator abort: cancel everything in flight and fail the session
    pub async fn abort(&self, session_id: &str, reason: &str) -> Result<SessionSnapshot, OrchestratorError> {
        let state = self
            .machine
            .current_state(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if state.is_terminal() {
            return Err(SessionError::Terminal(session_id.to_string()).into());
        }

        warn!("Aborting session {}: {}", session_id, reason);
        self.cancel_timer(session_id);

        // Fail first so late stage updates from the cancelled pipeline are ignored
        self.machine
            .transition(
                session_id,
                SessionState::Failed,
                TransitionCause::OperatorAbort {
                    reason: reason.to_string(),
                },
            )
            .await?;

        if let Some(task) = self.pipelines().remove(session_id) {
            task.cancel.cancel();
        }
        self.engine.discard(session_id).await;
        self.machine.set_engine_handle(session_id, None).await?;
        self.machine
            .fail_pending_stages(session_id, &format!("aborted: {reason}"))
            .await?;

        self.snapshot(session_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.machine.snapshot(session_id).await
    }

    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.machine.list().await
    }

    pub async fn events(&self, session_id: &str) -> Option<Vec<TransitionEvent>> {
        self.machine.events(session_id).await
    }

    pub fn get_health(&self) -> Vec<HealthRecord> {
        self.registry.health()
    }

    /// Rebuild sessions from a transition log and resume interrupted pipelines
    pub async fn recover(&self, events: Vec<TransitionEvent>) -> Vec<Recovery> {
        let recoveries = self.machine.recover(events).await;

        for recovery in &recoveries {
            let Recovery::Resume(session_id) = recovery else {
                continue;
            };
            let Some(artifact) = self.machine.artifact(session_id).await else {
                continue;
            };

            let resumed = self
                .machine
                .transition_from(
                    session_id,
                    SessionState::Finalizing,
                    SessionState::Publishing,
                    TransitionCause::ArtifactProduced { artifact },
                )
                .await;
            match resumed {
                Ok(true) => {
                    if let Err(e) = self.spawn_pipeline(session_id).await {
                        warn!("Could not resume pipeline for {}: {}", session_id, e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Could not resume session {}: {}", session_id, e),
            }
        }

        info!("Recovered {} sessions", recoveries.len());
        recoveries
    }

    /// Wait until a session reaches a terminal state, or `limit` elapses
    pub async fn wait_until_settled(&self, session_id: &str, limit: Duration) -> Option<SessionState> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let state = self.machine.current_state(session_id).await?;
            let running = self.pipelines().contains_key(session_id);
            if state.is_terminal() && !running {
                return Some(state);
            }
            if tokio::time::Instant::now() >= deadline {
                return Some(state);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop timers and pipelines; interrupted sessions resume on the next `recover`
    pub async fn shutdown(&self) {
        for (_, token) in self.timers().drain() {
            token.cancel();
        }

        let tasks: Vec<PipelineTask> = self.pipelines().drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        for task in tasks {
            let _ = task.handle.await;
        }
    }
}

#[async_trait::async_trait]
impl Remediation for Orchestrator {
    async fn engine_stale(&self, detail: &str) {
        match self.engine.restart().await {
            Ok(()) => {
                info!("Recording engine restarted after going stale");
                return;
            }
            Err(e) => error!(target: "health", "Engine restart failed: {}", e),
        }

        for session_id in self.machine.sessions_in(SessionState::Recording).await {
            self.cancel_timer(&session_id);
            let moved = self
                .machine
                .transition_from(
                    &session_id,
                    SessionState::Recording,
                    SessionState::Finalizing,
                    TransitionCause::ComponentStale {
                        component: Component::EngineAdapter,
                    },
                )
                .await;
            if !matches!(moved, Ok(true)) {
                continue;
            }

            let reason = format!("engine stale: {detail}");
            match self.engine.force_finalize(&session_id, &reason).await {
                Ok(report) => {
                    if let Err(e) = self.finalize(&session_id, report).await {
                        warn!("Could not publish salvaged session {}: {}", session_id, e);
                    }
                }
                Err(e) => {
                    error!("Nothing salvaged for {}: {}", session_id, e);
                    self.fail(&session_id, &e.to_string()).await;
                }
            }
        }
    }

    async fn runner_stale(&self, detail: &str) {
        for session_id in self.machine.sessions_in(SessionState::Publishing).await {
            let moved = self
                .machine
                .transition_from(
                    &session_id,
                    SessionState::Publishing,
                    SessionState::Failed,
                    TransitionCause::ComponentStale {
                        component: Component::StageRunner,
                    },
                )
                .await;
            if !matches!(moved, Ok(true)) {
                continue;
            }

            if let Some(task) = self.pipelines().remove(&session_id) {
                task.cancel.cancel();
            }
            let error = format!("{} stale: {}", Component::StageRunner, detail);
            if let Err(e) = self.machine.fail_pending_stages(&session_id, &error).await {
                warn!("Could not fail stages of {}: {}", session_id, e);
            }
        }
    }
}

/// Recording file name: start time plus a short session suffix
fn file_stem(session_id: &str, at: DateTime<Utc>) -> String {
    let suffix: String = session_id
        .trim_start_matches("session-")
        .chars()
        .take(8)
        .collect();
    format!("{}-{}", at.format("%Y-%m-%d_%H-%M-%S"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_stem() {
        let at = Utc.with_ymd_and_hms(2025, 10, 28, 14, 30, 0).unwrap();
        assert_eq!(
            file_stem("session-ab12cd34-0000-4000-8000-000000000000", at),
            "2025-10-28_14-30-00-ab12cd34"
        );
    }
}
