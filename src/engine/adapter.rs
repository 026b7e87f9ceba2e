use super::artifact::{probe_artifact, Artifact};
use super::backend::{CaptureConfig, EngineHandle, EngineStatus, RecordingEngine};
use crate::error::{EngineError, SessionWarning};
use crate::health::{Component, Probe};
use crate::registry::Registry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Timeouts and limits for the engine adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// How long `start` waits for the engine to begin capturing
    pub start_timeout: Duration,

    /// How long `stop` waits for the engine to confirm finalization
    pub stop_timeout: Duration,

    /// Bound on the forced stop issued after a failed graceful stop
    pub abort_timeout: Duration,

    /// Bound on an engine restart requested by the supervisor
    pub restart_timeout: Duration,

    /// Captures the engine can run at once
    pub max_active: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(30),
            abort_timeout: Duration::from_secs(5),
            restart_timeout: Duration::from_secs(15),
            max_active: 1, // OBS-style engines capture one thing at a time
        }
    }
}

/// Result of stopping a capture
#[derive(Debug, Clone)]
pub struct StopReport {
    pub artifact: Artifact,

    /// Set when the artifact may be truncated
    pub warning: Option<SessionWarning>,
}

#[derive(Default)]
struct Captures {
    /// Active captures (session_id → handle)
    active: HashMap<String, EngineHandle>,

    /// Sessions whose engine start is in flight
    starting: HashSet<String>,
}

/// Frees a start reservation unless the start completed
struct Reservation<'a> {
    captures: &'a Mutex<Captures>,
    session_id: &'a str,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(self.captures).starting.remove(self.session_id);
    }
}

fn lock(captures: &Mutex<Captures>) -> MutexGuard<'_, Captures> {
    captures.lock().unwrap_or_else(|p| p.into_inner())
}

/// Idempotent, timeout-bounded front for a [`RecordingEngine`]
///
/// The capture table is never locked across an engine call, so a hung
/// engine request for one session cannot stall another.
pub struct EngineAdapter {
    engine: Arc<dyn RecordingEngine>,
    settings: AdapterSettings,
    captures: Mutex<Captures>,
    registry: Arc<Registry>,
}

impl EngineAdapter {
    pub fn new(
        engine: Arc<dyn RecordingEngine>,
        settings: AdapterSettings,
        registry: Arc<Registry>,
    ) -> Self {
        info!(
            "Engine adapter ready: {} (stop timeout {:?}, max active {})",
            engine.name(),
            settings.stop_timeout,
            settings.max_active
        );

        Self {
            engine,
            settings,
            captures: Mutex::new(Captures::default()),
            registry,
        }
    }

    fn captures(&self) -> MutexGuard<'_, Captures> {
        lock(&self.captures)
    }

    fn take(&self, session_id: &str) -> Option<EngineHandle> {
        self.captures().active.remove(session_id)
    }

    /// Start capturing for a session
    ///
    /// A second call with the same session id returns the existing handle.
    pub async fn start(
        &self,
        session_id: &str,
        config: &CaptureConfig,
    ) -> Result<EngineHandle, EngineError> {
        let reservation = {
            let mut captures = self.captures();

            if let Some(existing) = captures.active.get(session_id) {
                info!("Session {} already recording, reusing handle", session_id);
                return Ok(existing.clone());
            }
            if captures.starting.contains(session_id) {
                return Err(EngineError::Unavailable(format!(
                    "start for session {session_id} already in progress"
                )));
            }

            if captures.active.len() + captures.starting.len() >= self.settings.max_active {
                let busy = captures
                    .active
                    .keys()
                    .chain(captures.starting.iter())
                    .next()
                    .cloned()
                    .unwrap_or_default();
                warn!(
                    "Engine busy with session {}, refusing start for {}",
                    busy, session_id
                );
                return Err(EngineError::AlreadyRecording(busy));
            }

            captures.starting.insert(session_id.to_string());
            Reservation {
                captures: &self.captures,
                session_id,
            }
        };

        let output_path = match timeout(self.settings.start_timeout, self.engine.start(session_id, config)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Engine did not start session {} within {:?}",
                    session_id, self.settings.start_timeout
                );
                self.force_stop(session_id).await;
                return Err(EngineError::Unavailable(format!(
                    "start did not complete within {:?}",
                    self.settings.start_timeout
                )));
            }
        };
        self.registry.beat(Component::EngineAdapter);

        let handle = EngineHandle {
            session_id: session_id.to_string(),
            output_path,
            started_at: Utc::now(),
        };
        {
            let mut captures = self.captures();
            captures.starting.remove(session_id);
            captures.active.insert(session_id.to_string(), handle.clone());
        }
        drop(reservation);

        info!(
            "Recording started for session {} → {}",
            session_id,
            handle.output_path.display()
        );

        Ok(handle)
    }

    /// Stop a capture and produce its artifact
    ///
    /// Waits up to `stop_timeout` for the engine to finalize. If it does not,
    /// the capture is force-stopped and whatever was written is returned as a
    /// partial artifact with a warning.
    pub async fn stop(&self, handle: &EngineHandle) -> Result<StopReport, EngineError> {
        let handle = self
            .take(&handle.session_id)
            .ok_or_else(|| EngineError::NoActiveRecording(handle.session_id.clone()))?;

        info!("Stopping recording for session {}", handle.session_id);

        let warning = match timeout(self.settings.stop_timeout, self.engine.stop(&handle.session_id)).await
        {
            Ok(Ok(())) => {
                self.registry.beat(Component::EngineAdapter);
                None
            }
            Ok(Err(e)) => {
                warn!("Engine failed to stop session {}: {}", handle.session_id, e);
                self.force_stop(&handle.session_id).await;
                Some(SessionWarning::PartialArtifact {
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    "Engine did not finalize session {} within {:?}",
                    handle.session_id, self.settings.stop_timeout
                );
                self.force_stop(&handle.session_id).await;
                Some(SessionWarning::PartialArtifact {
                    reason: format!(
                        "engine did not finalize within {:?}",
                        self.settings.stop_timeout
                    ),
                })
            }
        };

        let partial = warning.is_some();
        match self.build_artifact(&handle, partial).await {
            Ok(artifact) => Ok(StopReport { artifact, warning }),
            Err(e) if partial => {
                error!("No media captured for session {}: {:#}", handle.session_id, e);
                Err(EngineError::StopTimeout(self.settings.stop_timeout))
            }
            Err(e) => Err(EngineError::Unavailable(format!(
                "engine finalized session {} but produced no media: {:#}",
                handle.session_id, e
            ))),
        }
    }

    /// Finalize without waiting on the engine (supervisor path)
    pub async fn force_finalize(&self, session_id: &str, reason: &str) -> Result<StopReport, EngineError> {
        let handle = self
            .take(session_id)
            .ok_or_else(|| EngineError::NoActiveRecording(session_id.to_string()))?;

        warn!("Force-finalizing session {}: {}", session_id, reason);
        self.force_stop(session_id).await;

        let artifact = self.build_artifact(&handle, true).await.map_err(|e| {
            EngineError::Unavailable(format!("no media captured for {}: {:#}", session_id, e))
        })?;

        Ok(StopReport {
            artifact,
            warning: Some(SessionWarning::PartialArtifact {
                reason: reason.to_string(),
            }),
        })
    }

    /// Drop a capture without producing an artifact (operator abort)
    pub async fn discard(&self, session_id: &str) {
        if self.take(session_id).is_some() {
            self.force_stop(session_id).await;
        }
    }

    /// What the engine reports for a capture
    pub async fn status(&self, handle: &EngineHandle) -> EngineStatus {
        self.engine.status(&handle.session_id).await
    }

    /// Restart the underlying recording process, bounded by `restart_timeout`
    pub async fn restart(&self) -> Result<(), EngineError> {
        info!("Restarting recording engine {}", self.engine.name());

        match timeout(self.settings.restart_timeout, self.engine.restart()).await {
            Ok(Ok(())) => {
                self.registry.beat(Component::EngineAdapter);
                info!("Recording engine restarted");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Unavailable(format!(
                "restart did not complete within {:?}",
                self.settings.restart_timeout
            ))),
        }
    }

    /// Sessions with an active capture
    pub async fn active_sessions(&self) -> Vec<String> {
        self.captures().active.keys().cloned().collect()
    }

    async fn force_stop(&self, session_id: &str) {
        match timeout(self.settings.abort_timeout, self.engine.abort(session_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Forced stop of session {} failed: {}", session_id, e),
            Err(_) => warn!(
                "Forced stop of session {} did not complete within {:?}",
                session_id, self.settings.abort_timeout
            ),
        }
    }

    async fn build_artifact(&self, handle: &EngineHandle, partial: bool) -> anyhow::Result<Artifact> {
        let path = handle.output_path.clone();
        let started_at = handle.started_at;
        let ended_at = Utc::now();

        tokio::task::spawn_blocking(move || probe_artifact(&path, started_at, ended_at, partial))
            .await?
    }
}

#[async_trait::async_trait]
impl Probe for EngineAdapter {
    fn component(&self) -> Component {
        Component::EngineAdapter
    }

    async fn probe(&self) -> Result<(), String> {
        self.engine.ping().await.map_err(|e| e.to_string())?;

        let handles: Vec<EngineHandle> = self.captures().active.values().cloned().collect();
        for handle in &handles {
            if self.status(handle).await == EngineStatus::Error {
                return Err(format!("capture for session {} reported an error", handle.session_id));
            }
        }

        self.registry.beat(Component::EngineAdapter);
        Ok(())
    }
}
