use super::record::{Component, ComponentStatus, HealthRecord};
use super::Probe;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Staleness thresholds, per component
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub engine_stale: Duration,
    pub machine_stale: Duration,
    pub runner_stale: Duration,

    /// A single stage attempt running longer than this is cancelled
    pub stage_stale: Duration,

    /// Bound on each probe call
    pub probe_timeout: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            engine_stale: Duration::from_secs(90),
            machine_stale: Duration::from_secs(300),
            runner_stale: Duration::from_secs(1800),
            stage_stale: Duration::from_secs(900),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl HealthThresholds {
    pub fn for_component(&self, component: Component) -> Duration {
        match component {
            Component::EngineAdapter => self.engine_stale,
            Component::SessionMachine => self.machine_stale,
            Component::StageRunner => self.runner_stale,
        }
    }
}

/// Interventions applied when a component is found dead
#[async_trait::async_trait]
pub trait Remediation: Send + Sync {
    /// Engine stopped responding: restart it, or salvage recording sessions
    async fn engine_stale(&self, detail: &str);

    /// Runner stopped making progress: fail sessions stuck in publishing
    async fn runner_stale(&self, detail: &str);
}

/// Periodic liveness checker
pub struct HealthSupervisor {
    registry: Arc<Registry>,
    probes: Vec<Arc<dyn Probe>>,
    thresholds: HealthThresholds,
    remediation: Arc<dyn Remediation>,
    poll_interval: Duration,
}

impl HealthSupervisor {
    pub fn new(
        registry: Arc<Registry>,
        probes: Vec<Arc<dyn Probe>>,
        thresholds: HealthThresholds,
        remediation: Arc<dyn Remediation>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            probes,
            thresholds,
            remediation,
            poll_interval,
        }
    }

    /// Run one round of probes, status updates and interventions
    pub async fn poll_once(&self) -> Vec<HealthRecord> {
        for probe in &self.probes {
            let component = probe.component();

            let probe_result = match tokio::time::timeout(self.thresholds.probe_timeout, probe.probe()).await {
                Ok(result) => result,
                Err(_) => Err(format!(
                    "probe did not answer within {:?}",
                    self.thresholds.probe_timeout
                )),
            };

            let idle = self.registry.idle_for(component);
            let threshold = self.thresholds.for_component(component);
            let (status, detail) = if idle > threshold {
                let reason = probe_result.err().unwrap_or_else(|| "no heartbeat".to_string());
                (
                    ComponentStatus::Dead,
                    Some(format!("silent for {idle:?} (threshold {threshold:?}): {reason}")),
                )
            } else {
                match probe_result {
                    Ok(()) => (ComponentStatus::Healthy, None),
                    Err(e) => (ComponentStatus::Degraded, Some(e)),
                }
            };

            let previous = self.registry.status(component);
            if previous != Some(status) {
                match status {
                    ComponentStatus::Healthy => info!(target: "health", "{} recovered", component),
                    ComponentStatus::Degraded => warn!(
                        target: "health",
                        "{} degraded: {}",
                        component,
                        detail.as_deref().unwrap_or_default()
                    ),
                    ComponentStatus::Dead => error!(
                        target: "health",
                        "{} is stale: {}",
                        component,
                        detail.as_deref().unwrap_or_default()
                    ),
                }
            }
            self.registry.set_status(component, status, detail.clone());

            if status == ComponentStatus::Dead {
                let detail = detail.unwrap_or_default();
                match component {
                    Component::EngineAdapter => self.remediation.engine_stale(&detail).await,
                    Component::StageRunner => self.remediation.runner_stale(&detail).await,
                    Component::SessionMachine => {}
                }
            }
        }

        for attempt in self.registry.stale_attempts(self.thresholds.stage_stale) {
            error!(
                target: "health",
                "{}/{} attempt {} running for {:?}, cancelling",
                attempt.session_id,
                attempt.stage,
                attempt.attempt,
                attempt.started.elapsed()
            );
            attempt.cancel.cancel();
        }

        self.registry.health()
    }

    /// Poll on a fixed interval until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!("Health supervisor polling every {:?}", self.poll_interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Health supervisor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let records = self.poll_once().await;
                        debug!("Health: {:?}", records.iter().map(|r| (r.component, r.status)).collect::<Vec<_>>());
                    }
                }
            }
        })
    }
}
