//! Component health
//!
//! Heartbeats live in the [`Registry`](crate::registry::Registry); the
//! supervisor polls component probes and applies interventions.

mod record;
mod supervisor;

pub use record::{Component, ComponentStatus, HealthRecord};
pub use supervisor::{HealthSupervisor, HealthThresholds, Remediation};

/// Liveness check for one component
///
/// A passing probe counts as a heartbeat.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    fn component(&self) -> Component;

    async fn probe(&self) -> Result<(), String>;
}
