use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Components observed by the health supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    EngineAdapter,
    SessionMachine,
    StageRunner,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::EngineAdapter,
        Component::SessionMachine,
        Component::StageRunner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::EngineAdapter => "engine-adapter",
            Component::SessionMachine => "session-machine",
            Component::StageRunner => "stage-runner",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness classification of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Heartbeat within threshold and last probe passed
    Healthy,
    /// Heartbeat within threshold but the last probe failed
    Degraded,
    /// No heartbeat within threshold
    Dead,
}

/// Point-in-time health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub component: Component,

    /// Wall-clock time of the last heartbeat
    pub last_heartbeat: DateTime<Utc>,

    pub status: ComponentStatus,

    /// Last probe failure or intervention note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
