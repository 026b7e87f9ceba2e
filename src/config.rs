use crate::engine::{AdapterSettings, ProcessEngineConfig};
use crate::health::HealthThresholds;
use crate::orchestrator::OrchestratorSettings;
use crate::pipeline::{StagePolicy, StageSpec};
use crate::providers::{CommandSpec, GitHubConfig};
use crate::stages::{default_specs, StageOptions};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    pub pipeline: PipelineConfig,
    pub health: HealthConfig,
    pub targets: TargetsConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "studio-node".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub extension: String,

    /// Auto-stop after this many seconds; 0 disables
    pub max_duration_secs: u64,

    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub abort_timeout_secs: u64,
    pub restart_timeout_secs: u64,
    pub max_active: usize,

    pub engine: ProcessEngineConfig,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let adapter = AdapterSettings::default();
        Self {
            output_dir: PathBuf::from("recordings"),
            extension: "mkv".to_string(),
            max_duration_secs: 0,
            start_timeout_secs: adapter.start_timeout.as_secs(),
            stop_timeout_secs: adapter.stop_timeout.as_secs(),
            abort_timeout_secs: adapter.abort_timeout.as_secs(),
            restart_timeout_secs: adapter.restart_timeout.as_secs(),
            max_active: adapter.max_active,
            engine: ProcessEngineConfig::default(),
        }
    }
}

/// Retry settings; unset fields fall back to the pipeline defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub jitter: Option<f64>,
    pub attempt_timeout_secs: Option<u64>,
    pub required: Option<bool>,
}

impl PolicyConfig {
    fn apply(&self, mut policy: StagePolicy) -> StagePolicy {
        if let Some(n) = self.max_attempts {
            policy = policy.with_attempts(n);
        }
        if let Some(ms) = self.backoff_base_ms {
            policy.backoff.base = Duration::from_millis(ms);
        }
        if let Some(ms) = self.backoff_cap_ms {
            policy.backoff.cap = Duration::from_millis(ms);
        }
        if let Some(jitter) = self.jitter {
            policy.backoff.jitter = jitter.clamp(0.0, 1.0);
        }
        if let Some(secs) = self.attempt_timeout_secs {
            policy.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(required) = self.required {
            policy.required = required;
        }
        policy
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stage attempts running at once, across all sessions
    pub max_concurrent_stages: usize,

    pub transcripts_dir: PathBuf,
    pub video_privacy: String,

    /// Applied to every stage before per-stage overrides
    pub defaults: PolicyConfig,

    /// Per-stage overrides, keyed by stage name
    pub stages: HashMap<String, PolicyConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 4,
            transcripts_dir: PathBuf::from("transcripts"),
            video_privacy: "private".to_string(),
            defaults: PolicyConfig::default(),
            stages: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub poll_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub engine_stale_secs: u64,
    pub machine_stale_secs: u64,
    pub runner_stale_secs: u64,
    pub stage_stale_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let thresholds = HealthThresholds::default();
        Self {
            poll_interval_secs: 30,
            probe_timeout_secs: thresholds.probe_timeout.as_secs(),
            engine_stale_secs: thresholds.engine_stale.as_secs(),
            machine_stale_secs: thresholds.machine_stale.as_secs(),
            runner_stale_secs: thresholds.runner_stale.as_secs(),
            stage_stale_secs: thresholds.stage_stale.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RcloneConfig {
    /// rclone remote name; cold backup is unconfigured when empty
    pub remote: String,
    pub program: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    pub transcriber: CommandSpec,
    pub video_host: CommandSpec,
    pub github: GitHubConfig,
    pub rclone: RcloneConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// JSON-lines transition log, replayed by `--recover`
    pub log_path: PathBuf,

    /// Publish transitions to NATS when set
    pub nats_url: Option<String>,
    pub subject_prefix: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("state/transitions.jsonl"),
            nats_url: None,
            subject_prefix: "studio.session".to_string(),
        }
    }
}

impl Config {
    /// Load from a TOML file (optional) with `STUDIO__SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("STUDIO")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config from {path}"))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            start_timeout: Duration::from_secs(self.recording.start_timeout_secs),
            stop_timeout: Duration::from_secs(self.recording.stop_timeout_secs),
            abort_timeout: Duration::from_secs(self.recording.abort_timeout_secs),
            restart_timeout: Duration::from_secs(self.recording.restart_timeout_secs),
            max_active: self.recording.max_active.max(1),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            capture_dir: self.recording.output_dir.clone(),
            extension: self.recording.extension.clone(),
            max_duration: (self.recording.max_duration_secs > 0)
                .then(|| Duration::from_secs(self.recording.max_duration_secs)),
        }
    }

    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            engine_stale: Duration::from_secs(self.health.engine_stale_secs),
            machine_stale: Duration::from_secs(self.health.machine_stale_secs),
            runner_stale: Duration::from_secs(self.health.runner_stale_secs),
            stage_stale: Duration::from_secs(self.health.stage_stale_secs),
            probe_timeout: Duration::from_secs(self.health.probe_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.health.poll_interval_secs.max(1))
    }

    pub fn stage_options(&self) -> StageOptions {
        StageOptions {
            transcripts_dir: self.pipeline.transcripts_dir.clone(),
            privacy: self.pipeline.video_privacy.clone(),
        }
    }

    /// The publish graph with configured policies applied
    pub fn stage_specs(&self) -> Vec<StageSpec> {
        default_specs()
            .into_iter()
            .map(|mut spec| {
                spec.policy = self.pipeline.defaults.apply(spec.policy);
                if let Some(over) = self.pipeline.stages.get(&spec.name) {
                    spec.policy = over.apply(spec.policy);
                }
                spec
            })
            .collect()
    }
}
