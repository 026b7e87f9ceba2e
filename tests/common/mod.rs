// Shared fakes for integration tests
//
// FakeEngine writes a small media file on start so artifacts can be probed;
// the fake targets count calls and fail a configurable number of times.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use studio_node::engine::{
    AdapterSettings, CaptureConfig, EngineAdapter, EngineStatus, RecordingEngine,
};
use studio_node::error::{EngineError, StageError};
use studio_node::health::{HealthSupervisor, HealthThresholds, Probe};
use studio_node::pipeline::{Backoff, Stage, StageInput, StageOutput, StagePolicy, StageRunner, StageSpec};
use studio_node::registry::Registry;
use studio_node::session::SessionMachine;
use studio_node::stages::{
    build_stage_set, default_specs, ColdStorage, RepoFile, SourceRepo, StageOptions, Targets, Transcriber,
    Transcript, VideoHost, VideoUpload,
};
use studio_node::{Orchestrator, OrchestratorSettings};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
pub struct FakeEngine {
    pub fail_start: AtomicBool,
    pub hang_on_start: AtomicBool,
    pub capture_error: AtomicBool,
    pub hang_on_stop: AtomicBool,
    pub fail_stop: AtomicBool,
    pub ping_fails: AtomicBool,
    pub restart_fails: AtomicBool,
    pub starts: AtomicUsize,
    captures: Mutex<HashMap<String, PathBuf>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn active(&self) -> usize {
        self.captures.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl RecordingEngine for FakeEngine {
    async fn start(&self, session_id: &str, config: &CaptureConfig) -> Result<PathBuf, EngineError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("obs websocket refused".to_string()));
        }
        if self.hang_on_start.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let path = config.output_path();
        std::fs::create_dir_all(&config.output_dir).unwrap();
        std::fs::write(&path, b"not really a matroska file").unwrap();
        self.captures.lock().unwrap().insert(session_id.to_string(), path.clone());
        Ok(path)
    }

    async fn stop(&self, session_id: &str) -> Result<(), EngineError> {
        if self.hang_on_stop.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("stop request rejected".to_string()));
        }
        self.captures
            .lock()
            .unwrap()
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NoActiveRecording(session_id.to_string()))
    }

    async fn abort(&self, session_id: &str) -> Result<(), EngineError> {
        self.captures.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn status(&self, session_id: &str) -> EngineStatus {
        if !self.captures.lock().unwrap().contains_key(session_id) {
            EngineStatus::Idle
        } else if self.capture_error.load(Ordering::SeqCst) {
            EngineStatus::Error
        } else {
            EngineStatus::Recording
        }
    }

    async fn ping(&self) -> Result<(), EngineError> {
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("no response".to_string()));
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), EngineError> {
        if self.restart_fails.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("restart failed".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Tracks how many attempts run at once
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Succeed(String),
    Fail(String),
    /// Wait until cancelled
    Hang,
}

/// Stage that plays back a script of outcomes, then repeats `fallback`
pub struct ScriptedStage {
    name: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Duration,
    pub calls: AtomicU32,
    gauge: Arc<Gauge>,
}

impl ScriptedStage {
    pub fn new(name: &str, fallback: Step) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            gauge: Arc::new(Gauge::default()),
        }
    }

    pub fn succeeding(name: &str) -> Self {
        Self::new(name, Step::Succeed(format!("{name}-ok")))
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self::new(name, Step::Fail(error.to_string()))
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = gauge;
        self
    }
}

#[async_trait::async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &StageInput, cancel: CancellationToken) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        self.gauge.enter();
        let outcome = async {
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = cancel.cancelled() => return Err(StageError::Cancelled),
                }
            }
            match step {
                Step::Succeed(reference) => Ok(StageOutput::new(reference)),
                Step::Fail(error) => Err(StageError::failed(error)),
                Step::Hang => {
                    cancel.cancelled().await;
                    Err(StageError::Cancelled)
                }
            }
        }
        .await;
        self.gauge.exit();
        outcome
    }
}

/// Policy with millisecond backoff so retry tests run fast
pub fn fast_policy(max_attempts: u32, required: bool) -> StagePolicy {
    StagePolicy::default()
        .with_attempts(max_attempts)
        .required(required)
        .with_timeout(Duration::from_secs(5))
        .with_backoff(Backoff {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            jitter: 0.0,
        })
}

// ============================================================================
// Publish targets
// ============================================================================

/// Fails the first `failures` calls (u32::MAX = always), then succeeds
pub struct FakeTarget {
    failures: AtomicU32,
    pub calls: AtomicU32,
    pub committed: Mutex<Vec<RepoFile>>,
    delay: Duration,
    gauge: Arc<Gauge>,
}

impl FakeTarget {
    pub fn new(failures: u32) -> Arc<Self> {
        Self::slow(failures, Duration::ZERO)
    }

    pub fn slow(failures: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            committed: Mutex::new(Vec::new()),
            delay,
            gauge: Arc::new(Gauge::default()),
        })
    }

    /// Slow target that reports its calls to a shared gauge
    pub fn gauged(delay: Duration, gauge: Arc<Gauge>) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            committed: Mutex::new(Vec::new()),
            delay,
            gauge,
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(u32::MAX)
    }

    async fn call(&self, what: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            self.gauge.enter();
            tokio::time::sleep(self.delay).await;
            self.gauge.exit();
        }
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            if left != u32::MAX {
                self.failures.store(left - 1, Ordering::SeqCst);
            }
            bail!("{what} unavailable (HTTP 503)");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transcriber for FakeTarget {
    fn name(&self) -> &str {
        "fake-transcriber"
    }

    async fn transcribe(&self, _media: &Path) -> Result<Transcript> {
        self.call("transcriber").await?;
        Ok(Transcript {
            text: "hello and welcome to the show".to_string(),
            confidence: Some(0.9),
        })
    }
}

#[async_trait::async_trait]
impl VideoHost for FakeTarget {
    fn name(&self) -> &str {
        "fake-video-host"
    }

    async fn upload(&self, _media: &Path, _upload: &VideoUpload) -> Result<String> {
        self.call("video host").await?;
        Ok("dQw4w9WgXcQ".to_string())
    }
}

#[async_trait::async_trait]
impl SourceRepo for FakeTarget {
    fn name(&self) -> &str {
        "fake-repo"
    }

    async fn commit(&self, files: &[RepoFile], _message: &str) -> Result<String> {
        self.call("repository").await?;
        self.committed.lock().unwrap().extend(files.iter().cloned());
        Ok("abc1234".to_string())
    }
}

#[async_trait::async_trait]
impl ColdStorage for FakeTarget {
    fn name(&self) -> &str {
        "fake-storage"
    }

    async fn put(&self, _media: &Path, key: &str) -> Result<String> {
        self.call("cold storage").await?;
        Ok(format!("cold:{key}"))
    }
}

pub struct FakeTargets {
    pub transcriber: Arc<FakeTarget>,
    pub video: Arc<FakeTarget>,
    pub repo: Arc<FakeTarget>,
    pub storage: Arc<FakeTarget>,
}

impl FakeTargets {
    pub fn healthy() -> Self {
        Self {
            transcriber: FakeTarget::new(0),
            video: FakeTarget::new(0),
            repo: FakeTarget::new(0),
            storage: FakeTarget::new(0),
        }
    }

    pub fn targets(&self) -> Targets {
        Targets {
            transcriber: Some(self.transcriber.clone()),
            video_host: Some(self.video.clone()),
            source_repo: Some(self.repo.clone()),
            cold_storage: Some(self.storage.clone()),
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<Registry>,
    pub engine: Arc<FakeEngine>,
    pub supervisor: HealthSupervisor,
    pub dir: TempDir,
}

pub struct HarnessOptions {
    pub stop_timeout: Duration,
    pub max_duration: Option<Duration>,
    pub ceiling: usize,
    pub max_attempts: u32,
    pub thresholds: HealthThresholds,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(2),
            max_duration: None,
            ceiling: 4,
            max_attempts: 3,
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Orchestrator over the real publish stages with fake targets
pub fn harness(engine: Arc<FakeEngine>, targets: Targets, options: HarnessOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(options.ceiling);

    let machine = Arc::new(SessionMachine::new(Arc::clone(&registry), Vec::new()));
    let adapter = Arc::new(EngineAdapter::new(
        engine.clone(),
        AdapterSettings {
            start_timeout: Duration::from_millis(300),
            stop_timeout: options.stop_timeout,
            abort_timeout: Duration::from_millis(200),
            restart_timeout: Duration::from_millis(200),
            max_active: 4,
        },
        Arc::clone(&registry),
    ));
    let runner = Arc::new(StageRunner::new(Arc::clone(&registry)));

    let specs: Vec<StageSpec> = default_specs()
        .into_iter()
        .map(|mut spec| {
            spec.policy = fast_policy(options.max_attempts, spec.policy.required);
            spec
        })
        .collect();
    let stages = build_stage_set(
        specs,
        targets,
        StageOptions {
            transcripts_dir: dir.path().join("transcripts"),
            privacy: "unlisted".to_string(),
        },
    )
    .unwrap();

    let orchestrator = Orchestrator::new(
        Arc::clone(&machine),
        Arc::clone(&adapter),
        Arc::clone(&runner),
        Arc::new(stages),
        Arc::clone(&registry),
        OrchestratorSettings {
            capture_dir: dir.path().join("recordings"),
            extension: "mkv".to_string(),
            max_duration: options.max_duration,
        },
    );

    let probes: Vec<Arc<dyn Probe>> = vec![adapter, machine, runner];
    let supervisor = HealthSupervisor::new(
        Arc::clone(&registry),
        probes,
        options.thresholds,
        orchestrator.clone(),
        Duration::from_millis(10),
    );

    Harness {
        orchestrator,
        registry,
        engine,
        supervisor,
        dir,
    }
}
