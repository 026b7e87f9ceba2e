//! Component wiring shared by the binary and integration tests

use crate::config::{Config, TargetsConfig};
use crate::engine::{EngineAdapter, RecordingEngine};
use crate::health::{HealthSupervisor, Probe};
use crate::orchestrator::Orchestrator;
use crate::pipeline::StageRunner;
use crate::providers::{CommandTranscriber, CommandVideoHost, GitHubRepo, RcloneStorage};
use crate::registry::Registry;
use crate::session::{EventSink, SessionMachine};
use crate::stages::{build_stage_set, Targets};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// A fully wired node
pub struct App {
    pub registry: Arc<Registry>,
    pub orchestrator: Arc<Orchestrator>,
    pub supervisor: Arc<HealthSupervisor>,
}

impl App {
    pub fn build(
        cfg: &Config,
        engine: Arc<dyn RecordingEngine>,
        targets: Targets,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Result<Self> {
        let registry = Registry::new(cfg.pipeline.max_concurrent_stages);

        let machine = Arc::new(SessionMachine::new(Arc::clone(&registry), sinks));
        let adapter = Arc::new(EngineAdapter::new(
            engine,
            cfg.adapter_settings(),
            Arc::clone(&registry),
        ));
        let runner = Arc::new(StageRunner::new(Arc::clone(&registry)));
        let stages = build_stage_set(cfg.stage_specs(), targets, cfg.stage_options())
            .context("Invalid stage graph")?;

        let orchestrator = Orchestrator::new(
            Arc::clone(&machine),
            Arc::clone(&adapter),
            Arc::clone(&runner),
            Arc::new(stages),
            Arc::clone(&registry),
            cfg.orchestrator_settings(),
        );

        let probes: Vec<Arc<dyn Probe>> = vec![adapter, machine, runner];
        let supervisor = Arc::new(HealthSupervisor::new(
            Arc::clone(&registry),
            probes,
            cfg.thresholds(),
            orchestrator.clone(),
            cfg.poll_interval(),
        ));

        Ok(Self {
            registry,
            orchestrator,
            supervisor,
        })
    }
}

/// Instantiate the configured publish targets; unconfigured ones stay `None`
pub fn targets_from_config(cfg: &TargetsConfig) -> Result<Targets> {
    let mut targets = Targets::default();

    if cfg.transcriber.is_configured() {
        info!("Transcriber: {}", cfg.transcriber.program);
        targets.transcriber = Some(Arc::new(CommandTranscriber::new(cfg.transcriber.clone())));
    } else {
        warn!("No transcriber configured; transcribe stage will fail");
    }

    if cfg.video_host.is_configured() {
        info!("Video host: {}", cfg.video_host.program);
        targets.video_host = Some(Arc::new(CommandVideoHost::new(cfg.video_host.clone())));
    } else {
        warn!("No video host configured; sessions cannot archive");
    }

    if cfg.github.is_configured() {
        info!("GitHub repository: {}", cfg.github.repo);
        targets.source_repo = Some(Arc::new(GitHubRepo::new(cfg.github.clone())?));
    } else {
        warn!("GitHub credentials not configured");
    }

    if !cfg.rclone.remote.is_empty() {
        info!("Cold storage: rclone remote {}", cfg.rclone.remote);
        let mut storage = RcloneStorage::new(cfg.rclone.remote.clone()).with_args(cfg.rclone.args.clone());
        if let Some(program) = &cfg.rclone.program {
            storage = storage.with_program(program.clone());
        }
        targets.cold_storage = Some(Arc::new(storage));
    }

    Ok(targets)
}
