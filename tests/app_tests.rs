// Wiring tests: a node assembled from configuration runs a session end to end

mod common;

use anyhow::Result;
use chrono::Utc;
use common::{FakeEngine, FakeTargets};
use std::sync::Arc;
use std::time::Duration;
use studio_node::config::TargetsConfig;
use studio_node::session::{EventSink, JsonlEventLog};
use studio_node::{targets_from_config, App, Config, SessionState, VoiceActivity};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn test_config(dir: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.recording.output_dir = dir.path().join("recordings");
    cfg.pipeline.transcripts_dir = dir.path().join("transcripts");
    cfg.pipeline.defaults.backoff_base_ms = Some(1);
    cfg.pipeline.defaults.backoff_cap_ms = Some(5);
    cfg.events.log_path = dir.path().join("state/transitions.jsonl");
    cfg
}

#[tokio::test]
async fn test_configured_node_archives_session() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let cfg = test_config(&temp_dir);

    let log = Arc::new(JsonlEventLog::open(&cfg.events.log_path).await?);
    let sinks: Vec<Arc<dyn EventSink>> = vec![log];
    let app = App::build(&cfg, FakeEngine::new(), FakeTargets::healthy().targets(), sinks)?;

    let cancel = CancellationToken::new();
    let supervisor = Arc::clone(&app.supervisor).spawn(cancel.clone());

    let armed = app
        .orchestrator
        .on_voice_activity(VoiceActivity {
            channel_id: "general".to_string(),
            timestamp: Utc::now(),
        })
        .await?;
    app.orchestrator.stop(&armed.session_id).await?;

    let state = app
        .orchestrator
        .wait_until_settled(&armed.session_id, Duration::from_secs(5))
        .await;
    assert_eq!(state, Some(SessionState::Archived));

    cancel.cancel();
    supervisor.await?;
    app.orchestrator.shutdown().await;

    // Verify: the persisted log replays to the same terminal state
    let events = JsonlEventLog::load(&cfg.events.log_path).await?;
    assert_eq!(events.len(), 5);
    assert_eq!(events.last().unwrap().to, SessionState::Archived);

    Ok(())
}

#[tokio::test]
async fn test_unconfigured_targets_fail_the_session() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let cfg = test_config(&temp_dir);

    let targets = targets_from_config(&TargetsConfig::default())?;
    assert!(targets.transcriber.is_none());
    assert!(targets.video_host.is_none());
    assert!(targets.source_repo.is_none());
    assert!(targets.cold_storage.is_none());

    let app = App::build(&cfg, FakeEngine::new(), targets, Vec::new())?;
    let armed = app
        .orchestrator
        .on_voice_activity(VoiceActivity {
            channel_id: "general".to_string(),
            timestamp: Utc::now(),
        })
        .await?;
    app.orchestrator.stop(&armed.session_id).await?;

    let state = app
        .orchestrator
        .wait_until_settled(&armed.session_id, Duration::from_secs(5))
        .await;
    assert_eq!(state, Some(SessionState::Failed), "video-publish is required");

    let snapshot = app.orchestrator.get_session(&armed.session_id).await.unwrap();
    for result in &snapshot.stage_results {
        assert!(result.attempts <= 1, "{} should not retry", result.stage);
    }

    Ok(())
}
