// Engine adapter integration tests
//
// Drives the adapter against a fake engine: idempotent start, the capture
// ceiling, bounded start and stop, and partial-artifact recovery.

mod common;

use anyhow::Result;
use common::FakeEngine;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use studio_node::engine::{AdapterSettings, CaptureConfig, EngineAdapter, EngineStatus};
use studio_node::error::{EngineError, SessionWarning};
use studio_node::health::Probe;
use studio_node::registry::Registry;
use tempfile::TempDir;

fn adapter(engine: Arc<FakeEngine>, max_active: usize) -> EngineAdapter {
    EngineAdapter::new(
        engine,
        AdapterSettings {
            start_timeout: Duration::from_millis(100),
            stop_timeout: Duration::from_millis(100),
            abort_timeout: Duration::from_millis(100),
            restart_timeout: Duration::from_millis(100),
            max_active,
        },
        Registry::new(2),
    )
}

fn capture(dir: &TempDir, stem: &str) -> CaptureConfig {
    CaptureConfig {
        output_dir: dir.path().join("recordings"),
        file_stem: stem.to_string(),
        extension: "mkv".to_string(),
    }
}

#[tokio::test]
async fn test_start_is_idempotent() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let adapter = adapter(engine.clone(), 1);

    let first = adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    let second = adapter.start("session-a", &capture(&temp_dir, "a")).await?;

    assert_eq!(first, second, "Second start should return the same handle");
    assert_eq!(engine.starts.load(Ordering::SeqCst), 1, "Engine should only start once");
    assert_eq!(first.output_path, temp_dir.path().join("recordings/a.mkv"));

    Ok(())
}

#[tokio::test]
async fn test_start_refused_when_engine_busy() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let adapter = adapter(FakeEngine::new(), 1);

    adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    let err = adapter
        .start("session-b", &capture(&temp_dir, "b"))
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::AlreadyRecording("session-a".to_string()));
    assert_eq!(adapter.active_sessions().await, vec!["session-a".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_start_failure_is_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    engine.fail_start.store(true, Ordering::SeqCst);
    let adapter = adapter(engine, 1);

    let err = adapter
        .start("session-a", &capture(&temp_dir, "a"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Unavailable(_)));
    assert!(adapter.active_sessions().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_hung_start_does_not_block_other_sessions() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let adapter = Arc::new(adapter(engine.clone(), 2));

    let handle = adapter.start("session-a", &capture(&temp_dir, "a")).await?;

    engine.hang_on_start.store(true, Ordering::SeqCst);
    let pending = {
        let adapter = Arc::clone(&adapter);
        let config = capture(&temp_dir, "b");
        tokio::spawn(async move { adapter.start("session-b", &config).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Session A is served while B's start is still in flight
    assert_eq!(adapter.active_sessions().await, vec!["session-a".to_string()]);
    let report = tokio::time::timeout(Duration::from_secs(1), adapter.stop(&handle))
        .await
        .expect("stop of session A should not wait on session B's start")?;
    assert!(report.warning.is_none());

    let err = pending.await?.unwrap_err();
    match err {
        EngineError::Unavailable(reason) => assert!(reason.contains("start did not complete"), "reason: {reason}"),
        other => panic!("Expected Unavailable, got {other:?}"),
    }
    assert!(adapter.active_sessions().await.is_empty());

    // The timed-out reservation is released
    engine.hang_on_start.store(false, Ordering::SeqCst);
    adapter.start("session-b", &capture(&temp_dir, "b")).await?;
    assert_eq!(adapter.active_sessions().await, vec!["session-b".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_status_tracks_capture() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let adapter = adapter(engine.clone(), 1);

    let handle = adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    assert_eq!(adapter.status(&handle).await, EngineStatus::Recording);
    assert!(adapter.probe().await.is_ok());

    engine.capture_error.store(true, Ordering::SeqCst);
    assert_eq!(adapter.status(&handle).await, EngineStatus::Error);
    let detail = adapter.probe().await.unwrap_err();
    assert!(detail.contains("session-a"), "detail: {detail}");

    engine.capture_error.store(false, Ordering::SeqCst);
    adapter.stop(&handle).await?;
    assert_eq!(adapter.status(&handle).await, EngineStatus::Idle);
    assert!(adapter.probe().await.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_clean_stop_produces_artifact() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let adapter = adapter(FakeEngine::new(), 1);

    let handle = adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    let report = adapter.stop(&handle).await?;

    assert!(report.warning.is_none());
    assert!(!report.artifact.partial);
    assert_eq!(report.artifact.path, handle.output_path);
    assert!(report.artifact.size_bytes > 0);
    assert_eq!(report.artifact.checksum.len(), 64, "blake3 hex digest expected");
    assert_eq!(report.artifact.stem(), "a");

    // The handle is gone after a stop
    let err = adapter.stop(&handle).await.unwrap_err();
    assert_eq!(err, EngineError::NoActiveRecording("session-a".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_hung_stop_yields_partial_artifact() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let adapter = adapter(engine.clone(), 1);

    let handle = adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    engine.hang_on_stop.store(true, Ordering::SeqCst);

    let started = tokio::time::Instant::now();
    let report = adapter.stop(&handle).await?;

    assert!(started.elapsed() < Duration::from_secs(2), "Stop should be bounded");
    assert!(report.artifact.partial);
    assert!(report.artifact.size_bytes > 0);
    assert!(matches!(
        report.warning,
        Some(SessionWarning::PartialArtifact { .. })
    ));
    assert_eq!(engine.active(), 0, "Capture should be force-stopped");

    Ok(())
}

#[tokio::test]
async fn test_hung_stop_without_media_times_out() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let adapter = adapter(engine.clone(), 1);

    let handle = adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    std::fs::remove_file(&handle.output_path)?;
    engine.hang_on_stop.store(true, Ordering::SeqCst);

    let err = adapter.stop(&handle).await.unwrap_err();
    assert!(matches!(err, EngineError::StopTimeout(_)));

    Ok(())
}

#[tokio::test]
async fn test_failed_stop_keeps_written_media() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let adapter = adapter(engine.clone(), 1);

    let handle = adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    engine.fail_stop.store(true, Ordering::SeqCst);

    let report = adapter.stop(&handle).await?;
    assert!(report.artifact.partial);
    match report.warning {
        Some(SessionWarning::PartialArtifact { reason }) => {
            assert!(reason.contains("stop request rejected"), "reason: {reason}")
        }
        other => panic!("Expected a partial-artifact warning, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_force_finalize_and_discard() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let adapter = adapter(engine.clone(), 2);

    adapter.start("session-a", &capture(&temp_dir, "a")).await?;
    adapter.start("session-b", &capture(&temp_dir, "b")).await?;

    let report = adapter.force_finalize("session-a", "engine stale").await?;
    assert!(report.artifact.partial);
    assert_eq!(
        report.warning,
        Some(SessionWarning::PartialArtifact {
            reason: "engine stale".to_string()
        })
    );

    adapter.discard("session-b").await;
    assert!(adapter.active_sessions().await.is_empty());
    assert_eq!(engine.active(), 0);

    // Nothing left to finalize
    assert!(adapter.force_finalize("session-b", "again").await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_restart_failure_is_reported() -> Result<()> {
    let engine = FakeEngine::new();
    let adapter = adapter(engine.clone(), 1);

    adapter.restart().await?;

    engine.restart_fails.store(true, Ordering::SeqCst);
    assert!(adapter.restart().await.is_err());

    Ok(())
}
