use super::cancellable;
use super::targets::{RepoFile, SourceRepo};
use super::{TRANSCRIBE, VIDEO_PUBLISH};
use crate::error::StageError;
use crate::pipeline::{Stage, StageInput, StageOutput};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Recording metadata committed next to the transcript
#[derive(Debug, Serialize)]
struct RecordingMetadata<'a> {
    title: String,
    session_id: &'a str,
    channel: &'a str,
    duration_secs: f64,
    checksum: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<&'a str>,
    transcript_length: usize,
    recording_date: String,
    partial: bool,
}

/// Commits the transcript (when there is one) and metadata to the repository
pub struct RepoCommitStage {
    repo: Option<Arc<dyn SourceRepo>>,
}

impl RepoCommitStage {
    pub fn new(repo: Option<Arc<dyn SourceRepo>>) -> Self {
        Self { repo }
    }
}

#[async_trait::async_trait]
impl Stage for RepoCommitStage {
    fn name(&self) -> &str {
        super::REPO_COMMIT
    }

    async fn execute(&self, input: &StageInput, cancel: CancellationToken) -> Result<StageOutput, StageError> {
        let repo = self
            .repo
            .as_ref()
            .ok_or_else(|| StageError::NotConfigured("source repository".to_string()))?;

        let artifact = &input.artifact;
        let session_id = input.session.session_id.as_str();
        let date = artifact.started_at.format("%Y-%m-%d");
        let title = format!("Recording {}", artifact.stem());

        let transcript = match input.prior_output(TRANSCRIBE) {
            Some(path) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading transcript {path}"))?,
            ),
            None => {
                debug!("{}: no transcript to commit", session_id);
                None
            }
        };

        let metadata = RecordingMetadata {
            title: title.clone(),
            session_id,
            channel: &input.session.channel_id,
            duration_secs: artifact.duration_secs,
            checksum: &artifact.checksum,
            video: input.prior_output(VIDEO_PUBLISH),
            transcript_length: transcript.as_ref().map(|t| t.len()).unwrap_or(0),
            recording_date: artifact.started_at.to_rfc3339(),
            partial: artifact.partial,
        };

        let mut files = Vec::with_capacity(2);
        if let Some(text) = transcript {
            files.push(RepoFile {
                path: format!("transcripts/{date}-{session_id}.txt"),
                content: text,
            });
        }
        files.push(RepoFile {
            path: format!("metadata/{date}-{session_id}.json"),
            content: serde_json::to_string_pretty(&metadata).context("serializing metadata")?,
        });

        let message = format!("Add {title}");
        let reference = cancellable(&cancel, repo.commit(&files, &message)).await??;

        info!(
            "Session {} committed {} files to {}: {}",
            session_id,
            files.len(),
            repo.name(),
            reference
        );

        Ok(StageOutput::new(reference).with_detail(serde_json::json!({
            "files": files.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
        })))
    }
}
