use super::cancellable;
use super::targets::Transcriber;
use crate::error::StageError;
use crate::pipeline::{Stage, StageInput, StageOutput};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Transcribes the recording and saves `<transcripts_dir>/<stem>.txt`
pub struct TranscribeStage {
    transcriber: Option<Arc<dyn Transcriber>>,
    transcripts_dir: PathBuf,
}

impl TranscribeStage {
    pub fn new(transcriber: Option<Arc<dyn Transcriber>>, transcripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            transcriber,
            transcripts_dir: transcripts_dir.into(),
        }
    }
}

#[async_trait::async_trait]
impl Stage for TranscribeStage {
    fn name(&self) -> &str {
        super::TRANSCRIBE
    }

    async fn execute(&self, input: &StageInput, cancel: CancellationToken) -> Result<StageOutput, StageError> {
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or_else(|| StageError::NotConfigured("transcriber".to_string()))?;

        let transcript = cancellable(&cancel, transcriber.transcribe(&input.artifact.path)).await??;

        tokio::fs::create_dir_all(&self.transcripts_dir)
            .await
            .with_context(|| format!("creating {}", self.transcripts_dir.display()))?;
        let path = self
            .transcripts_dir
            .join(format!("{}.txt", input.artifact.stem()));
        tokio::fs::write(&path, &transcript.text)
            .await
            .with_context(|| format!("writing transcript {}", path.display()))?;

        info!(
            "Transcript for {} saved to {} ({} chars, via {})",
            input.session.session_id,
            path.display(),
            transcript.text.len(),
            transcriber.name()
        );

        Ok(StageOutput::new(path.display().to_string()).with_detail(serde_json::json!({
            "confidence": transcript.confidence,
            "characters": transcript.text.len(),
        })))
    }
}
