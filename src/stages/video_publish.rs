use super::cancellable;
use super::targets::{VideoHost, VideoUpload};
use crate::error::StageError;
use crate::pipeline::{Stage, StageInput, StageOutput};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Uploads the recording to the video host
pub struct VideoPublishStage {
    host: Option<Arc<dyn VideoHost>>,
    privacy: String,
}

impl VideoPublishStage {
    pub fn new(host: Option<Arc<dyn VideoHost>>, privacy: impl Into<String>) -> Self {
        Self {
            host,
            privacy: privacy.into(),
        }
    }
}

#[async_trait::async_trait]
impl Stage for VideoPublishStage {
    fn name(&self) -> &str {
        super::VIDEO_PUBLISH
    }

    async fn execute(&self, input: &StageInput, cancel: CancellationToken) -> Result<StageOutput, StageError> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| StageError::NotConfigured("video host".to_string()))?;

        let upload = VideoUpload {
            title: format!("Recording {}", input.artifact.stem()),
            description: format!(
                "Automated recording from channel {}",
                input.session.channel_id
            ),
            privacy: self.privacy.clone(),
        };

        let video_id = cancellable(&cancel, host.upload(&input.artifact.path, &upload)).await??;
        if video_id.trim().is_empty() {
            return Err(StageError::failed(format!("{} returned an empty video id", host.name())));
        }

        info!(
            "Session {} published to {} as {}",
            input.session.session_id,
            host.name(),
            video_id
        );

        Ok(StageOutput::new(video_id.trim()).with_detail(serde_json::json!({
            "title": upload.title,
            "privacy": upload.privacy,
        })))
    }
}
