use super::cancellable;
use super::targets::ColdStorage;
use crate::error::StageError;
use crate::pipeline::{Stage, StageInput, StageOutput};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Copies the raw recording to cold storage under `recordings/YYYY/MM/DD/`
pub struct ColdBackupStage {
    storage: Option<Arc<dyn ColdStorage>>,
}

impl ColdBackupStage {
    pub fn new(storage: Option<Arc<dyn ColdStorage>>) -> Self {
        Self { storage }
    }
}

#[async_trait::async_trait]
impl Stage for ColdBackupStage {
    fn name(&self) -> &str {
        super::COLD_BACKUP
    }

    async fn execute(&self, input: &StageInput, cancel: CancellationToken) -> Result<StageOutput, StageError> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| StageError::NotConfigured("cold storage".to_string()))?;

        let key = format!(
            "recordings/{}/{}",
            input.artifact.started_at.format("%Y/%m/%d"),
            input.artifact.file_name()
        );

        let location = cancellable(&cancel, storage.put(&input.artifact.path, &key)).await??;
        info!(
            "Session {} backed up to {} at {}",
            input.session.session_id,
            storage.name(),
            location
        );

        Ok(StageOutput::new(location).with_detail(serde_json::json!({
            "bytes": input.artifact.size_bytes,
            "checksum": input.artifact.checksum,
        })))
    }
}
