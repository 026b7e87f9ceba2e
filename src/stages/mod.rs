//! Publish stages
//!
//! The four post-processing stages run for every finished recording:
//!
//! | stage         | after                      | required |
//! |---------------|----------------------------|----------|
//! | transcribe    |                            | no       |
//! | video-publish |                            | yes      |
//! | repo-commit   | transcribe, video-publish  | no       |
//! | cold-backup   |                            | no       |
//!
//! Each delegates to a target trait so providers can be swapped or faked.

mod cold_backup;
mod repo_commit;
mod targets;
mod transcribe;
mod video_publish;

pub use cold_backup::ColdBackupStage;
pub use repo_commit::RepoCommitStage;
pub use targets::{ColdStorage, RepoFile, SourceRepo, Transcriber, Transcript, VideoHost, VideoUpload};
pub use transcribe::TranscribeStage;
pub use video_publish::VideoPublishStage;

use crate::error::{GraphError, StageError};
use crate::pipeline::{Stage, StagePolicy, StageSet, StageSpec};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const TRANSCRIBE: &str = "transcribe";
pub const VIDEO_PUBLISH: &str = "video-publish";
pub const REPO_COMMIT: &str = "repo-commit";
pub const COLD_BACKUP: &str = "cold-backup";

/// Publish targets; `None` makes the stage fail as not configured
#[derive(Clone, Default)]
pub struct Targets {
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub video_host: Option<Arc<dyn VideoHost>>,
    pub source_repo: Option<Arc<dyn SourceRepo>>,
    pub cold_storage: Option<Arc<dyn ColdStorage>>,
}

/// Stage settings that are not targets
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub transcripts_dir: PathBuf,
    pub privacy: String,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            transcripts_dir: PathBuf::from("transcripts"),
            privacy: "private".to_string(),
        }
    }
}

/// The publish graph with default policies
pub fn default_specs() -> Vec<StageSpec> {
    vec![
        StageSpec::new(TRANSCRIBE, StagePolicy::default()),
        StageSpec::new(VIDEO_PUBLISH, StagePolicy::default().required(true)),
        StageSpec::new(REPO_COMMIT, StagePolicy::default())
            .after(TRANSCRIBE)
            .after(VIDEO_PUBLISH),
        StageSpec::new(COLD_BACKUP, StagePolicy::default()),
    ]
}

/// Pair each spec with its stage implementation and validate the graph
pub fn build_stage_set(
    specs: Vec<StageSpec>,
    targets: Targets,
    options: StageOptions,
) -> Result<StageSet, GraphError> {
    let mut entries: Vec<(StageSpec, Arc<dyn Stage>)> = Vec::with_capacity(specs.len());
    for spec in specs {
        let stage: Arc<dyn Stage> = match spec.name.as_str() {
            TRANSCRIBE => Arc::new(TranscribeStage::new(
                targets.transcriber.clone(),
                options.transcripts_dir.clone(),
            )),
            VIDEO_PUBLISH => Arc::new(VideoPublishStage::new(
                targets.video_host.clone(),
                options.privacy.clone(),
            )),
            REPO_COMMIT => Arc::new(RepoCommitStage::new(targets.source_repo.clone())),
            COLD_BACKUP => Arc::new(ColdBackupStage::new(targets.cold_storage.clone())),
            other => return Err(GraphError::MissingStage(other.to_string())),
        };
        entries.push((spec, stage));
    }
    StageSet::new(entries)
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, StageError> {
    tokio::select! {
        out = fut => Ok(out),
        _ = cancel.cancelled() => Err(StageError::Cancelled),
    }
}
