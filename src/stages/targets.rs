use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Text produced from a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,

    /// 0.0–1.0 when the transcriber reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Speech-to-text service
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, media: &Path) -> Result<Transcript>;
}

/// Metadata sent along with a video upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoUpload {
    pub title: String,
    pub description: String,
    pub privacy: String,
}

/// Video host (YouTube and the like)
#[async_trait::async_trait]
pub trait VideoHost: Send + Sync {
    fn name(&self) -> &str;

    /// Upload and return the remote video id
    async fn upload(&self, media: &Path, upload: &VideoUpload) -> Result<String>;
}

/// A file to place in the repository
#[derive(Debug, Clone, PartialEq)]
pub struct RepoFile {
    pub path: String,
    pub content: String,
}

/// Source repository receiving transcripts and metadata
#[async_trait::async_trait]
pub trait SourceRepo: Send + Sync {
    fn name(&self) -> &str;

    /// Commit `files` and return a commit reference
    async fn commit(&self, files: &[RepoFile], message: &str) -> Result<String>;
}

/// Long-term storage for the raw recording
#[async_trait::async_trait]
pub trait ColdStorage: Send + Sync {
    fn name(&self) -> &str;

    /// Store `media` under `key` and return the final location
    async fn put(&self, media: &Path, key: &str) -> Result<String>;
}
