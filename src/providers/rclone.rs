use super::command::run_command;
use crate::stages::ColdStorage;
use anyhow::{bail, Result};
use std::path::Path;
use tracing::info;

/// Cold storage through `rclone copyto <file> <remote>:<key>`
pub struct RcloneStorage {
    program: String,
    remote: String,
    extra_args: Vec<String>,
}

impl RcloneStorage {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            program: "rclone".to_string(),
            remote: remote.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn destination(&self, key: &str) -> String {
        format!("{}:{}", self.remote.trim_end_matches(':'), key)
    }
}

#[async_trait::async_trait]
impl ColdStorage for RcloneStorage {
    fn name(&self) -> &str {
        "rclone"
    }

    async fn put(&self, media: &Path, key: &str) -> Result<String> {
        if !media.exists() {
            bail!("{} does not exist", media.display());
        }

        let destination = self.destination(key);
        let mut args = vec![
            "copyto".to_string(),
            media.display().to_string(),
            destination.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());

        run_command(&self.program, &args).await?;
        info!("Uploaded {} to {}", media.display(), destination);
        Ok(destination)
    }
}
