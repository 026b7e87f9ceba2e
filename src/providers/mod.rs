//! Concrete publish targets

mod command;
mod github;
mod rclone;

pub use command::{CommandSpec, CommandTranscriber, CommandVideoHost};
pub use github::{GitHubConfig, GitHubRepo};
pub use rclone::RcloneStorage;
