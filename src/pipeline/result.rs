use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

/// Outcome of one stage for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,

    /// Attempts started so far (never exceeds the policy's max_attempts)
    pub attempts: u32,

    /// Error text of the most recent failed attempt, verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Remote URL, commit id, storage key, ... on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Stage-specific extras (e.g. transcript confidence)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn pending(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Pending,
            attempts: 0,
            last_error: None,
            output: None,
            detail: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn skipped(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: StageStatus::Skipped,
            last_error: Some(reason.into()),
            finished_at: Some(now),
            ..Self::pending(stage)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    /// Mark a non-terminal result failed; terminal results are left untouched
    pub fn fail_if_pending(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = StageStatus::Failed;
        self.last_error = Some(error.into());
        self.finished_at = Some(Utc::now());
        true
    }
}
