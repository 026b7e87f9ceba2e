use super::messages::TransitionMessage;
use crate::session::{EventSink, TransitionEvent};
use anyhow::{Context, Result};
use async_nats::Client;
use tracing::{debug, info};

/// Publishes session transitions to `<prefix>.<session_id>.transition`
pub struct NatsClient {
    client: Client,
    subject_prefix: String,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
        })
    }

    pub fn subject_for(&self, session_id: &str) -> String {
        format!("{}.{}.transition", self.subject_prefix, session_id)
    }

    /// Publish one transition event
    pub async fn publish_transition(&self, event: &TransitionEvent) -> Result<()> {
        let subject = self.subject_for(&event.session_id);
        let message = TransitionMessage::from_event(event)?;
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish transition")?;

        debug!("Published {} → {} to {}", event.from, event.to, subject);
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventSink for NatsClient {
    async fn append(&self, event: &TransitionEvent) -> Result<()> {
        self.publish_transition(event).await
    }

    fn name(&self) -> &str {
        "nats"
    }
}
