//! Outbound alert publisher
//!
//! Renders [`EventAlert`]s as `event_message` XML and sends them over an
//! existing [`BrokerSession`]. A dry-run publisher logs the body and sends
//! nothing, which is how alert envelopes are checked before going live.

use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

use crate::Result;
use crate::config::DEFAULT_TOPIC;
use crate::session::BrokerSession;
use crate::types::EventAlert;

#[derive(Debug, Clone)]
pub struct AlertPublisher {
    session: Arc<BrokerSession>,
    topic: String,
    dry_run: bool,
}

impl AlertPublisher {
    pub fn new(session: Arc<BrokerSession>, topic: impl Into<String>) -> Self {
        Self { session, topic: topic.into(), dry_run: false }
    }

    /// Publisher on the default alert topic.
    pub fn on_default_topic(session: Arc<BrokerSession>) -> Self {
        Self::new(session, DEFAULT_TOPIC)
    }

    /// Log bodies instead of sending them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Render and send `alert`.
    pub async fn publish(&self, alert: &EventAlert) -> Result<()> {
        let xml = alert.to_xml()?;
        info!(
            event_id = %alert.event_id,
            message_type = %alert.message_type,
            magnitude = alert.magnitude,
            topic = %self.topic,
            "Publishing event alert"
        );
        self.publish_raw(xml.into_bytes()).await
    }

    /// Send a pre-rendered body unchanged.
    pub async fn publish_raw(&self, body: impl Into<Bytes>) -> Result<()> {
        let body = body.into();
        if self.dry_run {
            info!(topic = %self.topic, body = %String::from_utf8_lossy(&body), "Dry run, not sending");
            return Ok(());
        }
        self.session.send(&self.topic, body).await
    }
}
