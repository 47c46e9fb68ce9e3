//! Broker transport abstraction
//!
//! A [`Connector`] opens a [`Link`]: an outbound half for commands and an
//! inbound half that yields delivered messages. The session owns both halves;
//! the inbound half is moved into its reader task.
//!
//! Implementations:
//! - [`stomp::StompConnector`]: STOMP 1.0-1.2 over TCP (ActiveMQ, Artemis, RabbitMQ)
//! - [`memory::MemoryBroker`]: in-process topic fan-out for tests and offline setups

pub mod memory;
pub mod stomp;

use bytes::Bytes;

use crate::Result;
use crate::config::BrokerConfig;
use crate::types::{Headers, RawFrame};

/// One message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub headers: Headers,
    pub body: Bytes,
}

impl InboundMessage {
    pub fn new(headers: Headers, body: impl Into<Bytes>) -> Self {
        Self { headers, body: body.into() }
    }

    pub fn into_frame(self) -> RawFrame {
        RawFrame::new(self.headers, self.body.to_vec())
    }
}

/// Command half of a broker connection.
#[async_trait::async_trait]
pub trait Outbound: Send + 'static {
    /// Start delivery from `destination` under subscription `id`.
    async fn subscribe(&mut self, id: &str, destination: &str) -> Result<()>;

    /// Stop delivery for subscription `id`.
    async fn unsubscribe(&mut self, id: &str) -> Result<()>;

    /// Publish `body` to `destination`.
    async fn send(&mut self, destination: &str, body: Bytes) -> Result<()>;

    /// Close the connection gracefully.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Delivery half of a broker connection.
#[async_trait::async_trait]
pub trait Inbound: Send + 'static {
    /// Wait for the next delivered message
    ///
    /// Returns:
    /// - `Ok(Some(message))` - Message delivered
    /// - `Ok(None)` - Broker closed the connection
    /// - `Err(e)` - Transport or protocol error; the connection is unusable
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;
}

/// Both halves of an established connection.
pub struct Link {
    pub outbound: Box<dyn Outbound>,
    pub inbound: Box<dyn Inbound>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens broker connections.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and complete the handshake.
    async fn connect(&self, config: &BrokerConfig) -> Result<Link>;
}
