//! In-process broker with topic fan-out
//!
//! Behaves like a topic-only STOMP broker: every message published to a
//! destination is delivered to every current subscription on it, the
//! publisher's own included. Connections can be refused and all clients can be
//! dropped at once to exercise the session's failure paths.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Connector, Inbound, InboundMessage, Link, Outbound};
use crate::config::BrokerConfig;
use crate::types::Headers;
use crate::{FeedError, Result};

#[derive(Debug)]
struct Client {
    /// subscription id to destination
    subscriptions: BTreeMap<String, String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Debug, Default)]
struct BrokerState {
    clients: BTreeMap<u64, Client>,
    next_client: u64,
    next_message: u64,
    refuse: Option<String>,
    published: Vec<(String, Bytes)>,
}

impl BrokerState {
    fn deliver(&mut self, destination: &str, body: &Bytes) -> usize {
        let mut delivered = 0;
        for client in self.clients.values() {
            for (id, subscribed) in &client.subscriptions {
                if subscribed != destination {
                    continue;
                }
                self.next_message += 1;
                let headers: Headers = [
                    ("destination", destination.to_string()),
                    ("subscription", id.clone()),
                    ("message-id", format!("memory-{}", self.next_message)),
                    ("content-length", body.len().to_string()),
                ]
                .into_iter()
                .collect();
                if client.tx.send(InboundMessage::new(headers, body.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

/// Shared handle to an in-process broker. Clones address the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish as an external producer. Returns the number of deliveries.
    pub fn publish(&self, destination: &str, body: impl Into<Bytes>) -> usize {
        let body = body.into();
        let mut state = self.state.lock();
        state.published.push((destination.to_string(), body.clone()));
        state.deliver(destination, &body)
    }

    /// Refuse new connections with `reason`, or accept them again with `None`.
    pub fn refuse_connections(&self, reason: Option<&str>) {
        self.state.lock().refuse = reason.map(str::to_string);
    }

    /// Drop every connected client, as a broker restart would.
    pub fn drop_clients(&self) {
        let dropped = std::mem::take(&mut self.state.lock().clients);
        debug!(clients = dropped.len(), "Memory broker dropped all clients");
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Number of subscriptions on `destination` across all clients.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.state
            .lock()
            .clients
            .values()
            .flat_map(|client| client.subscriptions.values())
            .filter(|subscribed| subscribed.as_str() == destination)
            .count()
    }

    /// Every message published so far, by producers and clients alike.
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.state.lock().published.clone()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, config: &BrokerConfig) -> Result<Link> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.refuse {
            return Err(FeedError::connection_failed(format!(
                "Broker refused {}: {reason}",
                config.name
            )));
        }

        let id = state.next_client;
        state.next_client += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.clients.insert(id, Client { subscriptions: BTreeMap::new(), tx });
        debug!(client = id, name = %config.name, "Memory broker accepted client");

        Ok(Link {
            outbound: Box::new(MemoryOutbound { state: Arc::clone(&self.state), client: id }),
            inbound: Box::new(MemoryInbound { rx }),
        })
    }
}

struct MemoryOutbound {
    state: Arc<Mutex<BrokerState>>,
    client: u64,
}

impl MemoryOutbound {
    fn with_client<T>(&self, f: impl FnOnce(&mut Client) -> T) -> Result<T> {
        let mut state = self.state.lock();
        let client = state
            .clients
            .get_mut(&self.client)
            .ok_or_else(|| FeedError::connection_failed("Connection closed by broker"))?;
        Ok(f(client))
    }
}

#[async_trait::async_trait]
impl Outbound for MemoryOutbound {
    async fn subscribe(&mut self, id: &str, destination: &str) -> Result<()> {
        self.with_client(|client| {
            client.subscriptions.insert(id.to_string(), destination.to_string());
        })
    }

    async fn unsubscribe(&mut self, id: &str) -> Result<()> {
        self.with_client(|client| {
            client.subscriptions.remove(id);
        })
    }

    async fn send(&mut self, destination: &str, body: Bytes) -> Result<()> {
        self.with_client(|_| ())?;
        let mut state = self.state.lock();
        state.published.push((destination.to_string(), body.clone()));
        state.deliver(destination, &body);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.lock().clients.remove(&self.client);
        Ok(())
    }
}

struct MemoryInbound {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

#[async_trait::async_trait]
impl Inbound for MemoryInbound {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        Ok(self.rx.recv().await)
    }
}
