//! Broker session lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribed(n) -> Disconnected
//! ```
//!
//! A session owns the live broker link and the subscription table. While
//! connected, a reader task pulls messages from the link and hands each one to
//! the [`Dispatcher`], but only while at least one subscription is active.
//!
//! Reconnection is caller-driven. When the broker drops the connection the
//! reader moves the session to `Disconnected`, clears the subscription table and
//! reports `(false, detail)` to the status handler; it never retries. The
//! destinations subscribed so far stay in [`BrokerSession::known_topics`] so the
//! caller can [`BrokerSession::reconnect`].
//!
//! Every transport call is bounded by the broker timeout.

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::BrokerConfig;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::handler::{Discard, StatusHandler};
use crate::transport::{Connector, Inbound, Link, Outbound};
use crate::{FeedError, Result};

/// Connection state of a [`BrokerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected with this many active subscriptions
    Subscribed(usize),
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Subscribed(_))
    }

    fn with_subscriptions(count: usize) -> Self {
        if count == 0 { SessionState::Connected } else { SessionState::Subscribed(count) }
    }
}

/// Point-in-time session report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub state: SessionState,
    pub subscriptions: BTreeMap<String, String>,
    pub history_len: usize,
    pub history_capacity: usize,
    pub stats: DispatchStats,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Name:      {}", self.name)?;
        writeln!(f, "Host:      {}:{}", self.host, self.port)?;
        writeln!(f, "State:     {:?}", self.state)?;
        writeln!(f, "Messages:  {}/{}", self.history_len, self.history_capacity)?;
        for (id, topic) in &self.subscriptions {
            writeln!(f, "Topic {id}:  {topic}")?;
        }
        Ok(())
    }
}

type SubscriptionTable = Arc<Mutex<BTreeMap<String, String>>>;

struct ActiveLink {
    outbound: Box<dyn Outbound>,
    reader: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ActiveLink {
    /// Stop the reader and wait for any in-flight frame to finish dispatching.
    async fn stop_reader(self) -> Box<dyn Outbound> {
        self.cancel.cancel();
        if let Err(e) = self.reader.await {
            error!(error = %e, "Broker reader task failed");
        }
        self.outbound
    }
}

/// Everything the reader task shares with its session.
struct ReaderContext {
    name: String,
    state: Arc<watch::Sender<SessionState>>,
    subscriptions: SubscriptionTable,
    dispatcher: Arc<Dispatcher>,
    status: Arc<dyn StatusHandler>,
}

/// One connection to a broker and its subscriptions.
pub struct BrokerSession {
    config: BrokerConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    status: Arc<dyn StatusHandler>,
    state: Arc<watch::Sender<SessionState>>,
    link: tokio::sync::Mutex<Option<ActiveLink>>,
    subscriptions: SubscriptionTable,
    known_topics: Mutex<BTreeMap<String, String>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession")
            .field("name", &self.config.name)
            .field("address", &self.config.address())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl BrokerSession {
    pub fn new(config: BrokerConfig, connector: Arc<dyn Connector>, dispatcher: Arc<Dispatcher>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            connector,
            dispatcher,
            status: Arc::new(Discard),
            state: Arc::new(state),
            link: tokio::sync::Mutex::new(None),
            subscriptions: Arc::new(Mutex::new(BTreeMap::new())),
            known_topics: Mutex::new(BTreeMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Install the connection status hook.
    pub fn with_status_handler(mut self, handler: impl StatusHandler) -> Self {
        self.status = Arc::new(handler);
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Stream of state changes, starting with the current state.
    pub fn state_updates(&self) -> impl Stream<Item = SessionState> + 'static {
        WatchStream::new(self.state.subscribe())
    }

    /// Active subscriptions, id to destination.
    pub fn subscriptions(&self) -> BTreeMap<String, String> {
        self.subscriptions.lock().clone()
    }

    /// Every destination subscribed since the last [`disconnect`](Self::disconnect),
    /// kept across broker drops for [`reconnect`](Self::reconnect).
    pub fn known_topics(&self) -> BTreeMap<String, String> {
        self.known_topics.lock().clone()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            name: self.config.name.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            state: self.state(),
            subscriptions: self.subscriptions(),
            history_len: self.dispatcher.history_len(),
            history_capacity: self.dispatcher.history_capacity(),
            stats: self.dispatcher.stats(),
        }
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(name = %self.config.name, ?previous, ?next, "Session state changed");
        }
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.timeout();
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::timeout(operation, limit)),
        }
    }

    /// Connect and complete the broker handshake.
    ///
    /// Already connected is a no-op. On failure the previous state is kept and the
    /// error is returned for the caller to retry.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        let previous = self.state();
        if previous.is_connected() {
            warn!(name = %self.config.name, "Already connected, ignoring connect");
            return Ok(());
        }

        // a link left behind by a broker drop
        if let Some(stale) = link.take() {
            drop(stale.stop_reader().await);
        }

        self.set_state(SessionState::Connecting);
        let address = self.config.address();
        info!(name = %self.config.name, %address, "Connecting to broker");

        let Link { outbound, inbound } =
            match self.bounded("connect", self.connector.connect(&self.config)).await {
                Ok(new_link) => new_link,
                Err(e) => {
                    self.set_state(previous);
                    warn!(name = %self.config.name, %address, error = %e, "Broker connection failed");
                    return Err(e);
                }
            };

        self.subscriptions.lock().clear();
        let cancel = self.shutdown.child_token();
        let context = ReaderContext {
            name: self.config.name.clone(),
            state: Arc::clone(&self.state),
            subscriptions: Arc::clone(&self.subscriptions),
            dispatcher: Arc::clone(&self.dispatcher),
            status: Arc::clone(&self.status),
        };
        let reader = tokio::spawn(reader_task(context, inbound, cancel.clone()));
        *link = Some(ActiveLink { outbound, reader, cancel });

        self.set_state(SessionState::Connected);
        info!(name = %self.config.name, %address, "Connected to broker");
        self.status.on_status(true, &format!("Connected to {address}"));
        Ok(())
    }

    /// Subscribe `id` to `topic`. Re-using an id replaces its destination.
    pub async fn subscribe(&self, topic: &str, id: &str) -> Result<()> {
        let mut link = self.link.lock().await;
        let previous = self.state();
        let active = match link.as_mut() {
            Some(active) if previous.is_connected() => active,
            _ => return Err(FeedError::not_connected("subscribe")),
        };

        // in place before the SUBSCRIBE goes out so the first delivery is forwarded
        let replaced = self.subscriptions.lock().insert(id.to_string(), topic.to_string());
        self.set_state(SessionState::with_subscriptions(self.subscriptions.lock().len()));

        if let Err(e) = self.bounded("subscribe", active.outbound.subscribe(id, topic)).await {
            let mut table = self.subscriptions.lock();
            match replaced {
                Some(old) => table.insert(id.to_string(), old),
                None => table.remove(id),
            };
            drop(table);
            if self.state().is_connected() {
                self.set_state(previous);
            }
            warn!(name = %self.config.name, topic, id, error = %e, "Subscribe failed");
            return Err(e);
        }

        self.known_topics.lock().insert(id.to_string(), topic.to_string());
        info!(name = %self.config.name, topic, id, "Subscribed");
        Ok(())
    }

    /// Remove subscription `id`.
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        let mut link = self.link.lock().await;
        let Some(topic) = self.subscriptions.lock().remove(id) else {
            return Err(FeedError::UnknownSubscription { id: id.to_string() });
        };
        self.known_topics.lock().remove(id);
        let remaining = self.subscriptions.lock().len();
        self.set_state(SessionState::with_subscriptions(remaining));
        info!(name = %self.config.name, %topic, id, "Unsubscribed");

        match link.as_mut() {
            Some(active) => self.bounded("unsubscribe", active.outbound.unsubscribe(id)).await,
            None => Ok(()),
        }
    }

    /// Publish `body` to `topic` on the live connection.
    pub async fn send(&self, topic: &str, body: impl Into<Bytes>) -> Result<()> {
        let mut link = self.link.lock().await;
        let active = match link.as_mut() {
            Some(active) if self.state().is_connected() => active,
            _ => return Err(FeedError::not_connected("send")),
        };
        let body = body.into();
        trace!(topic, bytes = body.len(), "Sending message");
        self.bounded("send", active.outbound.send(topic, body)).await
    }

    /// Close the connection from any state.
    ///
    /// The session is `Disconnected` with an empty subscription table afterwards
    /// even when the graceful close fails. A frame already being dispatched
    /// completes before this returns.
    pub async fn disconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        let was_connected = self.state().is_connected();
        self.set_state(SessionState::Disconnected);
        self.subscriptions.lock().clear();
        self.known_topics.lock().clear();

        let Some(active) = link.take() else {
            return Ok(());
        };
        let mut outbound = active.stop_reader().await;
        let result = if was_connected {
            self.bounded("disconnect", outbound.disconnect()).await
        } else {
            Ok(())
        };

        info!(name = %self.config.name, "Disconnected from broker");
        if was_connected {
            self.status.on_status(false, "Disconnected by client");
        }
        if let Err(e) = &result {
            warn!(name = %self.config.name, error = %e, "Graceful disconnect failed");
        }
        result
    }

    /// Disconnect, connect again and re-subscribe every known topic.
    ///
    /// Returns the number of subscriptions restored. When the connection cannot be
    /// re-established the known topics are kept for the next attempt.
    pub async fn reconnect(&self) -> Result<usize> {
        let topics = self.known_topics();
        info!(name = %self.config.name, topics = topics.len(), "Reconnecting to broker");
        if let Err(e) = self.disconnect().await {
            debug!(error = %e, "Ignoring disconnect failure during reconnect");
        }
        if let Err(e) = self.connect().await {
            *self.known_topics.lock() = topics;
            return Err(e);
        }
        for (id, topic) in &topics {
            self.subscribe(topic, id).await?;
        }
        Ok(topics.len())
    }
}

impl Drop for BrokerSession {
    fn drop(&mut self) {
        debug!(name = %self.config.name, "Dropping broker session");
        self.shutdown.cancel();
    }
}

/// Reader task - forwards delivered messages to the dispatcher
async fn reader_task(context: ReaderContext, mut inbound: Box<dyn Inbound>, cancel: CancellationToken) {
    info!(name = %context.name, "Broker reader started");
    let mut delivered = 0u64;
    let mut ignored = 0u64;

    let detail = loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(name = %context.name, delivered, "Broker reader cancelled");
                return;
            }
            result = inbound.next_message() => result,
        };

        match result {
            Ok(Some(message)) => {
                let subscribed = matches!(*context.state.borrow(), SessionState::Subscribed(_));
                if !subscribed {
                    ignored += 1;
                    debug!(ignored, "Dropping message delivered without a subscription");
                    continue;
                }
                delivered += 1;
                let outcome = context.dispatcher.dispatch(message.into_frame());
                trace!(delivered, decoded = outcome.is_decoded(), "Frame dispatched");
            }
            Ok(None) => break "Connection closed by broker".to_string(),
            Err(e) => {
                error!(name = %context.name, error = %e, "Broker connection failed");
                break format!("Connection lost: {e}");
            }
        }
    };

    context.subscriptions.lock().clear();
    context.state.send_replace(SessionState::Disconnected);
    warn!(name = %context.name, delivered, %detail, "Disconnected from broker");
    context.status.on_status(false, &detail);
}
