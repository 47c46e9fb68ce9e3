//! Near-real-time client for an earthquake early warning feed.
//!
//! Quakefeed subscribes to broker topics carrying field station messages and
//! event alerts, decodes every frame by its kind tag, and publishes the result
//! to the rest of the application one frame at a time.
//!
//! # Features
//!
//! - **Decoders**: triggers, ground-motion peaks, trigger parameters (raw or
//!   zlib bodies), raw waveform notices and `event_message` XML alerts
//! - **Serialized dispatch**: history, persistence, decode, last message and
//!   handler run as one critical section per frame
//! - **Persistence**: day-bucketed binary trigger logs and text alert logs, with
//!   replay of the binary logs
//! - **Broker session**: STOMP over TCP, explicit state machine, caller-driven
//!   reconnection
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use quakefeed::{DecodedRecord, Feed, FeedConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> quakefeed::Result<()> {
//!     let config = FeedConfig::from_file("feed.yaml")?;
//!     let session = Feed::listen_stomp(config, |record: Arc<DecodedRecord>| {
//!         println!("{} from {}", record.kind(), record.source());
//!     })
//!     .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     session.disconnect().await
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Decoding and the dispatch path
pub mod dispatch;
pub mod handler;
pub mod history;
pub mod wire;

// Persistence
pub mod persist;
pub mod replay;

// Broker side
pub mod config;
pub mod publisher;
pub mod session;
pub mod transport;

// Core exports
pub use error::{FeedError, Result};
pub use types::*;

pub use config::{BrokerConfig, FeedConfig, PersistenceConfig};
pub use dispatch::{DispatchOutcome, DispatchStats, Dispatcher};
pub use handler::{Discard, RecordHandler, StatusHandler};
pub use publisher::AlertPublisher;
pub use session::{BrokerSession, SessionState, SessionStatus};

use std::sync::Arc;
use tracing::{info, warn};

use transport::Connector;
use transport::stomp::StompConnector;

/// Unified entry point for listening to a feed.
///
/// # Examples
///
/// ## In-process broker
/// ```rust,no_run
/// use quakefeed::transport::memory::MemoryBroker;
/// use quakefeed::{Discard, Feed, FeedConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> quakefeed::Result<()> {
///     let broker = MemoryBroker::new();
///     let session = Feed::listen(FeedConfig::default(), Arc::new(broker), Discard).await?;
///     println!("{}", session.status());
///     Ok(())
/// }
/// ```
pub struct Feed;

impl Feed {
    /// Validate `config`, connect through `connector` and subscribe every
    /// configured topic.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - Persistence is enabled and its directory does not exist
    /// - The broker refuses the connection or a call times out
    /// - A subscription fails; the session is disconnected again first
    pub async fn listen(
        config: FeedConfig,
        connector: Arc<dyn Connector>,
        handler: impl RecordHandler,
    ) -> Result<Arc<BrokerSession>> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::from_config(&config)?.with_handler(handler));
        let session = Arc::new(BrokerSession::new(config.broker.clone(), connector, dispatcher));

        session.connect().await?;
        for (id, topic) in &config.topics {
            if let Err(e) = session.subscribe(topic, id).await {
                warn!(%topic, %id, error = %e, "Subscription failed, disconnecting");
                if let Err(close) = session.disconnect().await {
                    warn!(error = %close, "Disconnect after failed subscription also failed");
                }
                return Err(e);
            }
        }

        info!(name = %config.broker.name, topics = config.topics.len(), "Feed listening");
        Ok(session)
    }

    /// [`listen`](Self::listen) over STOMP/TCP.
    pub async fn listen_stomp(config: FeedConfig, handler: impl RecordHandler) -> Result<Arc<BrokerSession>> {
        Self::listen(config, Arc::new(StompConnector), handler).await
    }
}
