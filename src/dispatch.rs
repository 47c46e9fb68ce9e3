//! Type dispatch and the serialized per-frame critical section
//!
//! Every inbound frame goes through [`Dispatcher::dispatch`], which holds one
//! mutex for the whole of:
//!
//! 1. append to the history buffer
//! 2. classify by tag byte
//! 3. persist trigger-class and alert frames (before decoding, so frames that
//!    fail to decode are still available for replay)
//! 4. decode
//! 5. publish the record as the last message
//! 6. invoke the record handler
//!
//! Only one frame is ever inside this section. The last message therefore always
//! reflects the most recently completed decode, log writes never interleave, and
//! the handler sees records strictly in arrival order.
//!
//! Decode and persistence failures never escape: they are logged, counted and
//! reported in the returned [`DispatchOutcome`].

use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, trace, warn};

use crate::config::FeedConfig;
use crate::handler::{Discard, RecordHandler};
use crate::history::HistoryBuffer;
use crate::persist::PersistenceSink;
use crate::types::{DecodedRecord, MessageKind, RawFrame};
use crate::{FeedError, Result, wire};

/// What happened to one dispatched frame.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Decoded and published as the last message
    Decoded(Arc<DecodedRecord>),
    /// Keep-alive, no decoder run
    KeepAlive,
    /// Unrecognized tag byte (`None` for an empty body)
    Unknown { tag: Option<u8> },
    /// Decoder rejected the frame; the last message is unchanged
    Malformed(FeedError),
}

impl DispatchOutcome {
    pub fn record(&self) -> Option<&Arc<DecodedRecord>> {
        match self {
            DispatchOutcome::Decoded(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, DispatchOutcome::Decoded(_))
    }
}

/// Running counters, updated inside the critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub frames: u64,
    pub decoded: u64,
    pub keep_alives: u64,
    pub unknown: u64,
    pub malformed: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
}

/// State only touched while the serializer lock is held.
#[derive(Debug)]
struct Serialized {
    sink: Option<PersistenceSink>,
}

/// Frame dispatcher owning the history buffer and the last message.
pub struct Dispatcher {
    serializer: Mutex<Serialized>,
    history: RwLock<HistoryBuffer>,
    stats: Mutex<DispatchStats>,
    last: watch::Sender<Option<Arc<DecodedRecord>>>,
    handler: Box<dyn RecordHandler>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("history_len", &self.history_len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher with the given history capacity and optional persistence.
    pub fn new(history_capacity: usize, sink: Option<PersistenceSink>) -> Self {
        let (last, _) = watch::channel(None);
        Self {
            serializer: Mutex::new(Serialized { sink }),
            history: RwLock::new(HistoryBuffer::with_capacity(history_capacity)),
            stats: Mutex::new(DispatchStats::default()),
            last,
            handler: Box::new(Discard),
        }
    }

    /// Build from configuration.
    ///
    /// Fails with [`FeedError::PersistenceUnavailable`] when persistence is enabled
    /// and its directory does not exist.
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        let sink = if config.persistence.enabled {
            let sink = PersistenceSink::open(&config.persistence)?;
            debug!(directory = %sink.directory().display(), "Persistence enabled");
            Some(sink)
        } else {
            None
        };
        Ok(Self::new(config.history_capacity, sink))
    }

    /// Install the record handler. Handlers are fixed once dispatching starts.
    pub fn with_handler(mut self, handler: impl RecordHandler) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Process one frame to completion.
    ///
    /// Blocks while another frame is inside the critical section.
    pub fn dispatch(&self, frame: RawFrame) -> DispatchOutcome {
        let serialized = self.serializer.lock();
        let kind = frame.kind();
        self.history.write().record(frame.clone());
        self.stats.lock().frames += 1;

        match kind {
            MessageKind::KeepAlive => {
                trace!("Keep-alive frame");
                self.stats.lock().keep_alives += 1;
                return DispatchOutcome::KeepAlive;
            }
            MessageKind::Unknown => {
                let tag = frame.tag();
                debug!(?tag, len = frame.len(), "Ignoring frame with unknown kind tag");
                self.stats.lock().unknown += 1;
                return DispatchOutcome::Unknown { tag };
            }
            _ => {}
        }

        if let Some(sink) = &serialized.sink {
            match sink.persist(kind, &frame.body) {
                Ok(Some(_)) => self.stats.lock().persisted += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(%kind, error = %e, "Failed to persist frame");
                    self.stats.lock().persistence_failures += 1;
                }
            }
        }

        match wire::decode(kind, &frame.body) {
            Ok(record) => {
                let record = Arc::new(record);
                self.last.send_replace(Some(Arc::clone(&record)));
                self.stats.lock().decoded += 1;
                trace!(%kind, source = record.source(), "Dispatching decoded record");
                self.handler.on_record(Arc::clone(&record));
                DispatchOutcome::Decoded(record)
            }
            Err(e) => {
                warn!(%kind, error = %e, "Discarding malformed frame");
                self.stats.lock().malformed += 1;
                DispatchOutcome::Malformed(e)
            }
        }
    }

    /// Most recently decoded record, `None` before the first success.
    pub fn last_message(&self) -> Option<Arc<DecodedRecord>> {
        self.last.borrow().clone()
    }

    /// Latest-wins stream of decoded records.
    ///
    /// Yields the current last message first, if any. Slow consumers skip
    /// intermediate records; use a [`RecordHandler`] to observe every one.
    pub fn record_updates(&self) -> impl Stream<Item = Arc<DecodedRecord>> + 'static {
        WatchStream::new(self.last.subscribe()).filter_map(|opt| async move { opt })
    }

    /// Point-in-time copy of the history buffer, oldest first.
    pub fn history(&self) -> Vec<RawFrame> {
        self.history.read().snapshot()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    pub fn history_capacity(&self) -> usize {
        self.history.read().capacity()
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock()
    }

    pub fn persistence_enabled(&self) -> bool {
        self.serializer.lock().sink.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::test_utils::{
        alert_frame, ground_motion_frame, keep_alive_frame, sample_trigger, trigger_frame,
    };
    use crate::types::{AlertMessageType, Headers};
    use crate::wire::encode::{Compression, encode_ground_motion, encode_trigger};
    use anyhow::{Result, ensure};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn collecting() -> (Dispatcher, Arc<Mutex<Vec<Arc<DecodedRecord>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatcher = Dispatcher::new(200, None)
            .with_handler(move |record: Arc<DecodedRecord>| sink.lock().push(record));
        (dispatcher, seen)
    }

    #[test]
    fn trigger_becomes_last_message() -> Result<()> {
        let (dispatcher, seen) = collecting();
        ensure!(dispatcher.last_message().is_none());

        let outcome = dispatcher.dispatch(trigger_frame());
        ensure!(outcome.is_decoded());
        let last = dispatcher.last_message().ok_or_else(|| anyhow::anyhow!("no last message"))?;
        match last.as_ref() {
            DecodedRecord::Trigger(trigger) => {
                ensure!(trigger.station.to_string() == "IS.TEST.--.ENZ");
                ensure!(trigger.timestamp == 1000.5);
            }
            other => anyhow::bail!("unexpected record {other:?}"),
        }
        ensure!(seen.lock().len() == 1);
        Ok(())
    }

    #[test]
    fn keep_alive_and_unknown_are_recorded_but_not_decoded() -> Result<()> {
        let (dispatcher, seen) = collecting();
        dispatcher.dispatch(trigger_frame());
        let before = dispatcher.last_message();

        ensure!(matches!(dispatcher.dispatch(keep_alive_frame()), DispatchOutcome::KeepAlive));
        ensure!(matches!(
            dispatcher.dispatch(RawFrame::from_body(b"Zzz".to_vec())),
            DispatchOutcome::Unknown { tag: Some(b'Z') }
        ));
        ensure!(matches!(
            dispatcher.dispatch(RawFrame::from_body(Vec::new())),
            DispatchOutcome::Unknown { tag: None }
        ));

        ensure!(dispatcher.last_message() == before);
        ensure!(dispatcher.history_len() == 4);
        ensure!(seen.lock().len() == 1);
        let stats = dispatcher.stats();
        ensure!(stats.frames == 4 && stats.keep_alives == 1 && stats.unknown == 2);
        Ok(())
    }

    #[test]
    fn short_packet_body_leaves_last_message_unchanged() -> Result<()> {
        let (dispatcher, seen) = collecting();
        dispatcher.dispatch(trigger_frame());
        let before = dispatcher.last_message();

        let mut frame = encode_ground_motion(&crate::test_utils::sample_ground_motion(2), Compression::Zlib)?;
        frame[29..33].copy_from_slice(&3i32.to_be_bytes());
        let outcome = dispatcher.dispatch(RawFrame::from_body(frame));

        ensure!(matches!(
            outcome,
            DispatchOutcome::Malformed(FeedError::MalformedFrame { kind: MessageKind::GroundMotionPeak, .. })
        ));
        ensure!(dispatcher.last_message() == before);
        ensure!(seen.lock().len() == 1);
        ensure!(dispatcher.stats().malformed == 1);

        // the feed keeps going
        ensure!(dispatcher.dispatch(ground_motion_frame(2)).is_decoded());
        Ok(())
    }

    #[test]
    fn alerts_reach_handler_in_order() -> Result<()> {
        let (dispatcher, seen) = collecting();
        dispatcher.dispatch(alert_frame("4242", AlertMessageType::New, 5.5));
        dispatcher.dispatch(alert_frame("4242", AlertMessageType::Update, 5.7));

        let seen = seen.lock();
        ensure!(seen.len() == 2);
        let mags: Vec<(AlertMessageType, f64)> = seen
            .iter()
            .filter_map(|record| match record.as_ref() {
                DecodedRecord::EventAlert(alert) => Some((alert.message_type.clone(), alert.magnitude)),
                _ => None,
            })
            .collect();
        ensure!(mags == vec![(AlertMessageType::New, 5.5), (AlertMessageType::Update, 5.7)]);
        Ok(())
    }

    #[test]
    fn history_is_bounded_and_fifo() -> Result<()> {
        let dispatcher = Dispatcher::new(3, None);
        for n in 0..5u8 {
            dispatcher.dispatch(RawFrame::from_body(vec![b'K', n]));
        }
        let history = dispatcher.history();
        ensure!(history.len() == 3);
        ensure!(history.iter().map(|frame| frame.body[1]).collect::<Vec<_>>() == vec![2, 3, 4]);
        Ok(())
    }

    #[test]
    fn frames_are_persisted_before_decoding() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = FeedConfig::default();
        config.persistence = PersistenceConfig::enabled_in(dir.path());
        let dispatcher = Dispatcher::from_config(&config)?;
        ensure!(dispatcher.persistence_enabled());

        let good = encode_trigger(&sample_trigger())?;
        dispatcher.dispatch(RawFrame::new(Headers::new(), good.clone()));
        // truncated trigger: malformed, still logged
        let outcome = dispatcher.dispatch(RawFrame::from_body(good[..20].to_vec()));
        ensure!(matches!(outcome, DispatchOutcome::Malformed(_)));
        dispatcher.dispatch(ground_motion_frame(1));

        let stats = dispatcher.stats();
        ensure!(stats.persisted == 2, "stats: {stats:?}");
        let files: Vec<_> = std::fs::read_dir(dir.path())?.collect::<std::io::Result<_>>()?;
        ensure!(files.len() == 1);
        let bytes = std::fs::read(files[0].path())?;
        ensure!(bytes.len() == 4 + good.len() + 4 + 20);
        Ok(())
    }

    #[test]
    fn missing_log_directory_fails_construction() {
        let mut config = FeedConfig::default();
        config.persistence = PersistenceConfig::enabled_in("/nonexistent/quakefeed");
        assert!(matches!(
            Dispatcher::from_config(&config),
            Err(FeedError::PersistenceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn record_updates_yield_latest() -> Result<()> {
        let dispatcher = Dispatcher::new(10, None);
        let mut updates = Box::pin(dispatcher.record_updates());
        dispatcher.dispatch(trigger_frame());
        let record = tokio::time::timeout(std::time::Duration::from_secs(1), updates.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream ended"))?;
        ensure!(record.kind() == MessageKind::Trigger);
        Ok(())
    }

    // Frames from several producer threads must never interleave: every record the
    // handler sees is one frame's fields, and handler order matches history order.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn concurrent_producers_are_serialized(threads in 2usize..6, per_thread in 1usize..30) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let dispatcher = Arc::new(
                Dispatcher::new(threads * per_thread, None)
                    .with_handler(move |record: Arc<DecodedRecord>| sink.lock().push(record)),
            );

            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let dispatcher = Arc::clone(&dispatcher);
                    std::thread::spawn(move || {
                        for n in 0..per_thread {
                            let mut trigger = sample_trigger();
                            trigger.header.id = (t * 1000 + n) as i32;
                            trigger.seconds = (t * 1000 + n) as i32;
                            trigger.station.station = format!("S{t}");
                            let body = encode_trigger(&trigger).unwrap_or_default();
                            dispatcher.dispatch(RawFrame::from_body(body));
                        }
                    })
                })
                .collect();
            for handle in handles {
                prop_assert!(handle.join().is_ok());
            }

            let seen = seen.lock();
            prop_assert_eq!(seen.len(), threads * per_thread);
            let mut next_per_thread = vec![0i32; threads];
            for record in seen.iter() {
                let DecodedRecord::Trigger(trigger) = record.as_ref() else {
                    return Err(TestCaseError::fail("non-trigger record"));
                };
                let t = (trigger.header.id / 1000) as usize;
                prop_assert_eq!(trigger.seconds, trigger.header.id);
                prop_assert_eq!(&trigger.station.station, &format!("S{t}"));
                prop_assert_eq!(trigger.header.id % 1000, next_per_thread[t]);
                next_per_thread[t] += 1;
            }

            let history_ids: Vec<i32> = dispatcher
                .history()
                .iter()
                .filter_map(|frame| crate::wire::decode_trigger(&frame.body).ok())
                .map(|trigger| trigger.header.id)
                .collect();
            let handler_ids: Vec<i32> = seen
                .iter()
                .filter_map(|record| record.header().map(|header| header.id))
                .collect();
            prop_assert_eq!(history_ids, handler_ids);

            let last = dispatcher.last_message().and_then(|record| record.header().map(|h| h.id));
            prop_assert_eq!(last, seen.last().and_then(|record| record.header().map(|h| h.id)));
        }
    }
}
