//! Reader for persisted binary trigger logs
//!
//! Reads the `[4-byte big-endian length][frame bytes]` records written by
//! [`PersistenceSink`](crate::persist::PersistenceSink) and hands the frames back
//! byte-exact, so a day of triggers can be pushed through a [`Dispatcher`] again.
//!
//! ```rust,no_run
//! use quakefeed::dispatch::Dispatcher;
//! use quakefeed::replay::TriggerLog;
//!
//! fn replay() -> quakefeed::Result<()> {
//!     let mut log = TriggerLog::open("log/triggers_20190312.trig")?;
//!     println!("{} frames", log.total_frames());
//!
//!     let dispatcher = Dispatcher::new(200, None);
//!     let summary = log.replay_into(&dispatcher);
//!     println!("{} decoded, {} malformed", summary.decoded, summary.malformed);
//!     Ok(())
//! }
//! ```
//!
//! The whole file is loaded and every length prefix is validated on open, so a
//! truncated tail is reported before any frame is replayed.

use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::persist::LENGTH_PREFIX_SIZE;
use crate::types::RawFrame;
use crate::{FeedError, Result};

/// Counts from one [`TriggerLog::replay_into`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: usize,
    pub decoded: usize,
    pub malformed: usize,
    pub skipped: usize,
}

/// In-memory view of one binary trigger log.
#[derive(Debug)]
pub struct TriggerLog {
    data: Vec<u8>,
    path: PathBuf,
    frames: Vec<Range<usize>>,
    current_frame: usize,
}

impl TriggerLog {
    /// Load and index a log file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data =
            std::fs::read(path).map_err(|e| FeedError::persistence_error(path.to_path_buf(), e))?;
        Self::from_bytes_with_path(data, path.to_path_buf())
    }

    /// Index log bytes already in memory.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self> {
        Self::from_bytes_with_path(data.into(), PathBuf::from("<memory>"))
    }

    fn from_bytes_with_path(data: Vec<u8>, path: PathBuf) -> Result<Self> {
        let corrupt = |details: String| FeedError::Replay { path: path.clone(), details };

        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let prefix_end = offset + LENGTH_PREFIX_SIZE;
            let Some(prefix) = data.get(offset..prefix_end) else {
                return Err(corrupt(format!(
                    "Truncated length prefix at byte {offset} ({} bytes left)",
                    data.len() - offset
                )));
            };
            let len = i32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
            let len = usize::try_from(len).map_err(|_| {
                corrupt(format!("Negative frame length {len} at byte {offset}"))
            })?;
            let end = prefix_end
                .checked_add(len)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| {
                    corrupt(format!(
                        "Frame {} at byte {offset} claims {len} bytes, {} available",
                        frames.len(),
                        data.len() - prefix_end
                    ))
                })?;
            frames.push(prefix_end..end);
            offset = end;
        }

        debug!(path = %path.display(), frames = frames.len(), bytes = data.len(), "Indexed trigger log");
        Ok(Self { data, path, frames, current_frame: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Next frame in file order, `None` at the end.
    ///
    /// Returns `Result` for symmetry with live sources; an opened log cannot fail here.
    pub fn read_next_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(range) = self.frames.get(self.current_frame) else {
            return Ok(None);
        };
        let frame = RawFrame::from_body(&self.data[range.clone()]);
        self.current_frame += 1;
        Ok(Some(frame))
    }

    /// Go back to the first frame.
    pub fn rewind(&mut self) {
        self.current_frame = 0;
    }

    /// Dispatch every remaining frame, in file order.
    ///
    /// The dispatcher treats replayed frames like live ones: a dispatcher with
    /// persistence enabled writes them again.
    pub fn replay_into(&mut self, dispatcher: &Dispatcher) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        while let Some(range) = self.frames.get(self.current_frame).cloned() {
            self.current_frame += 1;
            summary.frames += 1;
            match dispatcher.dispatch(RawFrame::from_body(&self.data[range])) {
                DispatchOutcome::Decoded(_) => summary.decoded += 1,
                DispatchOutcome::Malformed(_) => summary.malformed += 1,
                DispatchOutcome::KeepAlive | DispatchOutcome::Unknown { .. } => summary.skipped += 1,
            }
        }
        info!(
            path = %self.path.display(),
            frames = summary.frames,
            decoded = summary.decoded,
            malformed = summary.malformed,
            "Replayed trigger log"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::persist::PersistenceSink;
    use crate::test_utils::{parameters_frame, sample_trigger, trigger_frame};
    use crate::types::{DecodedRecord, MessageKind};
    use crate::wire::encode::encode_trigger;
    use anyhow::{Result, ensure};

    fn record(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as i32).to_be_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn frames_come_back_byte_exact() -> Result<()> {
        let trigger = trigger_frame();
        let params = parameters_frame(2);
        let mut bytes = record(&trigger.body);
        bytes.extend(record(&params.body));

        let mut log = TriggerLog::from_bytes(bytes)?;
        ensure!(log.total_frames() == 2);
        let first = log.read_next_frame()?.ok_or_else(|| anyhow::anyhow!("missing frame"))?;
        ensure!(first.body == trigger.body);
        let second = log.read_next_frame()?.ok_or_else(|| anyhow::anyhow!("missing frame"))?;
        ensure!(second.body == params.body);
        ensure!(log.read_next_frame()?.is_none());

        log.rewind();
        ensure!(log.current_frame() == 0);
        ensure!(log.read_next_frame()?.map(|frame| frame.kind()) == Some(MessageKind::Trigger));
        Ok(())
    }

    #[test]
    fn truncated_tail_is_reported_on_open() -> Result<()> {
        let mut bytes = record(&trigger_frame().body);
        bytes.extend_from_slice(&[0, 0, 0, 50, b'T']);
        match TriggerLog::from_bytes(bytes) {
            Err(FeedError::Replay { details, .. }) => ensure!(details.contains("Frame 1"), "{details}"),
            other => anyhow::bail!("expected replay error, got {other:?}"),
        }

        let mut bytes = record(b"T");
        bytes.extend_from_slice(&[0, 0]);
        ensure!(matches!(TriggerLog::from_bytes(bytes), Err(FeedError::Replay { .. })));
        Ok(())
    }

    #[test]
    fn negative_length_is_corrupt() {
        let bytes = (-1i32).to_be_bytes().to_vec();
        assert!(matches!(TriggerLog::from_bytes(bytes), Err(FeedError::Replay { .. })));
    }

    #[test]
    fn empty_log_has_no_frames() -> Result<()> {
        let mut log = TriggerLog::from_bytes(Vec::new())?;
        ensure!(log.total_frames() == 0);
        ensure!(log.read_next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn persisted_day_replays_through_dispatcher() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = PersistenceSink::open(&PersistenceConfig::enabled_in(dir.path()))?;
        let good = encode_trigger(&sample_trigger())?;
        let mut path = None;
        for body in [&good[..], &good[..20], &parameters_frame(1).body[..]] {
            path = sink.persist(MessageKind::of(body), body)?;
        }
        let path = path.ok_or_else(|| anyhow::anyhow!("nothing persisted"))?;

        let mut log = TriggerLog::open(&path)?;
        let dispatcher = Dispatcher::new(10, None);
        let summary = log.replay_into(&dispatcher);
        ensure!(summary == ReplaySummary { frames: 3, decoded: 2, malformed: 1, skipped: 0 });
        ensure!(dispatcher.history_len() == 3);
        let last = dispatcher.last_message().ok_or_else(|| anyhow::anyhow!("no record"))?;
        ensure!(matches!(last.as_ref(), DecodedRecord::TriggerParameters(_)));

        // a second pass has nothing left
        ensure!(log.replay_into(&dispatcher).frames == 0);
        Ok(())
    }

    #[test]
    fn missing_file_is_a_persistence_error() {
        let result = TriggerLog::open("/nonexistent/quakefeed/triggers.trig");
        assert!(matches!(result, Err(FeedError::Persistence { .. })));
    }
}
