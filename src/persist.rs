//! Append-only day-bucketed logs for trigger-class and alert frames
//!
//! # File Format
//!
//! Binary log (`Trigger` and `TriggerParameters` frames), one record per frame:
//! ```text
//! [4-byte big-endian length][exact frame bytes]
//! ```
//!
//! Text log (`EventAlert` frames), one line per frame:
//! ```text
//! 2019-03-12T08:15:03.250Z <?xml ...?><event_message ...>...</event_message>
//! ```
//!
//! Files are bucketed by the UTC calendar date of the write:
//! `{directory}/{prefix}{YYYYMMDD}{extension}`. Other kinds are not persisted.

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::config::PersistenceConfig;
use crate::types::MessageKind;
use crate::{FeedError, Result};

/// Size of the binary record length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Date bucket format for log file names
const DAY_FORMAT: &str = "%Y%m%d";

/// Writer for the two persisted frame families.
#[derive(Debug, Clone)]
pub struct PersistenceSink {
    config: PersistenceConfig,
}

impl PersistenceSink {
    /// Open the sink, failing if the configured directory does not exist.
    ///
    /// A missing directory is fatal: a feed configured for durability must not
    /// start without it.
    pub fn open(config: &PersistenceConfig) -> Result<Self> {
        if !config.directory.is_dir() {
            return Err(FeedError::persistence_unavailable(&config.directory));
        }
        Ok(Self { config: config.clone() })
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Whether frames of `kind` are written by this sink.
    pub fn persists(kind: MessageKind) -> bool {
        matches!(
            kind,
            MessageKind::Trigger | MessageKind::TriggerParameters | MessageKind::EventAlert
        )
    }

    /// Binary log path for the UTC day of `now`.
    pub fn trigger_log_path(&self, now: DateTime<Utc>) -> PathBuf {
        self.day_path(&self.config.trigger_prefix, &self.config.trigger_extension, now)
    }

    /// Text log path for the UTC day of `now`.
    pub fn event_log_path(&self, now: DateTime<Utc>) -> PathBuf {
        self.day_path(&self.config.event_prefix, &self.config.event_extension, now)
    }

    fn day_path(&self, prefix: &str, extension: &str, now: DateTime<Utc>) -> PathBuf {
        self.config.directory.join(format!("{prefix}{}{extension}", now.format(DAY_FORMAT)))
    }

    /// Persist a frame stamped with the current time.
    ///
    /// Returns the file written, or `None` when the kind is not persisted.
    pub fn persist(&self, kind: MessageKind, body: &[u8]) -> Result<Option<PathBuf>> {
        self.persist_at(kind, body, Utc::now())
    }

    /// Persist a frame as if written at `now`.
    pub fn persist_at(
        &self,
        kind: MessageKind,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<PathBuf>> {
        let (path, record) = match kind {
            MessageKind::Trigger | MessageKind::TriggerParameters => {
                let len = i32::try_from(body.len()).map_err(|_| FeedError::Encoding {
                    field: "length prefix".to_string(),
                    details: format!("{} byte frame exceeds i32", body.len()),
                })?;
                let mut record = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
                record.extend_from_slice(&len.to_be_bytes());
                record.extend_from_slice(body);
                (self.trigger_log_path(now), record)
            }
            MessageKind::EventAlert => {
                let stamp = now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
                let mut record = Vec::with_capacity(stamp.len() + body.len() + 2);
                record.extend_from_slice(stamp.as_bytes());
                record.push(b' ');
                record.extend_from_slice(body);
                record.push(b'\n');
                (self.event_log_path(now), record)
            }
            _ => return Ok(None),
        };

        append(&path, &record)?;
        trace!(%kind, path = %path.display(), bytes = record.len(), "Persisted frame");
        Ok(Some(path))
    }
}

fn append(path: &Path, record: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FeedError::persistence_error(path.to_path_buf(), e))?;
    file.write_all(record).map_err(|e| FeedError::persistence_error(path.to_path_buf(), e))
}
