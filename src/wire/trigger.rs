//! Trigger (`T`) decoder

use tracing::trace;

use super::format::{FieldReader, SOURCE_SIZE, TAG_SIZE, join_timestamp};
use crate::Result;
use crate::types::{BinaryHeader, MessageKind, TriggerRecord};

const KIND: MessageKind = MessageKind::Trigger;

/// Decode a single-station trigger.
///
/// The station block follows the id directly; the record reports one packet.
/// Bytes after the fixed structure are ignored.
pub fn decode_trigger(data: &[u8]) -> Result<TriggerRecord> {
    let mut reader = FieldReader::new(KIND, data);
    reader.skip(TAG_SIZE)?;
    let version = reader.read_i32()?;
    let source = reader.read_text(SOURCE_SIZE)?;
    let id = reader.read_i32()?;
    let (station, latitude, longitude) = reader.read_station_block()?;
    let seconds = reader.read_i32()?;
    let millis = reader.read_i32()?;
    let timestamp = join_timestamp(KIND, seconds, millis)?;

    trace!(%station, timestamp, "Decoded trigger");

    Ok(TriggerRecord {
        header: BinaryHeader { version, source, id, packet_count: 1 },
        station,
        latitude,
        longitude,
        seconds,
        millis,
        timestamp,
    })
}
