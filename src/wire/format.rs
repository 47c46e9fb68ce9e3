//! Binary wire format structures and parsing
//!
//! Defines the fixed layouts shared by the binary message kinds and the
//! bounds-checked helpers every decoder reads through.
//!
//! ## Frame Structure
//!
//! 1. **Tag** (1 byte) - message kind, see [`MessageKind`]
//! 2. **Header** (32 bytes) - version, 20-byte source name, id, packet count
//! 3. **Body** - `packet_count` fixed-size packets, zlib-compressed or raw
//!
//! Trigger frames are the exception: the station fields follow the id directly
//! and there is no packet count.
//!
//! All multi-byte numbers are big-endian. Every read is bounds-checked and a
//! short buffer is reported as [`FeedError::MalformedFrame`], never a panic.

use flate2::read::ZlibDecoder;
use std::io::Read;
use tracing::trace;

use crate::types::{BinaryHeader, MessageKind, StationId};
use crate::{FeedError, Result};

// Size constants for the producer structures
pub const TAG_SIZE: usize = 1;
pub const SOURCE_SIZE: usize = 20;
pub const HEADER_SIZE: usize = TAG_SIZE + 4 + SOURCE_SIZE + 4 + 4;
pub const STATION_SIZE: usize = 5;
pub const CHANNEL_SIZE: usize = 4;
pub const NETWORK_SIZE: usize = 3;
pub const LOCATION_SIZE: usize = 3;
/// sta + chn + net + loc + lat + lon
pub const STATION_BLOCK_SIZE: usize = STATION_SIZE + CHANNEL_SIZE + NETWORK_SIZE + LOCATION_SIZE + 16;
pub const TRIGGER_FRAME_SIZE: usize = TAG_SIZE + 4 + SOURCE_SIZE + 4 + STATION_BLOCK_SIZE + 8;
pub const PEAK_PACKET_SIZE: usize = STATION_BLOCK_SIZE + 8 + 4 + 4 * 4 + 3 * 4 + 4;
pub const TRIGGER_VALUES_SIZE: usize = 4 * (4 + 4 + 4);
pub const PARAMETER_PACKET_SIZE: usize =
    STATION_BLOCK_SIZE + 4 * 4 + 4 + 4 + 8 + 4 * 4 + 10 * TRIGGER_VALUES_SIZE;

/// Upper bound on the packet count a header may claim.
pub const MAX_PACKETS: i32 = 100_000;

/// Sequential big-endian reader over one structure.
///
/// Errors carry the message kind so the dispatcher can report which decoder failed.
#[derive(Debug)]
pub struct FieldReader<'a> {
    kind: MessageKind,
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(kind: MessageKind, data: &'a [u8]) -> Self {
        Self { kind, data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(FeedError::malformed(
                self.kind,
                format!(
                    "Insufficient data for {} at offset {} (need {} bytes, have {})",
                    what,
                    self.offset,
                    len,
                    self.remaining()
                ),
            ));
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len, "padding").map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>("u8")?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array("i32")?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.array("f32")?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array("f64")?))
    }

    /// Fixed-width text field, normalized with [`extract_text`].
    pub fn read_text(&mut self, width: usize) -> Result<String> {
        Ok(extract_text(self.take(width, "text field")?))
    }

    /// The sta/chn/net/loc/lat/lon block that opens every station structure.
    pub fn read_station_block(&mut self) -> Result<(StationId, f64, f64)> {
        let station = self.read_text(STATION_SIZE)?;
        let channel = self.read_text(CHANNEL_SIZE)?;
        let network = self.read_text(NETWORK_SIZE)?;
        let location = self.read_text(LOCATION_SIZE)?;
        let latitude = self.read_f64()?;
        let longitude = self.read_f64()?;
        Ok((StationId { network, station, location, channel }, latitude, longitude))
    }

    /// Unread bytes from the current offset.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.offset.min(self.data.len())..]
    }
}

/// Fixed-width text: cut at the first NUL, trailing spaces trimmed, lossy UTF-8.
///
/// One normalization step for both legacy NUL-padded and space-padded producers.
pub fn extract_text(bytes: &[u8]) -> String {
    let null_pos = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..null_pos]).trim_end_matches(' ').to_string()
}

/// Parse the shared header, tag byte included.
pub fn parse_header(kind: MessageKind, data: &[u8]) -> Result<BinaryHeader> {
    let mut reader = FieldReader::new(kind, data);
    reader.skip(TAG_SIZE)?;
    let version = reader.read_i32()?;
    let source = reader.read_text(SOURCE_SIZE)?;
    let id = reader.read_i32()?;
    let packet_count = reader.read_i32()?;

    trace!(%kind, version, %source, id, packet_count, "Parsed binary header");

    let header = BinaryHeader { version, source, id, packet_count };
    validate_header(kind, &header)?;
    Ok(header)
}

/// Reject packet counts that are negative or unreasonably large.
pub fn validate_header(kind: MessageKind, header: &BinaryHeader) -> Result<()> {
    if header.packet_count < 0 {
        return Err(FeedError::malformed(
            kind,
            format!("Packet count cannot be negative ({})", header.packet_count),
        ));
    }
    if header.packet_count > MAX_PACKETS {
        return Err(FeedError::malformed(
            kind,
            format!("Packet count {} is unreasonably large", header.packet_count),
        ));
    }
    Ok(())
}

/// Join integer seconds and milliseconds as decimal digits and parse the result.
///
/// `(1000, 500)` gives `1000.5` and `(1000, 5)` also gives `1000.5`: the
/// producers' recombination rule, kept bit-for-bit.
pub fn join_timestamp(kind: MessageKind, seconds: i32, millis: i32) -> Result<f64> {
    let joined = format!("{seconds}.{millis}");
    joined.parse::<f64>().map_err(|e| {
        FeedError::malformed(kind, format!("Cannot parse timestamp '{joined}': {e}"))
    })
}

/// Body bytes after the header, inflated when they are a zlib stream.
///
/// Inflation is bounded to `expected` bytes. When the body is not a valid zlib
/// stream it is returned unchanged: some producers skip compression.
pub fn packet_body(kind: MessageKind, body: &[u8], expected: usize) -> Vec<u8> {
    let mut inflated = Vec::with_capacity(expected.min(body.len().saturating_mul(4)));
    let limit = u64::try_from(expected).unwrap_or(u64::MAX);
    match ZlibDecoder::new(body).take(limit).read_to_end(&mut inflated) {
        Ok(_) => {
            trace!(%kind, compressed = body.len(), inflated = inflated.len(), "Inflated body");
            inflated
        }
        Err(e) => {
            trace!(%kind, error = %e, "Body is not zlib, reading raw packets");
            body.to_vec()
        }
    }
}

/// Byte length of `count` packets, checked against overflow.
pub fn packets_len(kind: MessageKind, count: i32, packet_size: usize) -> Result<usize> {
    usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(packet_size))
        .ok_or_else(|| FeedError::malformed(kind, format!("Packet count {count} overflows")))
}

/// Require `data` to hold at least `count` packets.
pub fn require_packets(kind: MessageKind, data: &[u8], count: i32, packet_size: usize) -> Result<()> {
    let needed = packets_len(kind, count, packet_size)?;
    if data.len() < needed {
        return Err(FeedError::malformed(
            kind,
            format!(
                "Header claims {} packets ({} bytes) but body holds {} bytes",
                count,
                needed,
                data.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, ensure};
    use proptest::prelude::*;

    #[test]
    fn layout_sizes_match_producer_structures() {
        assert_eq!(HEADER_SIZE, 33);
        assert_eq!(TRIGGER_FRAME_SIZE, 68);
        assert_eq!(PEAK_PACKET_SIZE, 75);
        assert_eq!(TRIGGER_VALUES_SIZE, 48);
        assert_eq!(PARAMETER_PACKET_SIZE, 559);
    }

    #[test]
    fn text_fields_cut_at_nul_and_trim_spaces() {
        assert_eq!(extract_text(b"TEST\0"), "TEST");
        assert_eq!(extract_text(b"IS "), "IS");
        assert_eq!(extract_text(b"AB\0CD"), "AB");
        assert_eq!(extract_text(b"\0\0\0"), "");
        assert_eq!(extract_text(b"--\0"), "--");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        assert_eq!(extract_text(&[0x41, 0xFF, 0x42]), "A\u{FFFD}B");
    }

    #[test]
    fn short_reads_are_malformed() -> Result<()> {
        let mut reader = FieldReader::new(MessageKind::Trigger, &[0, 0, 1]);
        let err = match reader.read_i32() {
            Err(err) => err,
            Ok(value) => anyhow::bail!("read {value} from three bytes"),
        };
        ensure!(matches!(err, FeedError::MalformedFrame { kind: MessageKind::Trigger, .. }));
        ensure!(reader.offset() == 0, "failed read must not advance");
        Ok(())
    }

    #[test]
    fn big_endian_fields() -> Result<()> {
        let mut data = Vec::new();
        data.extend_from_slice(&7i32.to_be_bytes());
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.extend_from_slice(&(-2.25f64).to_be_bytes());
        let mut reader = FieldReader::new(MessageKind::GroundMotionPeak, &data);
        ensure!(reader.read_i32()? == 7);
        ensure!(reader.read_f32()? == 1.5);
        ensure!(reader.read_f64()? == -2.25);
        ensure!(reader.remaining() == 0);
        Ok(())
    }

    #[test]
    fn timestamp_joins_digits() -> Result<()> {
        ensure!(join_timestamp(MessageKind::Trigger, 1000, 500)? == 1000.5);
        ensure!(join_timestamp(MessageKind::Trigger, 1000, 5)? == 1000.5);
        ensure!(join_timestamp(MessageKind::Trigger, 1000, 50)? == 1000.5);
        ensure!(join_timestamp(MessageKind::Trigger, 1000, 0)? == 1000.0);
        ensure!(join_timestamp(MessageKind::Trigger, 1000, 123)? == 1000.123);
        Ok(())
    }

    #[test]
    fn negative_millis_do_not_parse() {
        assert!(join_timestamp(MessageKind::TriggerParameters, 1000, -5).is_err());
    }

    #[test]
    fn header_rejects_negative_and_huge_counts() {
        let header = BinaryHeader { packet_count: -1, ..Default::default() };
        assert!(validate_header(MessageKind::GroundMotionPeak, &header).is_err());
        let header = BinaryHeader { packet_count: MAX_PACKETS + 1, ..Default::default() };
        assert!(validate_header(MessageKind::GroundMotionPeak, &header).is_err());
        let header = BinaryHeader { packet_count: 0, ..Default::default() };
        assert!(validate_header(MessageKind::GroundMotionPeak, &header).is_ok());
    }

    #[test]
    fn non_zlib_body_falls_back_to_raw() {
        let raw = b"TEST\0not compressed at all".to_vec();
        assert_eq!(packet_body(MessageKind::GroundMotionPeak, &raw, 10), raw);
    }

    #[test]
    fn large_packet_count_does_not_preallocate_for_small_bodies() {
        let expected = MAX_PACKETS as usize * PARAMETER_PACKET_SIZE;
        let raw = b"tiny".to_vec();
        let body = packet_body(MessageKind::TriggerParameters, &raw, expected);
        assert_eq!(body, raw);

        let compressed = {
            use flate2::{Compression, write::ZlibEncoder};
            use std::io::Write;
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&[7u8; 32]).unwrap();
            encoder.finish().unwrap()
        };
        let inflated = packet_body(MessageKind::TriggerParameters, &compressed, expected);
        assert_eq!(inflated, vec![7u8; 32]);
        assert!(inflated.capacity() < 4096);
    }

    proptest! {
        #[test]
        fn field_reader_never_panics(data in prop::collection::vec(any::<u8>(), 0..64), width in 0usize..80) {
            let mut reader = FieldReader::new(MessageKind::TriggerParameters, &data);
            let _ = reader.read_text(width);
            let _ = reader.read_f64();
            let _ = reader.read_station_block();
            prop_assert!(reader.offset() <= data.len());
        }

        #[test]
        fn parse_header_never_panics(data in prop::collection::vec(any::<u8>(), 0..48)) {
            let _ = parse_header(MessageKind::GroundMotionPeak, &data);
        }
    }
}
