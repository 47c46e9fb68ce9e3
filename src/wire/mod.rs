//! Wire format decoders and encoders.
//!
//! One decoder per decodable [`MessageKind`]. Every decoder takes the full frame
//! body, tag byte included, and is pure: no I/O and no shared state. Truncated
//! or corrupt input yields [`FeedError::MalformedFrame`], never a panic.
//!
//! ```rust
//! use quakefeed::types::{DecodedRecord, MessageKind};
//! use quakefeed::wire;
//!
//! let frame = b"D\0\0\0\x01dm\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x09\0\0\0\0";
//! let record = wire::decode(MessageKind::RawWaveform, frame).unwrap();
//! assert_eq!(record.header().map(|h| h.id), Some(9));
//! ```

mod alert;
pub mod encode;
pub mod format;
mod params;
mod peaks;
mod trigger;

pub use alert::{ALERT_TIME_FORMAT, decode_alert};
pub use encode::Compression;
pub use params::decode_parameters;
pub use peaks::decode_ground_motion;
pub use trigger::decode_trigger;

use crate::types::{DecodedRecord, MessageKind, WaveformRecord};
use crate::{FeedError, Result};

/// Decode a raw waveform notice. Only the header is read; the payload is not interpreted.
pub fn decode_waveform(data: &[u8]) -> Result<WaveformRecord> {
    Ok(WaveformRecord { header: format::parse_header(MessageKind::RawWaveform, data)? })
}

/// Run the decoder for `kind` over a complete frame body.
///
/// Keep-alive and unknown kinds have no decoder and are reported as malformed.
pub fn decode(kind: MessageKind, data: &[u8]) -> Result<DecodedRecord> {
    match kind {
        MessageKind::Trigger => decode_trigger(data).map(DecodedRecord::Trigger),
        MessageKind::GroundMotionPeak => {
            decode_ground_motion(data).map(DecodedRecord::GroundMotionPeak)
        }
        MessageKind::TriggerParameters => {
            decode_parameters(data).map(DecodedRecord::TriggerParameters)
        }
        MessageKind::RawWaveform => decode_waveform(data).map(DecodedRecord::RawWaveform),
        MessageKind::EventAlert => decode_alert(data).map(DecodedRecord::EventAlert),
        MessageKind::KeepAlive | MessageKind::Unknown => {
            Err(FeedError::malformed(kind, "no decoder for this kind"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_waveform, waveform_frame};
    use anyhow::{Result, ensure};

    #[test]
    fn waveform_payload_is_not_interpreted() -> Result<()> {
        let frame = waveform_frame(b"\xFF\xFE arbitrary samples");
        let record = decode(MessageKind::RawWaveform, &frame.body)?;
        ensure!(record == DecodedRecord::RawWaveform(sample_waveform()));
        Ok(())
    }

    #[test]
    fn keep_alive_has_no_decoder() {
        assert!(decode(MessageKind::KeepAlive, b"K").is_err());
        assert!(decode(MessageKind::Unknown, b"Z").is_err());
    }

    #[test]
    fn decoder_kind_follows_tag() -> Result<()> {
        let frame = waveform_frame(&[]);
        let record = decode(frame.kind(), &frame.body)?;
        ensure!(record.kind() == MessageKind::RawWaveform);
        Ok(())
    }
}
