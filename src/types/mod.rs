//! Core types for feed data representation.
//!
//! This module provides the data structures that flow through the feed:
//! undecoded frames as delivered by the broker, their kind classification,
//! and the typed records the decoders produce.
//!
//! ## Architecture
//!
//! - [`RawFrame`] is one broker message with zero-copy shared body bytes
//! - [`MessageKind`] classifies a frame by its leading tag byte
//! - [`DecodedRecord`] is the tagged union of the five decodable shapes
//! - [`StationId`] and [`BinaryHeader`] are shared by the binary record shapes
//!
//! ## Usage Example
//!
//! ```rust
//! use quakefeed::types::{MessageKind, RawFrame};
//!
//! let frame = RawFrame::from_body(b"K".to_vec());
//! assert_eq!(frame.kind(), MessageKind::KeepAlive);
//! assert!(!frame.kind().is_decodable());
//! ```

mod alert;
mod frame;
mod kind;
mod record;
mod station;

pub use alert::{AlertMessageType, AlertUncertainty, EventAlert};
pub use frame::{Headers, RawFrame};
pub use kind::MessageKind;
pub use record::{
    DecodedRecord, GroundMotionRecord, ParameterPacket, ParameterRecord, PeakPacket,
    TRIGGER_VALUE_SLOTS, TriggerPeak, TriggerRecord, TriggerValues, WaveformRecord, epoch_to_utc,
};
pub use station::{BinaryHeader, StationId};
