//! Message kind classification by leading tag byte

use serde::Serialize;
use std::fmt;

/// Structural format of an inbound frame, selected by its first byte.
///
/// Assignment is pure and total: any byte that is not a known tag (and an
/// empty frame) maps to [`MessageKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    /// `T`: single-station trigger, uncompressed.
    Trigger,
    /// `G`: ground-motion peak packets.
    GroundMotionPeak,
    /// `P`: trigger parameter packets.
    TriggerParameters,
    /// `D`: raw waveform notice (header only).
    RawWaveform,
    /// `<`: XML event alert.
    EventAlert,
    /// `K`: broker keep-alive, never decoded.
    KeepAlive,
    /// Any other tag byte.
    Unknown,
}

impl MessageKind {
    pub const TRIGGER_TAG: u8 = b'T';
    pub const GROUND_MOTION_TAG: u8 = b'G';
    pub const PARAMETERS_TAG: u8 = b'P';
    pub const WAVEFORM_TAG: u8 = b'D';
    pub const ALERT_TAG: u8 = b'<';
    pub const KEEP_ALIVE_TAG: u8 = b'K';

    /// Map a tag byte to its kind.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            Self::TRIGGER_TAG => MessageKind::Trigger,
            Self::GROUND_MOTION_TAG => MessageKind::GroundMotionPeak,
            Self::PARAMETERS_TAG => MessageKind::TriggerParameters,
            Self::WAVEFORM_TAG => MessageKind::RawWaveform,
            Self::ALERT_TAG => MessageKind::EventAlert,
            Self::KEEP_ALIVE_TAG => MessageKind::KeepAlive,
            _ => MessageKind::Unknown,
        }
    }

    /// Classify a frame body by its first byte.
    pub fn of(body: &[u8]) -> Self {
        body.first().map_or(MessageKind::Unknown, |&tag| Self::from_tag(tag))
    }

    /// Wire tag for this kind, `None` for [`MessageKind::Unknown`].
    pub fn tag(self) -> Option<u8> {
        match self {
            MessageKind::Trigger => Some(Self::TRIGGER_TAG),
            MessageKind::GroundMotionPeak => Some(Self::GROUND_MOTION_TAG),
            MessageKind::TriggerParameters => Some(Self::PARAMETERS_TAG),
            MessageKind::RawWaveform => Some(Self::WAVEFORM_TAG),
            MessageKind::EventAlert => Some(Self::ALERT_TAG),
            MessageKind::KeepAlive => Some(Self::KEEP_ALIVE_TAG),
            MessageKind::Unknown => None,
        }
    }

    /// Whether frames of this kind carry the shared binary header.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            MessageKind::Trigger
                | MessageKind::GroundMotionPeak
                | MessageKind::TriggerParameters
                | MessageKind::RawWaveform
        )
    }

    /// Whether frames of this kind produce a decoded record.
    pub fn is_decodable(self) -> bool {
        self.is_binary() || self == MessageKind::EventAlert
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Trigger => "Trigger",
            MessageKind::GroundMotionPeak => "GroundMotionPeak",
            MessageKind::TriggerParameters => "TriggerParameters",
            MessageKind::RawWaveform => "RawWaveform",
            MessageKind::EventAlert => "EventAlert",
            MessageKind::KeepAlive => "KeepAlive",
            MessageKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}
