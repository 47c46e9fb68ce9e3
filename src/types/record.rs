//! Decoded record shapes, one per decodable message kind

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{BinaryHeader, EventAlert, MessageKind, StationId};

/// Number of trigger value tuples embedded in every parameter packet.
pub const TRIGGER_VALUE_SLOTS: usize = 10;

/// Convert fractional epoch seconds to a UTC instant.
///
/// Returns `None` for non-finite or out-of-range values.
pub fn epoch_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Single-station trigger (`T`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerRecord {
    pub header: BinaryHeader,
    pub station: StationId,
    pub latitude: f64,
    pub longitude: f64,
    /// Integer seconds as sent on the wire
    pub seconds: i32,
    /// Integer milliseconds as sent on the wire
    pub millis: i32,
    /// `seconds` and `millis` joined as decimal digits, in epoch seconds
    pub timestamp: f64,
}

impl TriggerRecord {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.timestamp)
    }
}

/// Per-station peak values inside a ground-motion message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakPacket {
    pub station: StationId,
    pub latitude: f64,
    pub longitude: f64,
    /// Sample time in epoch seconds
    pub timestamp: f64,
    pub sample_count: i32,
    pub sample_rate: f32,
    pub displacement: f32,
    pub velocity: f32,
    pub acceleration: f32,
    pub displacement_index: i32,
    pub velocity_index: i32,
    pub acceleration_index: i32,
    /// Estimated latency in seconds
    pub latency: f32,
}

/// Ground-motion peaks (`G`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundMotionRecord {
    pub header: BinaryHeader,
    pub packets: Vec<PeakPacket>,
}

/// Peak value, signal-to-noise ratio and time of peak for one band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TriggerPeak {
    pub value: f32,
    pub snr: f32,
    pub time: i32,
}

/// One nested trigger value tuple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TriggerValues {
    /// Short-period estimate
    pub tau_p: TriggerPeak,
    pub displacement: TriggerPeak,
    pub velocity: TriggerPeak,
    pub acceleration: TriggerPeak,
}

/// Per-station trigger parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterPacket {
    pub station: StationId,
    pub latitude: f64,
    pub longitude: f64,
    pub seconds: i32,
    pub millis: i32,
    /// `seconds` and `millis` joined as decimal digits, in epoch seconds
    pub timestamp: f64,
    pub packet_length: i32,
    pub recent_sample: i32,
    pub sample_rate: f32,
    pub time_offset: f32,
    pub arrival_time: f64,
    pub processing_time: f32,
    pub found_time: f32,
    pub queued_time: f32,
    pub sent_time: f32,
    pub values: [TriggerValues; TRIGGER_VALUE_SLOTS],
}

/// Trigger parameters (`P`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRecord {
    pub header: BinaryHeader,
    pub packets: Vec<ParameterPacket>,
}

/// Raw waveform notice (`D`). The payload is not interpreted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformRecord {
    pub header: BinaryHeader,
}

/// A successfully decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum DecodedRecord {
    Trigger(TriggerRecord),
    GroundMotionPeak(GroundMotionRecord),
    TriggerParameters(ParameterRecord),
    RawWaveform(WaveformRecord),
    EventAlert(EventAlert),
}

impl DecodedRecord {
    pub fn kind(&self) -> MessageKind {
        match self {
            DecodedRecord::Trigger(_) => MessageKind::Trigger,
            DecodedRecord::GroundMotionPeak(_) => MessageKind::GroundMotionPeak,
            DecodedRecord::TriggerParameters(_) => MessageKind::TriggerParameters,
            DecodedRecord::RawWaveform(_) => MessageKind::RawWaveform,
            DecodedRecord::EventAlert(_) => MessageKind::EventAlert,
        }
    }

    /// Producing system: the header source for binary kinds, `orig_sys` for alerts.
    pub fn source(&self) -> &str {
        match self {
            DecodedRecord::Trigger(record) => &record.header.source,
            DecodedRecord::GroundMotionPeak(record) => &record.header.source,
            DecodedRecord::TriggerParameters(record) => &record.header.source,
            DecodedRecord::RawWaveform(record) => &record.header.source,
            DecodedRecord::EventAlert(alert) => &alert.orig_sys,
        }
    }

    /// Binary header, absent for XML alerts.
    pub fn header(&self) -> Option<&BinaryHeader> {
        match self {
            DecodedRecord::Trigger(record) => Some(&record.header),
            DecodedRecord::GroundMotionPeak(record) => Some(&record.header),
            DecodedRecord::TriggerParameters(record) => Some(&record.header),
            DecodedRecord::RawWaveform(record) => Some(&record.header),
            DecodedRecord::EventAlert(_) => None,
        }
    }
}
