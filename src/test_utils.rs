//! Test fixtures: reference records and the frames producers would send for them
//!
//! Every builder is deterministic so tests can compare decoded output against
//! the record that was encoded.

#![cfg(any(test, feature = "benchmark"))]

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::types::{
    AlertMessageType, AlertUncertainty, BinaryHeader, EventAlert, GroundMotionRecord, Headers,
    ParameterPacket, ParameterRecord, PeakPacket, RawFrame, StationId, TRIGGER_VALUE_SLOTS,
    TriggerPeak, TriggerRecord, TriggerValues, WaveformRecord,
};
use crate::wire::encode::{
    Compression, encode_ground_motion, encode_parameters, encode_trigger, encode_waveform,
};

/// Destination the fixtures pretend to arrive on.
pub const SAMPLE_DESTINATION: &str = "/topic/eew.sys.dm.data";

/// Alert envelope as the decision module publishes it.
pub const SAMPLE_ALERT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<event_message alg_vers="3.1.4" category="live" instance="dm@eew" message_type="new" orig_sys="dm" timestamp="2019-03-12T08:15:03.250Z" version="0">
  <core_info id="1234">
    <mag units="Mw">5.5</mag>
    <mag_uncer units="Mw">0.5</mag_uncer>
    <lat units="deg">32.5</lat>
    <lat_uncer units="deg">0.1</lat_uncer>
    <lon units="deg">35.0</lon>
    <lon_uncer units="deg">0.1</lon_uncer>
    <depth units="km">8.0</depth>
    <depth_uncer units="km">5.0</depth_uncer>
    <orig_time units="UTC">2019-03-12T08:15:00.250Z</orig_time>
    <orig_time_uncer units="sec">1.0</orig_time_uncer>
    <likelihood>0.991</likelihood>
    <num_stations>4</num_stations>
  </core_info>
</event_message>
"#;

fn header(source: &str, id: i32, packet_count: i32) -> BinaryHeader {
    BinaryHeader { version: 1, source: source.to_string(), id, packet_count }
}

fn station(code: &str) -> StationId {
    StationId::new("IS", code, "--", "ENZ")
}

fn joined(seconds: i32, millis: i32) -> f64 {
    format!("{seconds}.{millis}").parse().unwrap_or_default()
}

fn headers() -> Headers {
    let mut headers = Headers::new();
    headers.insert("destination", SAMPLE_DESTINATION);
    headers
}

/// Trigger from station `IS.TEST.--.ENZ` at `1000.5`.
pub fn sample_trigger() -> TriggerRecord {
    TriggerRecord {
        header: header("onsite", 7, 1),
        station: station("TEST"),
        latitude: 31.5,
        longitude: 35.0,
        seconds: 1000,
        millis: 5,
        timestamp: 1000.5,
    }
}

/// Peak packet for `code`; `index` varies the time and the peak values.
pub fn sample_peak_packet(code: &str, index: usize) -> PeakPacket {
    let step = index as f32;
    PeakPacket {
        station: station(code),
        latitude: 31.75,
        longitude: 35.25,
        timestamp: 1_552_378_500.0 + index as f64,
        sample_count: 100,
        sample_rate: 100.0,
        displacement: 0.001 * (step + 1.0),
        velocity: 0.01 * (step + 1.0),
        acceleration: 0.1 * (step + 1.0),
        displacement_index: 10,
        velocity_index: 20,
        acceleration_index: 30,
        latency: 0.75,
    }
}

/// Ground-motion message with `count` packets from stations `S0`, `S1`, ...
pub fn sample_ground_motion(count: usize) -> GroundMotionRecord {
    GroundMotionRecord {
        header: header("gmpeak", 11, count as i32),
        packets: (0..count).map(|n| sample_peak_packet(&format!("S{}", n % 10), n)).collect(),
    }
}

/// Parameter packet for `code`. Slot `n` carries times `n`, `100+n`, `200+n`
/// and `300+n` for tau-p, displacement, velocity and acceleration.
pub fn sample_parameter_packet(code: &str, index: usize) -> ParameterPacket {
    let seconds = 1000 + index as i32;
    let millis = 250;
    let mut values = [TriggerValues::default(); TRIGGER_VALUE_SLOTS];
    for (slot, value) in values.iter_mut().enumerate() {
        let slot = slot as i32;
        let peak = |band: i32| TriggerPeak {
            value: 0.5 * (band + 1) as f32,
            snr: 12.0,
            time: band * 100 + slot,
        };
        *value = TriggerValues { tau_p: peak(0), displacement: peak(1), velocity: peak(2), acceleration: peak(3) };
    }
    ParameterPacket {
        station: station(code),
        latitude: 31.75,
        longitude: 35.25,
        seconds,
        millis,
        timestamp: joined(seconds, millis),
        packet_length: 3,
        recent_sample: 300,
        sample_rate: 100.0,
        time_offset: 0.0,
        arrival_time: 1000.125,
        processing_time: 0.5,
        found_time: 0.25,
        queued_time: 0.125,
        sent_time: 0.0625,
        values,
    }
}

/// Parameter message with `count` packets.
pub fn sample_parameters(count: usize) -> ParameterRecord {
    ParameterRecord {
        header: header("params", 13, count as i32),
        packets: (0..count).map(|n| sample_parameter_packet(&format!("P{n}"), n)).collect(),
    }
}

/// Waveform notice `9` from source `dm`.
pub fn sample_waveform() -> WaveformRecord {
    WaveformRecord { header: header("dm", 9, 0) }
}

/// Alert for `event_id` with the reference location and millisecond timestamps.
pub fn sample_alert(event_id: &str, message_type: AlertMessageType, magnitude: f64) -> EventAlert {
    let origin_time: DateTime<Utc> = Utc
        .with_ymd_and_hms(2019, 3, 12, 8, 15, 0)
        .single()
        .unwrap_or_default()
        + Duration::milliseconds(250);
    let mut alert = EventAlert::new(event_id, magnitude, 32.5, 35.0, 8.0, origin_time);
    alert.timestamp = origin_time + Duration::seconds(3);
    alert.message_type = message_type;
    alert.instance = Some("dm@eew".to_string());
    alert.alg_vers = Some("3.1.4".to_string());
    alert.uncertainty = AlertUncertainty {
        magnitude: Some(0.5),
        latitude: Some(0.1),
        longitude: Some(0.1),
        depth: Some(5.0),
        origin_time: Some(1.0),
    };
    alert.likelihood = Some(0.991);
    alert.num_stations = Some(4);
    alert
}

/// Frame carrying [`sample_trigger`].
pub fn trigger_frame() -> RawFrame {
    let body = encode_trigger(&sample_trigger()).expect("sample trigger encodes");
    RawFrame::new(headers(), body)
}

/// Zlib-compressed frame carrying [`sample_ground_motion`].
pub fn ground_motion_frame(count: usize) -> RawFrame {
    let body = encode_ground_motion(&sample_ground_motion(count), Compression::Zlib)
        .expect("sample ground motion encodes");
    RawFrame::new(headers(), body)
}

/// Zlib-compressed frame carrying [`sample_parameters`].
pub fn parameters_frame(count: usize) -> RawFrame {
    let body = encode_parameters(&sample_parameters(count), Compression::Zlib)
        .expect("sample parameters encode");
    RawFrame::new(headers(), body)
}

/// Frame carrying [`sample_waveform`] followed by `payload`.
pub fn waveform_frame(payload: &[u8]) -> RawFrame {
    let body = encode_waveform(&sample_waveform(), payload).expect("sample waveform encodes");
    RawFrame::new(headers(), body)
}

pub fn keep_alive_frame() -> RawFrame {
    RawFrame::new(headers(), b"K".to_vec())
}

/// Frame carrying [`sample_alert`] as XML.
pub fn alert_frame(event_id: &str, message_type: AlertMessageType, magnitude: f64) -> RawFrame {
    let xml = sample_alert(event_id, message_type, magnitude).to_xml().expect("sample alert renders");
    RawFrame::new(headers(), xml.into_bytes())
}
