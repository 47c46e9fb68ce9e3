//! Producer-side encoders for the binary message kinds
//!
//! These write the exact layouts the decoders read. They back the outbound
//! publisher's tests, the demos and the benches, and let a replay source
//! synthesize frames without a live producer.

use flate2::Compression as Level;
use flate2::write::ZlibEncoder;
use std::io::Write;

use super::format::{
    CHANNEL_SIZE, HEADER_SIZE, LOCATION_SIZE, NETWORK_SIZE, SOURCE_SIZE, STATION_SIZE,
    TRIGGER_FRAME_SIZE,
};
use crate::types::{
    BinaryHeader, GroundMotionRecord, MessageKind, ParameterPacket, ParameterRecord, PeakPacket,
    StationId, TriggerPeak, TriggerRecord, WaveformRecord,
};
use crate::{FeedError, Result};

/// Body encoding for packet-carrying messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// zlib stream, as current producers send
    #[default]
    Zlib,
    /// Raw packets, as legacy producers send
    None,
}

fn put_text(out: &mut Vec<u8>, field: &str, value: &str, width: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(FeedError::Encoding {
            field: field.to_string(),
            details: format!("'{value}' is {} bytes, field holds {width}", bytes.len()),
        });
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + width - bytes.len(), 0);
    Ok(())
}

fn put_header(out: &mut Vec<u8>, kind: MessageKind, header: &BinaryHeader) -> Result<()> {
    out.push(kind.tag().unwrap_or_default());
    out.extend_from_slice(&header.version.to_be_bytes());
    put_text(out, "source", &header.source, SOURCE_SIZE)?;
    out.extend_from_slice(&header.id.to_be_bytes());
    Ok(())
}

fn put_station(out: &mut Vec<u8>, station: &StationId, latitude: f64, longitude: f64) -> Result<()> {
    put_text(out, "station", &station.station, STATION_SIZE)?;
    put_text(out, "channel", &station.channel, CHANNEL_SIZE)?;
    put_text(out, "network", &station.network, NETWORK_SIZE)?;
    put_text(out, "location", &station.location, LOCATION_SIZE)?;
    out.extend_from_slice(&latitude.to_be_bytes());
    out.extend_from_slice(&longitude.to_be_bytes());
    Ok(())
}

fn packet_count(field_len: usize) -> Result<i32> {
    i32::try_from(field_len).map_err(|_| FeedError::Encoding {
        field: "packet_count".to_string(),
        details: format!("{field_len} packets do not fit an i32"),
    })
}

fn finish_body(out: &mut Vec<u8>, body: Vec<u8>, compression: Compression) -> Result<()> {
    match compression {
        Compression::None => out.extend_from_slice(&body),
        Compression::Zlib => {
            let body_error =
                |e: std::io::Error| FeedError::Encoding { field: "body".to_string(), details: e.to_string() };
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), Level::default());
            encoder.write_all(&body).map_err(body_error)?;
            out.extend_from_slice(&encoder.finish().map_err(body_error)?);
        }
    }
    Ok(())
}

/// Encode a trigger frame. The header's packet count is not part of the layout.
pub fn encode_trigger(record: &TriggerRecord) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(TRIGGER_FRAME_SIZE);
    put_header(&mut out, MessageKind::Trigger, &record.header)?;
    put_station(&mut out, &record.station, record.latitude, record.longitude)?;
    out.extend_from_slice(&record.seconds.to_be_bytes());
    out.extend_from_slice(&record.millis.to_be_bytes());
    Ok(out)
}

fn put_peak_packet(out: &mut Vec<u8>, packet: &PeakPacket) -> Result<()> {
    put_station(out, &packet.station, packet.latitude, packet.longitude)?;
    out.extend_from_slice(&packet.timestamp.to_be_bytes());
    out.extend_from_slice(&packet.sample_count.to_be_bytes());
    for value in [packet.sample_rate, packet.displacement, packet.velocity, packet.acceleration] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    for index in [packet.displacement_index, packet.velocity_index, packet.acceleration_index] {
        out.extend_from_slice(&index.to_be_bytes());
    }
    out.extend_from_slice(&packet.latency.to_be_bytes());
    Ok(())
}

/// Encode a ground-motion peak message. The packet count is taken from `packets`.
pub fn encode_ground_motion(record: &GroundMotionRecord, compression: Compression) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    put_header(&mut out, MessageKind::GroundMotionPeak, &record.header)?;
    out.extend_from_slice(&packet_count(record.packets.len())?.to_be_bytes());

    let mut body = Vec::new();
    for packet in &record.packets {
        put_peak_packet(&mut body, packet)?;
    }
    finish_body(&mut out, body, compression)?;
    Ok(out)
}

fn put_trigger_peak(out: &mut Vec<u8>, peak: &TriggerPeak) {
    out.extend_from_slice(&peak.value.to_be_bytes());
    out.extend_from_slice(&peak.snr.to_be_bytes());
    out.extend_from_slice(&peak.time.to_be_bytes());
}

fn put_parameter_packet(out: &mut Vec<u8>, packet: &ParameterPacket) -> Result<()> {
    put_station(out, &packet.station, packet.latitude, packet.longitude)?;
    for value in [packet.seconds, packet.millis, packet.packet_length, packet.recent_sample] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out.extend_from_slice(&packet.sample_rate.to_be_bytes());
    out.extend_from_slice(&packet.time_offset.to_be_bytes());
    out.extend_from_slice(&packet.arrival_time.to_be_bytes());
    for value in [packet.processing_time, packet.found_time, packet.queued_time, packet.sent_time] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    for values in &packet.values {
        put_trigger_peak(out, &values.tau_p);
        put_trigger_peak(out, &values.displacement);
        put_trigger_peak(out, &values.velocity);
        put_trigger_peak(out, &values.acceleration);
    }
    Ok(())
}

/// Encode a trigger parameter message. The packet count is taken from `packets`.
pub fn encode_parameters(record: &ParameterRecord, compression: Compression) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    put_header(&mut out, MessageKind::TriggerParameters, &record.header)?;
    out.extend_from_slice(&packet_count(record.packets.len())?.to_be_bytes());

    let mut body = Vec::new();
    for packet in &record.packets {
        put_parameter_packet(&mut body, packet)?;
    }
    finish_body(&mut out, body, compression)?;
    Ok(out)
}

/// Encode a raw waveform notice followed by an opaque payload.
pub fn encode_waveform(record: &WaveformRecord, payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    put_header(&mut out, MessageKind::RawWaveform, &record.header)?;
    out.extend_from_slice(&record.header.packet_count.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_trigger;
    use anyhow::{Result, ensure};

    #[test]
    fn overlong_text_fields_are_rejected() {
        let mut trigger = sample_trigger();
        trigger.station.station = "TOOLONG".to_string();
        match encode_trigger(&trigger) {
            Err(FeedError::Encoding { field, .. }) => assert_eq!(field, "station"),
            other => panic!("expected encoding error, got {other:?}"),
        }
    }

    #[test]
    fn text_fields_are_nul_padded() -> Result<()> {
        let frame = encode_trigger(&sample_trigger())?;
        // source field starts after tag and version
        ensure!(&frame[5..11] == b"onsite");
        ensure!(frame[11..25].iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn compressed_body_is_smaller_for_repetitive_packets() -> Result<()> {
        let record = crate::test_utils::sample_ground_motion(50);
        let zlib = encode_ground_motion(&record, Compression::Zlib)?;
        let raw = encode_ground_motion(&record, Compression::None)?;
        ensure!(zlib.len() < raw.len());
        ensure!(zlib[..HEADER_SIZE] == raw[..HEADER_SIZE]);
        Ok(())
    }
}
