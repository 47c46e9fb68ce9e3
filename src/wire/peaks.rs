//! Ground-motion peak (`G`) decoder

use tracing::trace;

use super::format::{
    FieldReader, HEADER_SIZE, PEAK_PACKET_SIZE, packet_body, packets_len, parse_header,
    require_packets,
};
use crate::Result;
use crate::types::{GroundMotionRecord, MessageKind, PeakPacket};

const KIND: MessageKind = MessageKind::GroundMotionPeak;

/// Decode a ground-motion peak message: header, then exactly `packet_count` packets.
pub fn decode_ground_motion(data: &[u8]) -> Result<GroundMotionRecord> {
    let header = parse_header(KIND, data)?;
    let expected = packets_len(KIND, header.packet_count, PEAK_PACKET_SIZE)?;
    let body = packet_body(KIND, &data[HEADER_SIZE..], expected);
    require_packets(KIND, &body, header.packet_count, PEAK_PACKET_SIZE)?;

    let mut reader = FieldReader::new(KIND, &body);
    let mut packets = Vec::with_capacity(header.packet_count as usize);
    for _ in 0..header.packet_count {
        packets.push(read_peak_packet(&mut reader)?);
    }

    trace!(source = %header.source, packets = packets.len(), "Decoded ground-motion peaks");
    Ok(GroundMotionRecord { header, packets })
}

fn read_peak_packet(reader: &mut FieldReader<'_>) -> Result<PeakPacket> {
    let (station, latitude, longitude) = reader.read_station_block()?;
    Ok(PeakPacket {
        station,
        latitude,
        longitude,
        timestamp: reader.read_f64()?,
        sample_count: reader.read_i32()?,
        sample_rate: reader.read_f32()?,
        displacement: reader.read_f32()?,
        velocity: reader.read_f32()?,
        acceleration: reader.read_f32()?,
        displacement_index: reader.read_i32()?,
        velocity_index: reader.read_i32()?,
        acceleration_index: reader.read_i32()?,
        latency: reader.read_f32()?,
    })
}
