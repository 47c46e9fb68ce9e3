//! Trigger parameter (`P`) decoder

use tracing::trace;

use super::format::{
    FieldReader, HEADER_SIZE, PARAMETER_PACKET_SIZE, join_timestamp, packet_body, packets_len,
    parse_header, require_packets,
};
use crate::Result;
use crate::types::{
    MessageKind, ParameterPacket, ParameterRecord, TRIGGER_VALUE_SLOTS, TriggerPeak, TriggerValues,
};

const KIND: MessageKind = MessageKind::TriggerParameters;

/// Decode a trigger parameter message: header, then exactly `packet_count` packets,
/// each with ten nested trigger value tuples.
pub fn decode_parameters(data: &[u8]) -> Result<ParameterRecord> {
    let header = parse_header(KIND, data)?;
    let expected = packets_len(KIND, header.packet_count, PARAMETER_PACKET_SIZE)?;
    let body = packet_body(KIND, &data[HEADER_SIZE..], expected);
    require_packets(KIND, &body, header.packet_count, PARAMETER_PACKET_SIZE)?;

    let mut reader = FieldReader::new(KIND, &body);
    let mut packets = Vec::with_capacity(header.packet_count as usize);
    for _ in 0..header.packet_count {
        packets.push(read_parameter_packet(&mut reader)?);
    }

    trace!(source = %header.source, packets = packets.len(), "Decoded trigger parameters");
    Ok(ParameterRecord { header, packets })
}

fn read_parameter_packet(reader: &mut FieldReader<'_>) -> Result<ParameterPacket> {
    let (station, latitude, longitude) = reader.read_station_block()?;
    let seconds = reader.read_i32()?;
    let millis = reader.read_i32()?;
    let packet_length = reader.read_i32()?;
    let recent_sample = reader.read_i32()?;
    let sample_rate = reader.read_f32()?;
    let time_offset = reader.read_f32()?;
    let arrival_time = reader.read_f64()?;
    let processing_time = reader.read_f32()?;
    let found_time = reader.read_f32()?;
    let queued_time = reader.read_f32()?;
    let sent_time = reader.read_f32()?;

    let mut values = [TriggerValues::default(); TRIGGER_VALUE_SLOTS];
    for slot in values.iter_mut() {
        *slot = TriggerValues {
            tau_p: read_peak(reader)?,
            displacement: read_peak(reader)?,
            velocity: read_peak(reader)?,
            acceleration: read_peak(reader)?,
        };
    }

    Ok(ParameterPacket {
        station,
        latitude,
        longitude,
        seconds,
        millis,
        timestamp: join_timestamp(KIND, seconds, millis)?,
        packet_length,
        recent_sample,
        sample_rate,
        time_offset,
        arrival_time,
        processing_time,
        found_time,
        queued_time,
        sent_time,
        values,
    })
}

fn read_peak(reader: &mut FieldReader<'_>) -> Result<TriggerPeak> {
    Ok(TriggerPeak { value: reader.read_f32()?, snr: reader.read_f32()?, time: reader.read_i32()? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeedError;
    use crate::test_utils::sample_parameters;
    use crate::wire::encode::{Compression, encode_parameters};
    use anyhow::{Result, ensure};

    #[test]
    fn compressed_and_raw_bodies_decode_identically() -> Result<()> {
        let record = sample_parameters(3);
        let compressed = decode_parameters(&encode_parameters(&record, Compression::Zlib)?)?;
        let raw = decode_parameters(&encode_parameters(&record, Compression::None)?)?;
        ensure!(compressed == raw);
        ensure!(compressed == record);
        Ok(())
    }

    #[test]
    fn nested_values_keep_band_order() -> Result<()> {
        let record = sample_parameters(1);
        let decoded = decode_parameters(&encode_parameters(&record, Compression::Zlib)?)?;
        let values = decoded.packets[0].values;
        ensure!(values.len() == TRIGGER_VALUE_SLOTS);
        for (slot, value) in values.iter().enumerate() {
            ensure!(value.tau_p.time == slot as i32);
            ensure!(value.acceleration.time == 300 + slot as i32);
        }
        Ok(())
    }

    #[test]
    fn three_claimed_two_present_is_malformed() -> Result<()> {
        let record = sample_parameters(2);
        let mut frame = encode_parameters(&record, Compression::Zlib)?;
        frame[HEADER_SIZE - 4..HEADER_SIZE].copy_from_slice(&3i32.to_be_bytes());
        match decode_parameters(&frame) {
            Err(FeedError::MalformedFrame { kind: MessageKind::TriggerParameters, details }) => {
                ensure!(details.contains("3 packets"), "details: {details}");
            }
            other => anyhow::bail!("expected malformed, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn negative_millis_are_malformed() -> Result<()> {
        let mut record = sample_parameters(1);
        record.packets[0].millis = -1;
        let frame = encode_parameters(&record, Compression::None)?;
        ensure!(decode_parameters(&frame).is_err());
        Ok(())
    }

    #[test]
    fn header_only_frame_is_malformed() {
        assert!(decode_parameters(b"P").is_err());
    }
}
