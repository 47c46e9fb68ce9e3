//! Listen to a STOMP broker and print every decoded record.
//!
//! ```text
//! cargo run --example listen -- feed.yaml
//! RUST_LOG=quakefeed=debug cargo run --example listen
//! ```
//!
//! Without a config file the defaults are used: `localhost:61613`, topic
//! `/topic/eew.sys.dm.data`, persistence off.

use quakefeed::{DecodedRecord, Feed, FeedConfig};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

fn describe(record: &DecodedRecord) -> String {
    match record {
        DecodedRecord::Trigger(trigger) => {
            format!("trigger {} at {:.3}", trigger.station, trigger.timestamp)
        }
        DecodedRecord::GroundMotionPeak(peaks) => {
            let strongest = peaks
                .packets
                .iter()
                .max_by(|a, b| a.acceleration.total_cmp(&b.acceleration))
                .map(|packet| format!(", strongest {} ({})", packet.station, packet.acceleration))
                .unwrap_or_default();
            format!("{} ground-motion peaks{strongest}", peaks.packets.len())
        }
        DecodedRecord::TriggerParameters(params) => {
            format!("trigger parameters for {} stations", params.packets.len())
        }
        DecodedRecord::RawWaveform(waveform) => format!("waveform notice {}", waveform.header.id),
        DecodedRecord::EventAlert(alert) => format!(
            "{} event {}: M{:.1} at ({:.3}, {:.3}) depth {} km, delay {:.1}s",
            alert.message_type,
            alert.event_id,
            alert.magnitude,
            alert.latitude,
            alert.longitude,
            alert.depth,
            alert.delay_seconds()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => FeedConfig::from_file(path)?,
        None => FeedConfig::default(),
    };

    let session = Feed::listen_stomp(config, |record: Arc<DecodedRecord>| {
        println!("[{}] {}", record.source(), describe(&record));
    })
    .await?;
    println!("{}", session.status());

    tokio::signal::ctrl_c().await?;
    session.disconnect().await?;
    Ok(())
}
