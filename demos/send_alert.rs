//! Publish one event alert envelope.
//!
//! ```text
//! cargo run --example send_alert -- 4242 5.6 32.8 35.5 10
//! DRY_RUN=1 cargo run --example send_alert
//! ```
//!
//! Arguments are event id, magnitude, latitude, longitude and depth in km. The
//! origin time is now. With `DRY_RUN` set the envelope is logged and not sent.

use quakefeed::config::DEFAULT_TOPIC;
use quakefeed::transport::stomp::StompConnector;
use quakefeed::{AlertPublisher, BrokerConfig, BrokerSession, Dispatcher, EventAlert};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

fn number(args: &[String], index: usize, default: f64) -> Result<f64, Box<dyn std::error::Error>> {
    match args.get(index) {
        Some(value) => Ok(value.parse()?),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let event_id = args.first().cloned().unwrap_or_else(|| "1".to_string());
    let alert = EventAlert::new(
        event_id,
        number(&args, 1, 5.0)?,
        number(&args, 2, 32.5)?,
        number(&args, 3, 35.0)?,
        number(&args, 4, 10.0)?,
        chrono::Utc::now(),
    );

    let dry_run = std::env::var_os("DRY_RUN").is_some();
    let session = Arc::new(BrokerSession::new(
        BrokerConfig { name: "evt2broker".to_string(), ..BrokerConfig::default() },
        Arc::new(StompConnector),
        Arc::new(Dispatcher::new(1, None)),
    ));
    if !dry_run {
        session.connect().await?;
    }

    AlertPublisher::new(Arc::clone(&session), DEFAULT_TOPIC).dry_run(dry_run).publish(&alert).await?;
    println!("{}", alert.to_xml()?);

    session.disconnect().await?;
    Ok(())
}
