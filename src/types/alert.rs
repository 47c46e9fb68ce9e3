//! XML event alert record

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// `message_type` attribute of an event message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AlertMessageType {
    New,
    Update,
    Delete,
    /// Any other value, kept verbatim
    Other(String),
}

impl AlertMessageType {
    pub fn parse(value: &str) -> Self {
        match value {
            "new" => AlertMessageType::New,
            "update" => AlertMessageType::Update,
            "delete" => AlertMessageType::Delete,
            other => AlertMessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AlertMessageType::New => "new",
            AlertMessageType::Update => "update",
            AlertMessageType::Delete => "delete",
            AlertMessageType::Other(value) => value,
        }
    }
}

impl fmt::Display for AlertMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional uncertainty elements of `core_info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertUncertainty {
    pub magnitude: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub depth: Option<f64>,
    /// Seconds
    pub origin_time: Option<f64>,
}

/// Decoded `event_message` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAlert {
    /// `core_info/@id`
    pub event_id: String,
    pub orig_sys: String,
    /// Message creation time
    pub timestamp: DateTime<Utc>,
    pub message_type: AlertMessageType,
    pub version: Option<String>,
    pub category: Option<String>,
    pub instance: Option<String>,
    pub alg_vers: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Kilometres
    pub depth: f64,
    pub origin_time: DateTime<Utc>,
    pub magnitude: f64,
    pub magnitude_units: String,
    pub uncertainty: AlertUncertainty,
    pub likelihood: Option<f64>,
    pub num_stations: Option<u32>,
}

impl EventAlert {
    /// New-event alert from the `dm` system, stamped now.
    ///
    /// Optional envelope fields start empty; set them directly before publishing.
    pub fn new(
        event_id: impl Into<String>,
        magnitude: f64,
        latitude: f64,
        longitude: f64,
        depth: f64,
        origin_time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            orig_sys: "dm".to_string(),
            timestamp: Utc::now(),
            message_type: AlertMessageType::New,
            version: Some("0".to_string()),
            category: Some("live".to_string()),
            instance: None,
            alg_vers: None,
            latitude,
            longitude,
            depth,
            origin_time,
            magnitude,
            magnitude_units: "Mw".to_string(),
            uncertainty: AlertUncertainty::default(),
            likelihood: None,
            num_stations: None,
        }
    }

    /// Seconds between origin time and message creation.
    pub fn delay_seconds(&self) -> f64 {
        (self.timestamp - self.origin_time).num_milliseconds() as f64 / 1000.0
    }
}
