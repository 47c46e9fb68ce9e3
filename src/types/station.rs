//! Station identity and the shared binary header

use serde::Serialize;
use std::fmt;

/// SEED-style station identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct StationId {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl StationId {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.network, self.station, self.location, self.channel)
    }
}

/// Fixed metadata prefix shared by the binary message kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BinaryHeader {
    /// Producer format version
    pub version: i32,
    /// Producing system name (fixed 20-byte field, trimmed)
    pub source: String,
    /// Producer message id
    pub id: i32,
    /// Number of packets that follow the header
    pub packet_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_display_is_dotted_seed_code() {
        let id = StationId::new("IS", "TEST", "--", "ENZ");
        assert_eq!(id.to_string(), "IS.TEST.--.ENZ");
    }
}
