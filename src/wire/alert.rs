//! Event alert (`<`) XML decoder and envelope writer

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use tracing::trace;

use crate::types::{AlertMessageType, AlertUncertainty, EventAlert, MessageKind};
use crate::{FeedError, Result};

const KIND: MessageKind = MessageKind::EventAlert;

/// Timestamp pattern used by the alert producers.
pub const ALERT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Child elements of `core_info` whose first text is captured.
const TEXT_ELEMENTS: &[&str] = &[
    "mag",
    "lat",
    "lon",
    "depth",
    "orig_time",
    "mag_uncer",
    "lat_uncer",
    "lon_uncer",
    "depth_uncer",
    "orig_time_uncer",
    "likelihood",
    "num_stations",
];

/// First occurrences of everything the decoder reads.
#[derive(Debug, Default)]
struct AlertScan {
    event_message: Option<HashMap<String, String>>,
    core_id: Option<Option<String>>,
    mag_units: Option<Option<String>>,
    texts: HashMap<&'static str, String>,
}

fn malformed(details: impl Into<String>) -> FeedError {
    FeedError::malformed(KIND, details)
}

fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| malformed(format!("Bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| malformed(format!("Bad attribute value for '{key}': {e}")))?;
        map.entry(key).or_insert_with(|| value.into_owned());
    }
    Ok(map)
}

fn scan(xml: &str) -> Result<AlertScan> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut found = AlertScan::default();
    // element whose first text node is still wanted
    let mut capturing: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                capturing = visit_element(&mut found, &element)?;
            }
            Ok(Event::Empty(element)) => {
                visit_element(&mut found, &element)?;
                capturing = None;
            }
            Ok(Event::Text(text)) => {
                if let Some(name) = capturing.take() {
                    let value = text
                        .unescape()
                        .map_err(|e| malformed(format!("Bad text in <{name}>: {e}")))?;
                    found.texts.insert(name, value.into_owned());
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(name) = capturing.take() {
                    found.texts.insert(name, String::from_utf8_lossy(&data).into_owned());
                }
            }
            Ok(Event::End(_)) => capturing = None,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(malformed(format!(
                    "XML error at position {}: {e}",
                    reader.error_position()
                )));
            }
        }
    }
    Ok(found)
}

fn visit_element(found: &mut AlertScan, element: &BytesStart<'_>) -> Result<Option<&'static str>> {
    let name = element.name();
    let name = name.as_ref();
    match name {
        b"event_message" if found.event_message.is_none() => {
            found.event_message = Some(attributes(element)?);
        }
        b"core_info" if found.core_id.is_none() => {
            found.core_id = Some(attributes(element)?.remove("id"));
        }
        _ => {}
    }
    if name == b"mag" && found.mag_units.is_none() {
        found.mag_units = Some(attributes(element)?.remove("units"));
    }
    Ok(TEXT_ELEMENTS
        .iter()
        .find(|wanted| wanted.as_bytes() == name)
        .copied()
        .filter(|wanted| !found.texts.contains_key(wanted)))
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), ALERT_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| malformed(format!("Cannot parse {field} '{value}': {e}")))
}

impl AlertScan {
    fn text(&self, name: &str) -> Result<&str> {
        self.texts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| malformed(format!("Missing <{name}> element text")))
    }

    fn number(&self, name: &str) -> Result<f64> {
        let text = self.text(name)?;
        text.trim().parse().map_err(|e| malformed(format!("Cannot parse <{name}> '{text}': {e}")))
    }

    fn optional_number<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match self.texts.get(name) {
            None => Ok(None),
            Some(text) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| malformed(format!("Cannot parse <{name}> '{text}': {e}"))),
        }
    }
}

/// Decode an alert envelope.
///
/// The first `event_message` and `core_info` elements are used, and the first
/// occurrence of each child element anywhere in the document.
pub fn decode_alert(data: &[u8]) -> Result<EventAlert> {
    let xml = std::str::from_utf8(data).map_err(|e| malformed(format!("Not UTF-8: {e}")))?;
    let mut found = scan(xml)?;

    let mut message =
        found.event_message.take().ok_or_else(|| malformed("Missing <event_message> element"))?;
    let mut required = |attr: &str| {
        message
            .remove(attr)
            .ok_or_else(|| malformed(format!("Missing event_message/@{attr} attribute")))
    };
    let orig_sys = required("orig_sys")?;
    let timestamp = parse_time("timestamp", &required("timestamp")?)?;
    let message_type = AlertMessageType::parse(&required("message_type")?);

    let event_id = found
        .core_id
        .take()
        .ok_or_else(|| malformed("Missing <core_info> element"))?
        .ok_or_else(|| malformed("Missing core_info/@id attribute"))?;
    let magnitude_units = found
        .mag_units
        .take()
        .flatten()
        .ok_or_else(|| malformed("Missing mag/@units attribute"))?;

    let alert = EventAlert {
        event_id,
        orig_sys,
        timestamp,
        message_type,
        version: message.remove("version"),
        category: message.remove("category"),
        instance: message.remove("instance"),
        alg_vers: message.remove("alg_vers"),
        latitude: found.number("lat")?,
        longitude: found.number("lon")?,
        depth: found.number("depth")?,
        origin_time: parse_time("orig_time", found.text("orig_time")?)?,
        magnitude: found.number("mag")?,
        magnitude_units,
        uncertainty: AlertUncertainty {
            magnitude: found.optional_number("mag_uncer")?,
            latitude: found.optional_number("lat_uncer")?,
            longitude: found.optional_number("lon_uncer")?,
            depth: found.optional_number("depth_uncer")?,
            origin_time: found.optional_number("orig_time_uncer")?,
        },
        likelihood: found.optional_number("likelihood")?,
        num_stations: found.optional_number("num_stations")?,
    };

    trace!(event_id = %alert.event_id, message_type = %alert.message_type, "Decoded event alert");
    Ok(alert)
}

fn encoding_error(e: impl std::fmt::Display) -> FeedError {
    FeedError::Encoding { field: "event_message".to_string(), details: e.to_string() }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    units: Option<&str>,
    text: &str,
) -> Result<()> {
    let mut start = BytesStart::new(name);
    if let Some(units) = units {
        start.push_attribute(("units", units));
    }
    writer.write_event(Event::Start(start)).map_err(encoding_error)?;
    writer.write_event(Event::Text(BytesText::new(text))).map_err(encoding_error)?;
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(encoding_error)?;
    Ok(())
}

impl EventAlert {
    /// Parse an alert envelope, see [`decode_alert`].
    pub fn from_xml(xml: &str) -> Result<Self> {
        decode_alert(xml.as_bytes())
    }

    /// Render the `event_message` envelope.
    ///
    /// Timestamps are written with millisecond precision and a `Z` suffix.
    /// Optional elements are written only when present.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))
            .map_err(encoding_error)?;

        let timestamp = format_time(&self.timestamp);
        let mut root = BytesStart::new("event_message");
        for (key, value) in [
            ("alg_vers", self.alg_vers.as_deref()),
            ("category", self.category.as_deref()),
            ("instance", self.instance.as_deref()),
            ("message_type", Some(self.message_type.as_str())),
            ("orig_sys", Some(self.orig_sys.as_str())),
            ("timestamp", Some(timestamp.as_str())),
            ("version", self.version.as_deref()),
        ] {
            if let Some(value) = value {
                root.push_attribute((key, value));
            }
        }
        writer.write_event(Event::Start(root)).map_err(encoding_error)?;

        let mut core = BytesStart::new("core_info");
        core.push_attribute(("id", self.event_id.as_str()));
        writer.write_event(Event::Start(core)).map_err(encoding_error)?;

        let units = self.magnitude_units.as_str();
        let uncertainty = &self.uncertainty;
        write_element(&mut writer, "mag", Some(units), &self.magnitude.to_string())?;
        if let Some(value) = uncertainty.magnitude {
            write_element(&mut writer, "mag_uncer", Some(units), &value.to_string())?;
        }
        write_element(&mut writer, "lat", Some("deg"), &self.latitude.to_string())?;
        if let Some(value) = uncertainty.latitude {
            write_element(&mut writer, "lat_uncer", Some("deg"), &value.to_string())?;
        }
        write_element(&mut writer, "lon", Some("deg"), &self.longitude.to_string())?;
        if let Some(value) = uncertainty.longitude {
            write_element(&mut writer, "lon_uncer", Some("deg"), &value.to_string())?;
        }
        write_element(&mut writer, "depth", Some("km"), &self.depth.to_string())?;
        if let Some(value) = uncertainty.depth {
            write_element(&mut writer, "depth_uncer", Some("km"), &value.to_string())?;
        }
        write_element(&mut writer, "orig_time", Some("UTC"), &format_time(&self.origin_time))?;
        if let Some(value) = uncertainty.origin_time {
            write_element(&mut writer, "orig_time_uncer", Some("sec"), &value.to_string())?;
        }
        if let Some(value) = self.likelihood {
            write_element(&mut writer, "likelihood", None, &value.to_string())?;
        }
        if let Some(value) = self.num_stations {
            write_element(&mut writer, "num_stations", None, &value.to_string())?;
        }

        writer.write_event(Event::End(BytesEnd::new("core_info"))).map_err(encoding_error)?;
        writer.write_event(Event::End(BytesEnd::new("event_message"))).map_err(encoding_error)?;

        String::from_utf8(writer.into_inner()).map_err(encoding_error)
    }
}
