//! Raw inbound frames as delivered by the broker

use std::sync::Arc;

use super::MessageKind;

/// Delivery headers attached to a frame, in arrival order.
///
/// STOMP allows repeated header names; the first occurrence wins on lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destination the frame was published to, if the broker reported it.
    pub fn destination(&self) -> Option<&str> {
        self.get("destination")
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// One undecoded message as received from the broker.
///
/// The body is shared (zero-copy via Arc) between the history buffer, the
/// persistence sink and the decoder. Frames are never mutated after receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Delivery metadata
    pub headers: Headers,

    /// Exact bytes of the message body, tag byte first
    pub body: Arc<[u8]>,
}

impl RawFrame {
    pub fn new(headers: Headers, body: impl Into<Arc<[u8]>>) -> Self {
        Self { headers, body: body.into() }
    }

    /// Frame without delivery headers, as read back from a persisted log.
    pub fn from_body(body: impl Into<Arc<[u8]>>) -> Self {
        Self::new(Headers::new(), body)
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::of(&self.body)
    }

    /// Leading tag byte, if the body is not empty.
    pub fn tag(&self) -> Option<u8> {
        self.body.first().copied()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_header_occurrence_wins() {
        let headers: Headers =
            [("destination", "/topic/a"), ("destination", "/topic/b")].into_iter().collect();
        assert_eq!(headers.destination(), Some("/topic/a"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn clones_share_the_body() {
        let frame = RawFrame::from_body(b"K".to_vec());
        let clone = frame.clone();
        assert!(Arc::ptr_eq(&frame.body, &clone.body));
        assert_eq!(clone.kind(), MessageKind::KeepAlive);
    }
}
