//! Collaborator hooks injected at construction
//!
//! Handlers run on the dispatch path, inside the serializer's critical section,
//! so they observe records strictly in arrival order and one at a time. Keep
//! them short: a slow handler throttles intake.

use std::sync::Arc;

use crate::types::DecodedRecord;

/// Receives every successfully decoded record.
pub trait RecordHandler: Send + Sync + 'static {
    fn on_record(&self, record: Arc<DecodedRecord>);
}

impl<F> RecordHandler for F
where
    F: Fn(Arc<DecodedRecord>) + Send + Sync + 'static,
{
    fn on_record(&self, record: Arc<DecodedRecord>) {
        self(record)
    }
}

/// Receives broker connection changes as `(connected, detail)`.
pub trait StatusHandler: Send + Sync + 'static {
    fn on_status(&self, connected: bool, detail: &str);
}

impl<F> StatusHandler for F
where
    F: Fn(bool, &str) + Send + Sync + 'static,
{
    fn on_status(&self, connected: bool, detail: &str) {
        self(connected, detail)
    }
}

/// Handler that drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl RecordHandler for Discard {
    fn on_record(&self, _record: Arc<DecodedRecord>) {}
}

impl StatusHandler for Discard {
    fn on_status(&self, _connected: bool, _detail: &str) {}
}
