//! Row to event mapping.
//!
//! Mapping is pure: the row is borrowed immutably and the output depends
//! only on the row, the mode and the configured source name.

use chrono::SecondsFormat;

use crate::{Event, EventEnvelope, Meta, Mode, Payload, SourceRow};

/// Source name stamped on events when none is configured.
pub const DEFAULT_SOURCE: &str = "livedb";

#[derive(Debug, Clone)]
pub struct EventMapper {
    source: String,
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE)
    }
}

impl EventMapper {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn map_row(&self, row: &SourceRow, mode: Mode) -> Event {
        Event {
            key: row.id.to_string(),
            value: EventEnvelope {
                id: row.id,
                payload: Payload {
                    org: row.org.clone(),
                    amount: row.amount,
                    region: row.region.clone(),
                },
                meta: Meta {
                    source: self.source.clone(),
                    created_at: row
                        .created_at
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                    mode,
                },
            },
        }
    }

    /// Maps rows in order.
    pub fn map_batch(&self, rows: &[SourceRow], mode: Mode) -> Vec<Event> {
        rows.iter().map(|r| self.map_row(r, mode)).collect()
    }
}

/// [`EventMapper::map_row`] with the default source name.
pub fn map_row(row: &SourceRow, mode: Mode) -> Event {
    EventMapper::default().map_row(row, mode)
}
