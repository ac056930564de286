//! rowrelay core types
//!
//! Data model shared by every crate in the workspace: the checkpoint, the
//! source row, the event published for it, and the traits the streaming
//! loop drives (`RowPoller`, `Publisher`). The checkpoint store trait lives
//! in the `checkpoints` crate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod errors;
pub mod mapper;

pub use errors::{
    ConfigError, PublishError, PublishResult, RelayError, RelayResult,
    StoreError, StoreResult,
};
pub use mapper::{DEFAULT_SOURCE, EventMapper, map_row};

// ============================================================================
// Checkpoint
// ============================================================================

/// The single durable resumption marker.
///
/// `last_id` is the id of the last source row that was published and
/// committed. `last_created_at` is `None` on a freshly seeded table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_id: i64,
    pub last_created_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(last_id: i64, last_created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            last_id,
            last_created_at,
        }
    }

    /// Checkpoint that points at `row`.
    pub fn after(row: &SourceRow) -> Self {
        Self {
            last_id: row.id,
            last_created_at: Some(row.created_at),
        }
    }
}

// ============================================================================
// Source Row
// ============================================================================

/// One row of the append-only source table. Ids are assigned by the writer
/// and grow monotonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub id: i64,
    pub org: String,
    pub amount: f64,
    pub region: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Mode
// ============================================================================

/// Processing mode stamped on every event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Replay,
}

impl Mode {
    pub fn from_replay_flag(replay: bool) -> Self {
        if replay { Mode::Replay } else { Mode::Normal }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Mode::Replay)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Replay => "replay",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event
// ============================================================================

/// Business fields copied verbatim from the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub org: String,
    pub amount: f64,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Source table name.
    pub source: String,
    /// Row timestamp, RFC 3339 UTC with millisecond precision.
    pub created_at: String,
    pub mode: Mode,
}

/// Message value as it goes over the wire.
///
/// ```json
/// {
///   "id": 1,
///   "payload": {"org": "A", "amount": 10.0, "region": "us"},
///   "meta": {"source": "livedb", "created_at": "2024-01-01T00:00:00.000Z", "mode": "normal"}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: i64,
    pub payload: Payload,
    pub meta: Meta,
}

/// A keyed message ready for the broker. One per source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    pub value: EventEnvelope,
}

impl Event {
    /// JSON bytes of the envelope.
    pub fn value_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.value)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Reads unprocessed rows above a checkpoint.
#[async_trait]
pub trait RowPoller: Send + Sync {
    /// Rows with `id > last_id`, ascending by `(id, created_at)`, at most
    /// `limit` of them. Empty when caught up.
    async fn poll_new_rows(
        &self,
        last_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<SourceRow>>;
}

/// Owns a broker connection and publishes batches of events.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn id(&self) -> &str;

    /// Connect. A second call while connected does nothing.
    async fn init_producer(&self) -> RelayResult<()>;

    /// Publish the whole batch or fail. An empty batch is a no-op.
    async fn send_events(&self, events: &[Event]) -> PublishResult<()>;

    /// Release the connection. Safe to call when not connected.
    async fn shutdown_producer(&self) -> PublishResult<()>;

    fn is_connected(&self) -> bool;
}

pub type ArcDynRowPoller = Arc<dyn RowPoller>;
pub type ArcDynPublisher = Arc<dyn Publisher>;
