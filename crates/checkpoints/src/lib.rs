//! Checkpoint persistence for the relay.
//!
//! The checkpoint is a single pre-seeded row. Stores never create it: a
//! missing row is a deployment mistake and surfaces as
//! [`ConfigError::MissingCheckpoint`](relay_core::ConfigError).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{Checkpoint, RelayResult};

mod mem_store;
mod postgres_store;

pub use mem_store::MemOffsetStore;
pub use postgres_store::PostgresOffsetStore;

/// Singleton checkpoint storage.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Read the checkpoint row.
    async fn get_offset(&self) -> RelayResult<Checkpoint>;

    /// Overwrite the checkpoint row. Writing the same values twice has no
    /// further effect beyond the update timestamp.
    async fn update_offset(
        &self,
        last_id: i64,
        last_created_at: DateTime<Utc>,
    ) -> RelayResult<()>;
}

pub type ArcDynOffsetStore = Arc<dyn OffsetStore>;
