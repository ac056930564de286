use super::OffsetStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{Checkpoint, ConfigError, RelayResult};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-memory checkpoint row.
pub struct MemOffsetStore {
    row: RwLock<Option<Checkpoint>>,
    writes: AtomicU64,
}

impl Default for MemOffsetStore {
    fn default() -> Self {
        Self::seeded(Checkpoint::default())
    }
}

impl MemOffsetStore {
    /// Store seeded at `last_id = 0`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(checkpoint: Checkpoint) -> Self {
        Self {
            row: RwLock::new(Some(checkpoint)),
            writes: AtomicU64::new(0),
        }
    }

    /// Store whose seed row is missing.
    pub fn unseeded() -> Self {
        Self {
            row: RwLock::new(None),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of successful `update_offset` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current row, if seeded.
    pub async fn snapshot(&self) -> Option<Checkpoint> {
        *self.row.read().await
    }
}

fn missing() -> ConfigError {
    ConfigError::MissingCheckpoint {
        table: "memory".into(),
    }
}

#[async_trait]
impl OffsetStore for MemOffsetStore {
    async fn get_offset(&self) -> RelayResult<Checkpoint> {
        let row = self.row.read().await;
        (*row).ok_or_else(|| missing().into())
    }

    async fn update_offset(
        &self,
        last_id: i64,
        last_created_at: DateTime<Utc>,
    ) -> RelayResult<()> {
        let mut row = self.row.write().await;
        let Some(cp) = row.as_mut() else {
            return Err(missing().into());
        };
        *cp = Checkpoint::new(last_id, Some(last_created_at));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
