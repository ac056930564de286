//! Postgres checkpoint store.
//!
//! Reads and overwrites row `id = 1` of the offsets table. The table is
//! expected to look like:
//!
//! ```sql
//! CREATE TABLE producer_offsets (
//!     id              INTEGER PRIMARY KEY,
//!     last_id         BIGINT NOT NULL,
//!     last_created_at TIMESTAMPTZ,
//!     updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! INSERT INTO producer_offsets (id, last_id) VALUES (1, 0);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{Checkpoint, ConfigError, RelayResult, StoreError};
use sources::PgHandle;
use tracing::{debug, instrument};

use super::OffsetStore;

pub struct PostgresOffsetStore {
    pg: PgHandle,
    table: String,
    select_sql: String,
    update_sql: String,
}

impl PostgresOffsetStore {
    /// `table` must already be validated as an identifier; it is
    /// interpolated into the statements.
    pub fn new(pg: PgHandle, table: impl Into<String>) -> Self {
        let table = table.into();
        // casts keep decoding stable whether the columns are INTEGER or
        // BIGINT, TIMESTAMP or TIMESTAMPTZ
        let select_sql = format!(
            "SELECT last_id::bigint, last_created_at::timestamptz \
             FROM {table} WHERE id = 1"
        );
        let update_sql = format!(
            "UPDATE {table} \
             SET last_id = $1::bigint, last_created_at = $2::timestamptz, updated_at = NOW() \
             WHERE id = 1"
        );
        Self {
            pg,
            table,
            select_sql,
            update_sql,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingCheckpoint {
            table: self.table.clone().into(),
        }
    }
}

fn query_error(action: &str, e: tokio_postgres::Error) -> StoreError {
    if e.is_closed() {
        StoreError::Connect {
            details: format!("{action}: connection closed").into(),
        }
    } else {
        StoreError::Query {
            details: format!("{action}: {e}").into(),
        }
    }
}

#[async_trait]
impl OffsetStore for PostgresOffsetStore {
    #[instrument(skip_all, fields(table = %self.table))]
    async fn get_offset(&self) -> RelayResult<Checkpoint> {
        let client = self.pg.client().await?;
        let row = client
            .query_opt(self.select_sql.as_str(), &[])
            .await
            .map_err(|e| query_error("read checkpoint", e))?;

        let Some(row) = row else {
            return Err(self.missing().into());
        };

        let last_id: i64 = row.try_get(0).map_err(|e| StoreError::Decode {
            details: format!("last_id: {e}").into(),
        })?;
        let last_created_at: Option<DateTime<Utc>> =
            row.try_get(1).map_err(|e| StoreError::Decode {
                details: format!("last_created_at: {e}").into(),
            })?;

        debug!(last_id, "checkpoint read");
        Ok(Checkpoint::new(last_id, last_created_at))
    }

    #[instrument(skip_all, fields(table = %self.table, last_id = last_id))]
    async fn update_offset(
        &self,
        last_id: i64,
        last_created_at: DateTime<Utc>,
    ) -> RelayResult<()> {
        let client = self.pg.client().await?;
        let updated = client
            .execute(self.update_sql.as_str(), &[&last_id, &last_created_at])
            .await
            .map_err(|e| query_error("update checkpoint", e))?;

        if updated == 0 {
            return Err(self.missing().into());
        }

        debug!(last_id, "checkpoint saved");
        Ok(())
    }
}
