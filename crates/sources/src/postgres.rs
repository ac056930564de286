//! Polling reader over the append-only source table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{RowPoller, SourceRow, StoreError, StoreResult};
use tokio_postgres::Row;
use tracing::{debug, instrument};

use crate::PgHandle;

pub struct PostgresRowPoller {
    pg: PgHandle,
    table: String,
    poll_sql: String,
}

impl PostgresRowPoller {
    /// `table` must already be validated as an identifier. The client is
    /// fetched from `pg` per poll, so a dropped connection is reopened on
    /// the next call.
    pub fn new(pg: PgHandle, table: impl Into<String>) -> Self {
        let table = table.into();
        // id > checkpoint, oldest first; the last row of a batch is the
        // next checkpoint
        let poll_sql = format!(
            "SELECT id::bigint, org, amount::double precision, region, created_at::timestamptz \
             FROM {table} \
             WHERE id > $1::bigint \
             ORDER BY id ASC, created_at ASC \
             LIMIT $2::bigint"
        );
        Self {
            pg,
            table,
            poll_sql,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

fn decode_row(row: &Row) -> StoreResult<SourceRow> {
    let decode = |col: &str, e: tokio_postgres::Error| StoreError::Decode {
        details: format!("{col}: {e}").into(),
    };

    Ok(SourceRow {
        id: row.try_get(0).map_err(|e| decode("id", e))?,
        org: row.try_get(1).map_err(|e| decode("org", e))?,
        amount: row.try_get(2).map_err(|e| decode("amount", e))?,
        region: row.try_get(3).map_err(|e| decode("region", e))?,
        created_at: row
            .try_get::<_, DateTime<Utc>>(4)
            .map_err(|e| decode("created_at", e))?,
    })
}

#[async_trait]
impl RowPoller for PostgresRowPoller {
    #[instrument(skip_all, fields(table = %self.table, last_id = last_id, limit = limit))]
    async fn poll_new_rows(
        &self,
        last_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<SourceRow>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let client = self.pg.client().await?;
        let rows = client
            .query(self.poll_sql.as_str(), &[&last_id, &limit])
            .await
            .map_err(|e| {
                if e.is_closed() {
                    StoreError::Connect {
                        details: "poll rows: connection closed".into(),
                    }
                } else {
                    StoreError::Query {
                        details: format!("poll rows: {e}").into(),
                    }
                }
            })?;

        let rows = rows.iter().map(decode_row).collect::<StoreResult<Vec<_>>>()?;
        debug!(count = rows.len(), "polled rows");
        Ok(rows)
    }
}
