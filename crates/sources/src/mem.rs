use async_trait::async_trait;
use parking_lot::RwLock;
use relay_core::{RowPoller, SourceRow, StoreResult};

/// In-memory append-only table.
#[derive(Default)]
pub struct MemRowPoller {
    rows: RwLock<Vec<SourceRow>>,
}

impl MemRowPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = SourceRow>) -> Self {
        let poller = Self::new();
        poller.extend(rows);
        poller
    }

    pub fn insert(&self, row: SourceRow) {
        self.rows.write().push(row);
    }

    pub fn extend(&self, rows: impl IntoIterator<Item = SourceRow>) {
        self.rows.write().extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl RowPoller for MemRowPoller {
    async fn poll_new_rows(
        &self,
        last_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<SourceRow>> {
        let mut batch: Vec<SourceRow> = self
            .rows
            .read()
            .iter()
            .filter(|r| r.id > last_id)
            .cloned()
            .collect();
        batch.sort_by(|a, b| {
            a.id.cmp(&b.id).then_with(|| a.created_at.cmp(&b.created_at))
        });
        batch.truncate(limit);
        Ok(batch)
    }
}
