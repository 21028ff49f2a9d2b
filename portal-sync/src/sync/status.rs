use tracing::warn;

use crate::store::WorkStore;

/// Records successful uploads. A failed write is logged and otherwise
/// ignored: the entry stays pending and is retried by the next run.
#[derive(Clone)]
pub struct StatusUpdater {
    store: WorkStore,
}

impl StatusUpdater {
    pub fn new(store: WorkStore) -> Self {
        Self { store }
    }

    pub async fn mark(&self, id: i64) -> bool {
        match self.store.mark_uploaded(id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(id, error = %err, "failed to record upload status");
                false
            }
        }
    }

    /// Marks every id and returns how many writes succeeded. All writes have
    /// finished when this returns.
    pub async fn mark_all(&self, ids: &[i64]) -> usize {
        let mut recorded = 0;
        for &id in ids {
            if self.mark(id).await {
                recorded += 1;
            }
        }
        recorded
    }
}
