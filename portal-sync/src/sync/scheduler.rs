use tracing::info;

use super::status::StatusUpdater;
use super::uploader::{Portal, UploadReport, Uploader};
use crate::store::{StoreError, WorkStore};

/// Drives the uploader level by level: every pending entry at level `L`
/// is finished (successfully or not) before anything at `L + 1` starts, so
/// folders exist before their children are created.
pub struct LevelScheduler<P> {
    store: WorkStore,
    uploader: Uploader<P>,
    updater: StatusUpdater,
}

impl<P: Portal> LevelScheduler<P> {
    pub fn new(store: WorkStore, uploader: Uploader<P>) -> Self {
        let updater = StatusUpdater::new(store.clone());
        Self {
            store,
            uploader,
            updater,
        }
    }

    pub async fn run(&self) -> Result<UploadReport, StoreError> {
        let mut levels = self.store.distinct_pending_levels().await?;
        levels.sort_unstable();
        levels.dedup();

        let mut report = UploadReport::default();
        for level in levels {
            let entries = self.store.pending_uploads_at_level(level).await?;
            if entries.is_empty() {
                continue;
            }
            info!(level, entries = entries.len(), "uploading level");
            let level_report = self
                .uploader
                .upload_level(level, &entries, &self.updater)
                .await;
            info!(
                level,
                succeeded = level_report.succeeded,
                failed = level_report.failed,
                "level finished"
            );
            report.absorb(level_report);
        }
        Ok(report)
    }
}
