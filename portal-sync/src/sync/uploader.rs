//! Bounded-parallel upload of one level.
//!
//! Entries are processed in consecutive batches of at most `width`. Each
//! batch gets a fresh access token, dispatches every entry concurrently and
//! joins all of them (and their status writes) before the next batch
//! starts, so at most `width` portal calls are in flight at any time.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::future::join_all;
use portal_core::OAuthError;
use tokio::time::timeout;
use tracing::{info, warn};

use super::status::StatusUpdater;
use crate::store::StoredEntry;

/// Result of one remote call. `status` is false for every kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemOutcome {
    pub id: i64,
    pub status: bool,
}

impl ItemOutcome {
    pub fn succeeded(id: i64) -> Self {
        Self { id, status: true }
    }

    pub fn failed(id: i64) -> Self {
        Self { id, status: false }
    }
}

/// Remote side of an upload run.
///
/// `create_folder` and `upload_file` must not fail: implementations map
/// every error to [`ItemOutcome::failed`].
pub trait Portal: Send + Sync {
    fn access_token(&self) -> impl Future<Output = Result<String, OAuthError>> + Send;

    fn create_folder(
        &self,
        remote_path: &str,
        id: i64,
        token: &str,
    ) -> impl Future<Output = ItemOutcome> + Send;

    fn upload_file(
        &self,
        local_path: &Path,
        remote_folder: &str,
        remote_name: &str,
        id: i64,
        token: &str,
    ) -> impl Future<Output = ItemOutcome> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub batches: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Successes whose status write failed; they stay pending.
    pub unrecorded: usize,
}

impl UploadReport {
    pub fn absorb(&mut self, other: UploadReport) {
        self.batches += other.batches;
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.unrecorded += other.unrecorded;
    }
}

pub struct Uploader<P> {
    portal: P,
    local_root: PathBuf,
    width: usize,
    call_timeout: Duration,
}

impl<P: Portal> Uploader<P> {
    pub fn new(portal: P, local_root: PathBuf, width: usize, call_timeout: Duration) -> Self {
        Self {
            portal,
            local_root,
            width: width.max(1),
            call_timeout,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn portal(&self) -> &P {
        &self.portal
    }

    pub async fn upload_level(
        &self,
        level: u32,
        entries: &[StoredEntry],
        updater: &StatusUpdater,
    ) -> UploadReport {
        let mut report = UploadReport::default();
        for (batch_index, batch) in entries.chunks(self.width).enumerate() {
            info!(
                level,
                batch = batch_index,
                offset = batch_index * self.width,
                size = batch.len(),
                "dispatching batch"
            );
            let outcomes = self.dispatch(batch).await;
            let succeeded: Vec<i64> = outcomes
                .iter()
                .filter(|outcome| outcome.status)
                .map(|outcome| outcome.id)
                .collect();
            let recorded = updater.mark_all(&succeeded).await;

            report.batches += 1;
            report.attempted += batch.len();
            report.succeeded += succeeded.len();
            report.failed += batch.len() - succeeded.len();
            report.unrecorded += succeeded.len() - recorded;
        }
        report
    }

    async fn dispatch(&self, batch: &[StoredEntry]) -> Vec<ItemOutcome> {
        let token = match timeout(self.call_timeout, self.portal.access_token()).await {
            Ok(Ok(token)) => token,
            Ok(Err(err)) => {
                warn!(error = %err, size = batch.len(), "token request failed, skipping batch");
                return batch.iter().map(|entry| ItemOutcome::failed(entry.id)).collect();
            }
            Err(_) => {
                warn!(size = batch.len(), "token request timed out, skipping batch");
                return batch.iter().map(|entry| ItemOutcome::failed(entry.id)).collect();
            }
        };
        join_all(batch.iter().map(|entry| self.dispatch_one(entry, &token))).await
    }

    async fn dispatch_one(&self, entry: &StoredEntry, token: &str) -> ItemOutcome {
        let remote_path = entry.relative_path();
        let call = async {
            if entry.is_folder {
                self.portal.create_folder(&remote_path, entry.id, token).await
            } else {
                let local_path = self.local_root.join(&remote_path);
                self.portal
                    .upload_file(&local_path, &entry.path, &entry.name, entry.id, token)
                    .await
            }
        };
        match timeout(self.call_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(id = entry.id, path = %remote_path, "portal call timed out");
                ItemOutcome::failed(entry.id)
            }
        }
    }
}
