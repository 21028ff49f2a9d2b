use std::path::{Path, PathBuf};

use anyhow::Context;
use portal_core::{OAuthClient, PortalClient};
use tracing::info;

use crate::config::SyncConfig;
use crate::store::WorkStore;
use crate::sync::SyncError;
use crate::sync::metadata::{MetadataReport, MetadataSync};
use crate::sync::publish::Publisher;
use crate::sync::remote::PortalRemote;
use crate::sync::scheduler::LevelScheduler;
use crate::sync::uploader::{UploadReport, Uploader};
use crate::walker::{self, FileSystemEntry};

/// Owns the work store and runs one script at a time against it.
pub struct SyncRuntime {
    config: SyncConfig,
    store: WorkStore,
}

impl SyncRuntime {
    pub async fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        let store = WorkStore::open(config.database_url.as_deref())
            .await
            .context("failed to open work store")?;
        Ok(Self { config, store })
    }

    pub fn with_store(config: SyncConfig, store: WorkStore) -> Self {
        Self { config, store }
    }

    fn root(&self, root: Option<&Path>) -> PathBuf {
        root.map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.sync_root.clone())
    }

    /// Walks the tree and appends every entry to the inventory.
    pub async fn inventory(&self, root: Option<&Path>) -> anyhow::Result<u64> {
        let root = self.root(root);
        let entries = walk_blocking(root.clone())
            .await
            .with_context(|| format!("failed to walk {}", root.display()))?;
        let inserted = self
            .store
            .insert_inventory(&entries, self.config.insert_chunk_size)
            .await
            .context("failed to write inventory")?;
        info!(root = %root.display(), entries = inserted, "inventory recorded");
        Ok(inserted)
    }

    /// Queues the tree (unless `skip_scan`) and uploads everything pending,
    /// level by level.
    pub async fn upload(&self, root: Option<&Path>, skip_scan: bool) -> anyhow::Result<UploadReport> {
        let root = self.root(root);
        if skip_scan {
            info!("skipping scan, resuming pending uploads");
        } else {
            let entries = walk_blocking(root.clone())
                .await
                .with_context(|| format!("failed to walk {}", root.display()))?;
            let queued = self
                .store
                .insert_uploads(&entries, self.config.insert_chunk_size)
                .await
                .context("failed to queue uploads")?;
            info!(root = %root.display(), queued, "upload queue filled");
        }

        let uploader = Uploader::new(
            self.remote()?,
            root,
            self.config.parallelism,
            self.config.request_timeout,
        );
        let report = LevelScheduler::new(self.store.clone(), uploader)
            .run()
            .await
            .context("failed to read upload queue")?;
        info!(
            batches = report.batches,
            succeeded = report.succeeded,
            failed = report.failed,
            unrecorded = report.unrecorded,
            "upload finished"
        );
        Ok(report)
    }

    pub async fn fetch_metadata(&self) -> anyhow::Result<MetadataReport> {
        let list_guid = self.config.portal.list_guid()?;
        let report = MetadataSync::new(
            self.store.clone(),
            self.remote()?,
            list_guid,
            self.config.metadata_page_size,
            self.config.request_timeout,
        )
        .run()
        .await
        .context("metadata sync failed")?;
        info!(
            total = report.total,
            pages = report.pages,
            failed_pages = report.failed_pages,
            found = report.found,
            missing = report.missing,
            rows_updated = report.rows_updated,
            "metadata sync finished"
        );
        Ok(report)
    }

    pub async fn publish(&self) -> anyhow::Result<u64> {
        let portal_id = self.config.portal.portal_id()?;
        let inserted = Publisher::new(self.store.clone(), portal_id, self.config.insert_chunk_size)
            .run()
            .await
            .context("publish failed")?;
        Ok(inserted)
    }

    pub async fn close(self) {
        self.store.close().await;
    }

    fn remote(&self) -> Result<PortalRemote, SyncError> {
        let portal = &self.config.portal;
        // Connection and read stalls only. The overall per-call bound is the
        // tokio timeout applied by the uploader and metadata sync.
        let http = reqwest::Client::builder()
            .connect_timeout(self.config.request_timeout)
            .read_timeout(self.config.request_timeout)
            .build()
            .map_err(portal_core::PortalError::from)?;
        let client = PortalClient::with_http(
            http.clone(),
            portal.site_url()?,
            portal.document_library()?,
            "",
        )?;
        let oauth = OAuthClient::with_http(
            http,
            &portal.oauth_url,
            portal.tenant_id()?,
            portal.client_id()?,
            portal.client_secret()?,
        )?;
        Ok(PortalRemote::new(oauth, client, portal.resource()?))
    }
}

async fn walk_blocking(root: PathBuf) -> Result<Vec<FileSystemEntry>, SyncError> {
    let entries = tokio::task::spawn_blocking(move || walker::walk(&root)).await??;
    Ok(entries)
}
