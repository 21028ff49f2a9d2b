use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use super::SyncError;
use crate::store::{InventoryRecord, PortalRecord, WorkStore};

/// Copies synced inventory rows into `portal_records`, prefixing each
/// path with the portal id.
pub struct Publisher {
    store: WorkStore,
    portal_id: String,
    chunk_size: usize,
}

impl Publisher {
    pub fn new(store: WorkStore, portal_id: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            store,
            portal_id: portal_id.into(),
            chunk_size,
        }
    }

    pub async fn run(&self) -> Result<u64, SyncError> {
        let synced = self.store.synced_inventory().await?;
        let now = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let records: Vec<PortalRecord> = synced
            .iter()
            .map(|record| to_portal_record(record, &self.portal_id, &now))
            .collect();
        let inserted = self
            .store
            .insert_portal_records(&records, self.chunk_size)
            .await?;
        info!(portal_id = %self.portal_id, inserted, "published synced entries");
        Ok(inserted)
    }
}

fn to_portal_record(record: &InventoryRecord, portal_id: &str, now: &str) -> PortalRecord {
    PortalRecord {
        name: record.entry.name.clone(),
        path: format!("{portal_id}/{}", record.entry.path),
        portal_id: portal_id.to_string(),
        synced: true,
        is_folder: record.entry.is_folder,
        meta: record.meta.clone(),
        portal_info: record.portal_info.clone(),
        created_at: now.to_string(),
        updated_at: now.to_string(),
    }
}
