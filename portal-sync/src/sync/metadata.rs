//! Pulls portal-side metadata for every inventoried entry.
//!
//! The inventory is read in pages; each page becomes one `$batch` request
//! and every item found on the portal is written back to its inventory row
//! together with the list's custom column values.

use std::future::Future;
use std::time::Duration;

use portal_core::{FieldInfo, ItemKind, ItemTarget, PortalItem};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::{info, warn};

use super::SyncError;
use super::remote::PortalRemote;
use super::uploader::Portal;
use crate::store::{InventoryRecord, WorkStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataReport {
    pub total: u64,
    pub pages: usize,
    pub failed_pages: usize,
    pub found: usize,
    pub missing: usize,
    pub rows_updated: u64,
}

/// Portal description stored alongside an inventory row.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PortalInfo {
    pub unique_id: Option<String>,
    pub item_count: Option<u64>,
    pub name: String,
    pub time_created: Option<String>,
    pub time_last_modified: Option<String>,
    pub server_relative_url: String,
    /// Library-relative path of the item itself.
    pub path: String,
    /// Library-relative path of the containing folder.
    pub path_real: String,
}

pub struct MetadataSync {
    store: WorkStore,
    remote: PortalRemote,
    list_guid: String,
    page_size: usize,
    call_timeout: Duration,
}

impl MetadataSync {
    pub fn new(
        store: WorkStore,
        remote: PortalRemote,
        list_guid: impl Into<String>,
        page_size: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            list_guid: list_guid.into(),
            page_size: page_size.max(1),
            call_timeout,
        }
    }

    pub async fn run(&self) -> Result<MetadataReport, SyncError> {
        let mut report = MetadataReport {
            total: self.store.count_inventory().await?,
            ..MetadataReport::default()
        };

        let token = self
            .bounded("token request", self.remote.access_token())
            .await?;
        let client = self.remote.client().with_token(token);
        let fields = self
            .bounded("field lookup", client.list_custom_fields(&self.list_guid))
            .await?;
        let field_names = field_set(&fields);
        info!(
            entries = report.total,
            fields = field_names.len(),
            "fetching portal metadata"
        );

        let mut offset = 0u64;
        while offset < report.total {
            let page = self.store.inventory_page(offset, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            info!(offset, size = page.len(), "requesting metadata page");
            report.pages += 1;
            match self.fetch_page(&page).await {
                Ok(items) => {
                    report.missing += page.len().saturating_sub(items.len());
                    for item in items {
                        report.found += 1;
                        report.rows_updated += self.record(&item, &field_names).await?;
                    }
                }
                Err(err) => {
                    warn!(offset, error = %err, "metadata page failed, skipping");
                    report.failed_pages += 1;
                }
            }
            offset += page.len() as u64;
        }
        Ok(report)
    }

    async fn fetch_page(&self, page: &[InventoryRecord]) -> Result<Vec<PortalItem>, SyncError> {
        let token = self
            .bounded("token request", self.remote.access_token())
            .await?;
        let targets: Vec<ItemTarget> = page
            .iter()
            .map(|record| ItemTarget {
                kind: if record.entry.is_folder {
                    ItemKind::Folder
                } else {
                    ItemKind::File
                },
                path: record.entry.relative_path(),
            })
            .collect();
        let client = self.remote.client().with_token(token);
        let parts = self
            .bounded("metadata batch", client.get_items_batch(&targets))
            .await?;

        let mut items = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let target = targets.get(index).map(|t| t.path.as_str()).unwrap_or("");
            if !part.is_success() {
                warn!(path = target, status = part.status, "item not found on portal");
                continue;
            }
            match PortalItem::from_batch_part(part) {
                Ok(item) => items.push(item),
                Err(err) => warn!(path = target, error = %err, "unreadable batch part"),
            }
        }
        Ok(items)
    }

    async fn bounded<T, E>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, SyncError>
    where
        SyncError: From<E>,
    {
        match timeout(self.call_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SyncError::Timeout(what)),
        }
    }

    async fn record(&self, item: &PortalItem, field_names: &[String]) -> Result<u64, SyncError> {
        let client = self.remote.client();
        let info = convert_item(item, client.server_root(), client.library());
        let meta = project_fields(item, field_names);
        let touched = self
            .store
            .record_portal_info(
                &info.name,
                &info.path_real,
                &serde_json::to_string(&info)?,
                &serde_json::to_string(&meta)?,
            )
            .await?;
        if touched == 0 {
            warn!(name = %info.name, path = %info.path_real, "no inventory row matches portal item");
        }
        Ok(touched)
    }
}

/// `Id`, the list's custom columns, then `ID`.
pub fn field_set(fields: &[FieldInfo]) -> Vec<String> {
    let mut names = Vec::with_capacity(fields.len() + 2);
    names.push("Id".to_string());
    names.extend(fields.iter().map(|field| field.static_name.clone()));
    names.push("ID".to_string());
    names
}

pub fn convert_item(item: &PortalItem, server_root: &str, library: &str) -> PortalInfo {
    let path = library_relative(&item.server_relative_url, server_root, library);
    let path_real = match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    };
    PortalInfo {
        unique_id: item.unique_id.clone(),
        item_count: item.item_count,
        name: item.name.clone(),
        time_created: item.time_created.clone(),
        time_last_modified: item.time_last_modified.clone(),
        server_relative_url: item.server_relative_url.clone(),
        path,
        path_real,
    }
}

fn library_relative(server_relative_url: &str, server_root: &str, library: &str) -> String {
    let library_root = format!("{}/{}", server_root.trim_end_matches('/'), library);
    let rest = server_relative_url
        .strip_prefix(&library_root)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(server_relative_url);
    rest.trim_matches('/').to_string()
}

/// Picks the requested columns out of `ListItemAllFields`; absent columns
/// are kept as `null`.
pub fn project_fields(item: &PortalItem, field_names: &[String]) -> Map<String, Value> {
    let empty = Map::new();
    let fields = item.list_item_all_fields.as_ref().unwrap_or(&empty);
    field_names
        .iter()
        .map(|name| (name.clone(), fields.get(name).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
