use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

const DEFAULT_SYNC_ROOT: &str = "upload";
const DEFAULT_PARALLELISM: usize = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_INSERT_CHUNK: usize = 1000;
const DEFAULT_METADATA_PAGE: usize = 100;
const DEFAULT_OAUTH_URL: &str = "https://accounts.accesscontrol.windows.net";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub sync_root: PathBuf,
    /// `None` selects the per-user data directory.
    pub database_url: Option<String>,
    pub parallelism: usize,
    /// Bound on one remote call, including the whole transfer of a file
    /// upload. Raise it when syncing large files over slow links.
    pub request_timeout: Duration,
    pub insert_chunk_size: usize,
    pub metadata_page_size: usize,
    pub portal: PortalSettings,
}

#[derive(Clone, Debug, Default)]
pub struct PortalSettings {
    pub site_url: Option<String>,
    pub document_library: Option<String>,
    pub list_guid: Option<String>,
    pub portal_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub resource: Option<String>,
    pub oauth_url: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let home = dirs::home_dir();
        let sync_root = non_empty("PORTAL_SYNC_ROOT")
            .map(|value| expand_with_home(&value, home.as_deref()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SYNC_ROOT));

        Self {
            sync_root,
            database_url: non_empty("PORTAL_DATABASE_URL"),
            parallelism: read_positive(
                non_empty("PORTAL_PARALLELISM").as_deref(),
                DEFAULT_PARALLELISM,
            ),
            request_timeout: Duration::from_secs(read_positive(
                non_empty("PORTAL_REQUEST_TIMEOUT_SECS").as_deref(),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            insert_chunk_size: read_positive(
                non_empty("PORTAL_INSERT_CHUNK").as_deref(),
                DEFAULT_INSERT_CHUNK,
            ),
            metadata_page_size: read_positive(
                non_empty("PORTAL_METADATA_PAGE").as_deref(),
                DEFAULT_METADATA_PAGE,
            ),
            portal: PortalSettings {
                site_url: non_empty("PORTAL_SITE_URL"),
                document_library: non_empty("PORTAL_DOCUMENT_LIBRARY"),
                list_guid: non_empty("PORTAL_LIST_GUID"),
                portal_id: non_empty("PORTAL_ID"),
                tenant_id: non_empty("PORTAL_TENANT_ID"),
                client_id: non_empty("PORTAL_CLIENT_ID"),
                client_secret: non_empty("PORTAL_CLIENT_SECRET"),
                resource: non_empty("PORTAL_RESOURCE"),
                oauth_url: non_empty("PORTAL_OAUTH_URL")
                    .unwrap_or_else(|| DEFAULT_OAUTH_URL.to_string()),
            },
        }
    }
}

impl PortalSettings {
    pub fn site_url(&self) -> Result<&str, ConfigError> {
        required(&self.site_url, "PORTAL_SITE_URL")
    }

    pub fn document_library(&self) -> Result<&str, ConfigError> {
        required(&self.document_library, "PORTAL_DOCUMENT_LIBRARY")
    }

    pub fn list_guid(&self) -> Result<&str, ConfigError> {
        required(&self.list_guid, "PORTAL_LIST_GUID")
    }

    pub fn portal_id(&self) -> Result<&str, ConfigError> {
        required(&self.portal_id, "PORTAL_ID")
    }

    pub fn tenant_id(&self) -> Result<&str, ConfigError> {
        required(&self.tenant_id, "PORTAL_TENANT_ID")
    }

    pub fn client_id(&self) -> Result<&str, ConfigError> {
        required(&self.client_id, "PORTAL_CLIENT_ID")
    }

    pub fn client_secret(&self) -> Result<&str, ConfigError> {
        required(&self.client_secret, "PORTAL_CLIENT_SECRET")
    }

    pub fn resource(&self) -> Result<&str, ConfigError> {
        required(&self.resource, "PORTAL_RESOURCE")
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    value.as_deref().ok_or(ConfigError::Missing(name))
}

fn read_positive<T>(value: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) if value == "~" => home.to_path_buf(),
        Some(home) => match value.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> SyncConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.sync_root, PathBuf::from("upload"));
        assert_eq!(config.parallelism, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.insert_chunk_size, 1000);
        assert_eq!(config.metadata_page_size, 100);
        assert_eq!(config.database_url, None);
        assert_eq!(
            config.portal.oauth_url,
            "https://accounts.accesscontrol.windows.net"
        );
    }

    #[test]
    fn zero_and_garbage_numbers_fall_back() {
        let config = config_from(&[
            ("PORTAL_PARALLELISM", "0"),
            ("PORTAL_REQUEST_TIMEOUT_SECS", "soon"),
            ("PORTAL_INSERT_CHUNK", " 250 "),
        ]);
        assert_eq!(config.parallelism, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.insert_chunk_size, 250);
    }

    #[test]
    fn missing_portal_settings_name_the_variable() {
        let config = config_from(&[("PORTAL_SITE_URL", "https://portal.example")]);
        assert_eq!(config.portal.site_url().unwrap(), "https://portal.example");
        let err = config.portal.client_secret().unwrap_err();
        assert_eq!(err.to_string(), "PORTAL_CLIENT_SECRET is not set");
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[("PORTAL_ID", "  ")]);
        assert!(config.portal.portal_id().is_err());
    }

    #[test]
    fn expands_home_prefix() {
        let home = Path::new("/home/user");
        assert_eq!(
            expand_with_home("~/Docs", Some(home)),
            PathBuf::from("/home/user/Docs")
        );
        assert_eq!(expand_with_home("~", Some(home)), PathBuf::from("/home/user"));
        assert_eq!(expand_with_home("/data", Some(home)), PathBuf::from("/data"));
        assert_eq!(expand_with_home("~/Docs", None), PathBuf::from("~/Docs"));
    }
}
