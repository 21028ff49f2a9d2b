use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use url::Url;

use crate::batch::{self, BatchError, BatchRequest, BatchResponse};

const ODATA_VERBOSE: &str = "application/json;odata=verbose";
const CUSTOM_FIELDS_FILTER: &str =
    "(Group eq 'Custom Columns') and (FromBaseType eq false) and (Hidden ne true)";

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("api rejected request: {0}")]
    Rejected(String),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed batch response: {0}")]
    Batch(#[from] BatchError),
    #[error("batch response has no content type")]
    MissingContentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl PortalError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            PortalError::Api { status, .. } => Some(classify_api_status(*status)),
            PortalError::Rejected(_) => Some(ApiErrorClass::Permanent),
            PortalError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Folder,
}

/// An item addressed by its path inside the document library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTarget {
    pub kind: ItemKind,
    pub path: String,
}

#[derive(Clone)]
pub struct PortalClient {
    http: Client,
    site_url: Url,
    library: String,
    token: String,
}

impl PortalClient {
    pub fn new(
        site_url: &str,
        library: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, PortalError> {
        Self::with_http(Client::new(), site_url, library, token)
    }

    pub fn with_http(
        http: Client,
        site_url: &str,
        library: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, PortalError> {
        // Endpoints are joined relative to the site, so keep a trailing slash.
        let site_url = if site_url.ends_with('/') {
            Url::parse(site_url)?
        } else {
            Url::parse(&format!("{site_url}/"))?
        };
        let library: String = library.into();
        Ok(Self {
            http,
            site_url,
            library: library.trim_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Same site and connection pool, different bearer token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            site_url: self.site_url.clone(),
            library: self.library.clone(),
            token: token.into(),
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    /// Server-relative path of the site, e.g. `/sites/Team`.
    pub fn server_root(&self) -> &str {
        self.site_url.path().trim_end_matches('/')
    }

    pub async fn create_folder(&self, remote_path: &str) -> Result<PortalItem, PortalError> {
        let url = self.endpoint("_api/web/folders?$expand=ListItemAllFields")?;
        let payload = json!({
            "__metadata": { "type": "SP.Folder" },
            "ServerRelativeUrl": self.library_path(remote_path),
        });
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header(ACCEPT, ODATA_VERBOSE)
            .header(CONTENT_TYPE, ODATA_VERBOSE)
            .body(payload.to_string())
            .send()
            .await?;
        let envelope: Verbose<PortalItem> = Self::handle_response(response).await?;
        Ok(envelope.d)
    }

    /// Uploads `body` as `name` into `folder` (library-relative, empty for the
    /// library root), overwriting any existing file. Returns `None` when the
    /// server accepts the upload without describing the new item.
    pub async fn upload_file(
        &self,
        folder: &str,
        name: &str,
        body: impl Into<Body>,
    ) -> Result<Option<PortalItem>, PortalError> {
        let url = self.endpoint(&format!(
            "_api/web/GetFolderByServerRelativeUrl('{}')/Files/add(url='{}',overwrite=true)?$expand=ListItemAllFields",
            odata_literal(&self.library_path(folder)),
            odata_literal(name),
        ))?;
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header(ACCEPT, ODATA_VERBOSE)
            .body(body)
            .send()
            .await?;
        let text = Self::checked_text(response).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let envelope: Verbose<PortalItem> = serde_json::from_str(&text)?;
        Ok(Some(envelope.d))
    }

    pub async fn list_custom_fields(&self, list_guid: &str) -> Result<Vec<FieldInfo>, PortalError> {
        let mut url = self.endpoint(&format!(
            "_api/Web/Lists(guid'{}')/Fields",
            odata_literal(list_guid)
        ))?;
        url.query_pairs_mut()
            .append_pair("$filter", CUSTOM_FIELDS_FILTER)
            .append_pair("$select", "StaticName,FieldTypeKind");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header(ACCEPT, ODATA_VERBOSE)
            .send()
            .await?;
        let envelope: Verbose<Results<FieldInfo>> = Self::handle_response(response).await?;
        Ok(envelope.d.results)
    }

    pub fn item_url(&self, target: &ItemTarget) -> Result<Url, PortalError> {
        let path = match target.kind {
            ItemKind::Folder => format!(
                "_api/web/GetFolderByServerRelativePath(decodedurl='{}')?$expand=ListItemAllFields",
                odata_literal(&self.library_path(&target.path)),
            ),
            ItemKind::File => format!(
                "_api/web/GetFileByServerRelativePath(decodedurl='{}/{}')?$expand=ListItemAllFields",
                odata_literal(self.server_root()),
                odata_literal(&self.library_path(&target.path)),
            ),
        };
        self.endpoint(&path)
    }

    /// Fetches every target in one `$batch` round trip. Parts come back in
    /// request order; failed lookups are returned as non-2xx parts rather
    /// than as an error.
    pub async fn get_items_batch(
        &self,
        targets: &[ItemTarget],
    ) -> Result<Vec<BatchResponse>, PortalError> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = BatchRequest::new();
        for target in targets {
            request.push_get(&self.item_url(target)?);
        }
        let url = self.endpoint("_api/$batch")?;
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .header(ACCEPT, ODATA_VERBOSE)
            .header(CONTENT_TYPE, request.content_type())
            .body(request.into_body())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PortalError::Api { status, body });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(PortalError::MissingContentType)?;
        let body = response.text().await?;
        Ok(batch::parse_response(&content_type, &body)?)
    }

    fn library_path(&self, relative: &str) -> String {
        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            self.library.clone()
        } else {
            format!("{}/{}", self.library, relative)
        }
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, PortalError> {
        Ok(self.site_url.join(path)?)
    }

    async fn checked_text(response: reqwest::Response) -> Result<String, PortalError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PortalError::Api { status, body: text });
        }
        if let Some(message) = embedded_error(&text) {
            return Err(PortalError::Rejected(message));
        }
        Ok(text)
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PortalError> {
        let text = Self::checked_text(response).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// The API sometimes reports failures inside a 2xx body.
fn embedded_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    if let Some(error) = value.get("error") {
        let message = error
            .pointer("/message/value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Some(message);
    }
    value
        .get("error_description")
        .map(|description| match description.as_str() {
            Some(text) => text.to_string(),
            None => description.to_string(),
        })
}

/// Quotes a value for use inside an OData string literal in a URL path.
fn odata_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct Verbose<T> {
    d: T,
}

#[derive(Debug, Deserialize)]
struct Results<T> {
    results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PortalItem {
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub item_count: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub time_created: Option<String>,
    #[serde(default)]
    pub time_last_modified: Option<String>,
    pub server_relative_url: String,
    #[serde(default)]
    pub list_item_all_fields: Option<Map<String, Value>>,
}

impl PortalItem {
    /// Parses one `$batch` part body (`{"d": {...}}`).
    pub fn from_batch_part(part: &BatchResponse) -> Result<Self, PortalError> {
        let envelope: Verbose<PortalItem> = part.json()?;
        Ok(envelope.d)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct FieldInfo {
    pub static_name: String,
    #[serde(default)]
    pub field_type_kind: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odata_literal_doubles_quotes_and_escapes_url_delimiters() {
        assert_eq!(odata_literal("O'Brien #1?.txt"), "O''Brien %231%3F.txt");
        assert_eq!(odata_literal("100%"), "100%25");
    }

    #[test]
    fn embedded_error_prefers_message_value() {
        let body = r#"{"error":{"code":"-1","message":{"lang":"en-US","value":"File Not Found."}}}"#;
        assert_eq!(embedded_error(body).as_deref(), Some("File Not Found."));
        let body = r#"{"error_description":"token expired"}"#;
        assert_eq!(embedded_error(body).as_deref(), Some("token expired"));
        assert_eq!(embedded_error(r#"{"d":{}}"#), None);
        assert_eq!(embedded_error("not json"), None);
    }

    #[test]
    fn server_root_is_site_path() {
        let client =
            PortalClient::new("https://portal.example/sites/Team", "/Shared Docs/", "t").unwrap();
        assert_eq!(client.server_root(), "/sites/Team");
        assert_eq!(client.library(), "Shared Docs");
        assert_eq!(client.library_path(""), "Shared Docs");
        assert_eq!(client.library_path("a/b"), "Shared Docs/a/b");
    }

    #[test]
    fn file_and_folder_urls_differ_in_root() {
        let client = PortalClient::new("https://portal.example/sites/Team", "Docs", "t").unwrap();
        let folder = client
            .item_url(&ItemTarget {
                kind: ItemKind::Folder,
                path: "sub".into(),
            })
            .unwrap();
        let file = client
            .item_url(&ItemTarget {
                kind: ItemKind::File,
                path: "sub/b.txt".into(),
            })
            .unwrap();
        assert!(
            folder
                .as_str()
                .contains("GetFolderByServerRelativePath(decodedurl='Docs/sub')")
        );
        assert!(
            file.as_str()
                .contains("GetFileByServerRelativePath(decodedurl='/sites/Team/Docs/sub/b.txt')")
        );
        assert_eq!(file.query(), Some("$expand=ListItemAllFields"));
    }

    #[test]
    fn classification_maps_statuses() {
        let err = PortalError::Api {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
        let err = PortalError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
        assert_eq!(
            PortalError::Rejected("bad name".into()).classification(),
            Some(ApiErrorClass::Permanent)
        );
    }
}
