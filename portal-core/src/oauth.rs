use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://accounts.accesscontrol.windows.net";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("token request denied: {0}")]
    Denied(String),
    #[error("malformed token response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Client-credentials token source for the portal's access-control service.
#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    base_url: Url,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_base_url(DEFAULT_BASE_URL, tenant_id, client_id, client_secret)
    }

    pub fn with_base_url(
        base_url: &str,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_http(Client::new(), base_url, tenant_id, client_id, client_secret)
    }

    pub fn with_http(
        http: Client,
        base_url: &str,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub async fn client_credentials(&self, resource: &str) -> Result<OAuthToken, OAuthError> {
        let url = self
            .base_url
            .join(&format!("/{}/tokens/OAuth/2", self.tenant_id))?;
        let form = [
            ("grant_type", "client_credentials"),
            ("resource", resource),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self.http.post(url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        // A denial can arrive with any status code; report it by description.
        if let Some(description) = denial_description(&body) {
            return Err(OAuthError::Denied(description));
        }
        if !status.is_success() {
            return Err(OAuthError::Api { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn denial_description(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    let description = value
        .get("error_description")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(description.unwrap_or_else(|| match error.as_str() {
        Some(code) => code.to_string(),
        None => error.to_string(),
    }))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub resource: Option<String>,
}

// The access-control service encodes numbers as strings.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(text)) => text.parse().ok(),
        _ => None,
    })
}
