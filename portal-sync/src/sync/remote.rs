use std::path::Path;

use portal_core::{OAuthClient, OAuthError, PortalClient, PortalError};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::uploader::{ItemOutcome, Portal};

/// [`Portal`] backed by the real REST API.
#[derive(Clone)]
pub struct PortalRemote {
    oauth: OAuthClient,
    client: PortalClient,
    resource: String,
}

impl PortalRemote {
    pub fn new(oauth: OAuthClient, client: PortalClient, resource: impl Into<String>) -> Self {
        Self {
            oauth,
            client,
            resource: resource.into(),
        }
    }

    pub fn client(&self) -> &PortalClient {
        &self.client
    }

    async fn stream_file(
        &self,
        local_path: &Path,
        remote_folder: &str,
        remote_name: &str,
        token: &str,
    ) -> Result<(), UploadFailure> {
        let file = tokio::fs::File::open(local_path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        self.client
            .with_token(token)
            .upload_file(remote_folder, remote_name, body)
            .await?;
        Ok(())
    }
}

impl Portal for PortalRemote {
    async fn access_token(&self) -> Result<String, OAuthError> {
        let token = self.oauth.client_credentials(&self.resource).await?;
        Ok(token.access_token)
    }

    async fn create_folder(&self, remote_path: &str, id: i64, token: &str) -> ItemOutcome {
        match self.client.with_token(token).create_folder(remote_path).await {
            Ok(item) => {
                debug!(id, path = %item.server_relative_url, "folder created");
                ItemOutcome::succeeded(id)
            }
            Err(err) => {
                warn!(
                    id,
                    path = remote_path,
                    class = ?err.classification(),
                    error = %err,
                    "folder creation failed"
                );
                ItemOutcome::failed(id)
            }
        }
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        remote_folder: &str,
        remote_name: &str,
        id: i64,
        token: &str,
    ) -> ItemOutcome {
        match self
            .stream_file(local_path, remote_folder, remote_name, token)
            .await
        {
            Ok(()) => {
                debug!(id, folder = remote_folder, name = remote_name, "file uploaded");
                ItemOutcome::succeeded(id)
            }
            Err(UploadFailure::Open(err)) => {
                warn!(id, path = %local_path.display(), error = %err, "cannot read local file");
                ItemOutcome::failed(id)
            }
            Err(UploadFailure::Portal(err)) => {
                warn!(
                    id,
                    folder = remote_folder,
                    name = remote_name,
                    class = ?err.classification(),
                    error = %err,
                    "file upload failed"
                );
                ItemOutcome::failed(id)
            }
        }
    }
}

enum UploadFailure {
    Open(std::io::Error),
    Portal(PortalError),
}

impl From<std::io::Error> for UploadFailure {
    fn from(err: std::io::Error) -> Self {
        UploadFailure::Open(err)
    }
}

impl From<PortalError> for UploadFailure {
    fn from(err: PortalError) -> Self {
        UploadFailure::Portal(err)
    }
}
