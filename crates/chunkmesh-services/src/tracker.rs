//! HTTP client for the tracker's directory API.
//!
//! Any non-2xx reply fails the call. Nothing is retried here.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use chunkmesh_core::config::TrackerConfig;
use chunkmesh_core::{FileDescriptor, FileSummary, PeerLocation, PublishReceipt};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Reply to peer add/remove.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TrackerClient {
    base: String,
    http: reqwest::Client,
}

impl TrackerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        let base = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, http })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self, TrackerError> {
        Self::new(config.url.clone(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// `GET /peers`
    pub async fn peers(&self) -> Result<Vec<PeerLocation>, TrackerError> {
        self.get("/peers").await
    }

    /// `POST /peers/add`
    pub async fn add_peer(&self, peer: PeerLocation) -> Result<StatusReply, TrackerError> {
        self.post("/peers/add", &peer).await
    }

    /// `POST /peers/remove`
    pub async fn remove_peer(&self, peer: PeerLocation) -> Result<StatusReply, TrackerError> {
        self.post("/peers/remove", &peer).await
    }

    /// `GET /files`
    pub async fn files(&self) -> Result<Vec<FileSummary>, TrackerError> {
        self.get("/files").await
    }

    /// `POST /files/upload_file`
    pub async fn publish(&self, file: &FileDescriptor) -> Result<PublishReceipt, TrackerError> {
        self.post("/files/upload_file", file).await
    }

    /// `GET /files/download_file/{id}`
    pub async fn file(&self, id: u64) -> Result<FileDescriptor, TrackerError> {
        self.get(&format!("/files/download_file/{id}")).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TrackerError> {
        let resp = self.http.get(self.url(path)).send().await?;
        Ok(check(resp, path).await?.json().await?)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, TrackerError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Ok(check(resp, path).await?.json().await?)
    }
}

async fn check(resp: Response, path: &str) -> Result<Response, TrackerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::warn!(path, status = %status, body = %body, "tracker request failed");
    Err(TrackerError::Status { status, body })
}
