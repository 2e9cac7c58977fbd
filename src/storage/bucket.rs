//! # Cloud Bucket Handle
//!
//! Upload-only access to one fixed Google Cloud Storage bucket through the
//! JSON API:
//!
//! ```text
//! GET  {endpoint}/storage/v1/b/{bucket}/iam/testPermissions?permissions=storage.objects.create
//! POST {endpoint}/upload/storage/v1/b/{bucket}/o?uploadType=media&name=incoming/<uuid><ext>
//! ```
//!
//! Uploaded objects are consumed by the server; deleting them is left to the
//! server or the bucket's lifecycle policy.

use log::{info, warn};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::common::config::CloudCredentials;
use crate::error::{Result, VixivError};

/// Bucket that receives staged payloads.
pub const BUCKET_NAME: &str = "vixiv-incoming";

/// Public Google Cloud Storage endpoint.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

const INCOMING_PREFIX: &str = "incoming";
const CREATE_PERMISSION: &str = "storage.objects.create";

/// `gs://bucket/object` reference handed to the API instead of a file body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketUri(String);

impl BucketUri {
    pub fn new(bucket: &str, object: &str) -> Self {
        Self(format!("gs://{}/{}", bucket, object))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize)]
struct TestPermissionsResponse {
    #[serde(default)]
    permissions: Vec<String>,
}

/// Fresh object name: `incoming/<random-id><original-extension>`.
pub fn object_name(source: &Path) -> String {
    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    format!("{}/{}{}", INCOMING_PREFIX, Uuid::new_v4().simple(), extension)
}

/// Handle on the fixed staging bucket.
///
/// Uses its own HTTP client so the API key headers never reach the storage API.
pub struct Bucket {
    http: reqwest::Client,
    name: String,
    endpoint: String,
    access_token: Option<String>,
}

impl Bucket {
    pub fn new(endpoint: Option<&str>, credentials: Option<&CloudCredentials>) -> Self {
        Self {
            http: reqwest::Client::new(),
            name: BUCKET_NAME.to_string(),
            endpoint: endpoint
                .unwrap_or(DEFAULT_STORAGE_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            access_token: credentials.map(|c| c.access_token.clone()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Ask the storage API whether our credentials may create objects.
    ///
    /// Any probe failure is reported as `false` so the caller falls back to
    /// inline upload.
    pub async fn can_create_objects(&self) -> bool {
        match self.probe().await {
            Ok(granted) => granted,
            Err(e) => {
                warn!("⚠️  Bucket permission probe failed, using inline upload: {}", e);
                false
            }
        }
    }

    async fn probe(&self) -> Result<bool> {
        let url = format!(
            "{}/storage/v1/b/{}/iam/testPermissions",
            self.endpoint, self.name
        );
        let response = self
            .authorize(self.http.get(&url))
            .query(&[("permissions", CREATE_PERMISSION)])
            .send()
            .await?;

        if !response.status().is_success() {
            info!(
                "Bucket {} denied permission probe with status {}",
                self.name,
                response.status()
            );
            return Ok(false);
        }

        let body: TestPermissionsResponse = response.json().await?;
        Ok(body.permissions.iter().any(|p| p == CREATE_PERMISSION))
    }

    /// Stream a local file into the bucket under a fresh object name.
    pub async fn upload_file(&self, path: &Path) -> Result<BucketUri> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        self.upload(&object_name(path), file, size).await
    }

    /// Upload `size` bytes of `body` as `object`.
    pub async fn upload(
        &self,
        object: &str,
        body: impl Into<reqwest::Body>,
        size: u64,
    ) -> Result<BucketUri> {
        let url = format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.name);
        let response = self
            .authorize(self.http.post(&url))
            .query(&[("uploadType", "media"), ("name", object)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| VixivError::Storage(format!("upload of {} failed: {}", object, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(VixivError::Storage(format!(
                "upload of {} rejected with status {}: {}",
                object, status, detail
            )));
        }

        let uri = BucketUri::new(&self.name, object);
        info!("☁️  Uploaded {} bytes to {}", size, uri);
        Ok(uri)
    }
}
