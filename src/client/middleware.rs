//! # Client Middleware
//!
//! The transport layer behind [`VixivClient`](super::client::VixivClient).
//! It owns everything that is not specific to one operation:
//!
//! - **Routing**: resolve an [`Operation`] to its backend base URL, failing
//!   before any network access when that backend is not configured
//! - **Authentication**: the `X-API-Key` and `id` default headers
//! - **Transport Decision**: bucket upload + URL reference, or inline
//!   multipart upload, decided per call
//! - **Status Classification**: 429, 401 and other non-2xx responses mapped
//!   onto [`VixivError`]
//! - **Body Decoding**: JSON envelopes and streamed binary bodies
//! - **Debug Echo**: request and failure diagnostics when `debug` is set
//!
//! Nothing here retries. Every method performs at most one API request.

use log::{error, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::common::config::ClientConfig;
use crate::common::messages::{ApiEnvelope, FormFields};
use crate::common::routes::{route, Method, Operation};
use crate::error::{Result, VixivError};
use crate::storage::bucket::Bucket;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Header carrying the caller identifier.
pub const USER_ID_HEADER: &str = "id";
/// Response header flagging success of a binary response.
pub const SUCCESS_HEADER: &str = "success";

/// What kind of file a request carries; decides the bucket-URI field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// Source STL mesh, referenced as `mesh_url`
    Mesh,
    /// Packing result blob, referenced as `results_url`
    Packing,
}

impl FileRole {
    pub fn url_field(self) -> &'static str {
        match self {
            FileRole::Mesh => "mesh_url",
            FileRole::Packing => "results_url",
        }
    }
}

/// Request body variants understood by [`Transport::dispatch`].
enum Payload {
    Empty,
    Json(Value),
    Fields(FormFields),
    Multipart { fields: FormFields, file: PathBuf },
}

impl Payload {
    fn describe(&self) -> String {
        match self {
            Payload::Empty => "none".to_string(),
            Payload::Json(Value::Object(map)) => {
                format!("json {:?}", map.keys().collect::<Vec<_>>())
            }
            Payload::Json(_) => "json".to_string(),
            Payload::Fields(fields) => format!("form {:?}", fields.keys()),
            Payload::Multipart { fields, file } => format!(
                "multipart {:?} + file {}",
                fields.keys(),
                file.display()
            ),
        }
    }
}

/// HTTP transport shared by all operations.
pub struct Transport {
    config: ClientConfig,
    http: reqwest::Client,
    bucket: Option<Bucket>,
}

impl Transport {
    /// Open the HTTP session and, if enabled, the bucket handle.
    ///
    /// # Errors
    ///
    /// [`VixivError::Configuration`] when the API key is missing, a
    /// placeholder, or not a valid header value.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_key = config.validated_api_key()?;

        let mut headers = HeaderMap::new();
        let mut key_value = HeaderValue::from_str(api_key).map_err(|_| {
            VixivError::Configuration("API key contains invalid header characters".to_string())
        })?;
        key_value.set_sensitive(true);
        headers.insert(HeaderName::from_static("x-api-key"), key_value);
        headers.insert(
            HeaderName::from_static(USER_ID_HEADER),
            HeaderValue::from_str(&config.user_id).map_err(|_| {
                VixivError::Configuration(format!("invalid user id `{}`", config.user_id))
            })?,
        );

        let http = reqwest::Client::builder().default_headers(headers).build()?;

        let bucket = if config.storage.use_bucket {
            Some(Bucket::new(
                config.storage.endpoint.as_deref(),
                config.storage.credentials.as_ref(),
            ))
        } else {
            None
        };

        Ok(Self {
            config,
            http,
            bucket,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Full URL of `op`, or a configuration error if its backend is unset.
    pub fn endpoint_url(&self, op: Operation) -> Result<String> {
        let backend = route(op)?;
        let base = self.config.base_url(backend)?;
        Ok(format!("{}/{}", base, op.path()))
    }

    /// Send a request without body.
    pub async fn send_empty(&self, op: Operation) -> Result<Response> {
        let url = self.endpoint_url(op)?;
        self.dispatch(op, url, Payload::Empty).await
    }

    /// Send a JSON body.
    pub async fn send_json<T: Serialize>(&self, op: Operation, body: &T) -> Result<Response> {
        let url = self.endpoint_url(op)?;
        let body = serde_json::to_value(body)?;
        self.dispatch(op, url, Payload::Json(body)).await
    }

    /// Send `fields` together with the file at `file`.
    ///
    /// When bucket transfer is enabled and the credentials may create
    /// objects, the file is uploaded and referenced through
    /// [`FileRole::url_field`]. Otherwise it travels inline as multipart
    /// field `file`. The permission probe runs on every call.
    pub async fn send_with_file(
        &self,
        op: Operation,
        mut fields: FormFields,
        role: FileRole,
        file: &Path,
    ) -> Result<Response> {
        let url = self.endpoint_url(op)?;

        if let Some(bucket) = &self.bucket {
            if bucket.can_create_objects().await {
                let uri = bucket.upload_file(file).await?;
                fields.push(role.url_field(), uri.to_string());
                return self.dispatch(op, url, Payload::Fields(fields)).await;
            }
        }

        self.dispatch(
            op,
            url,
            Payload::Multipart {
                fields,
                file: file.to_path_buf(),
            },
        )
        .await
    }

    async fn dispatch(&self, op: Operation, url: String, payload: Payload) -> Result<Response> {
        if self.config.debug {
            info!("➡️  {} {}", op.method().as_str(), url);
            info!(
                "    headers: {}=<redacted>, {}={}",
                API_KEY_HEADER, USER_ID_HEADER, self.config.user_id
            );
            info!("    payload: {}", payload.describe());
        }

        let request = match op.method() {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };
        let request = match payload {
            Payload::Empty => request,
            Payload::Json(body) => request.json(&body),
            Payload::Fields(fields) => request.form(&fields),
            Payload::Multipart { fields, file } => request.multipart(multipart_form(fields, &file).await?),
        };

        let response = request.send().await?;
        self.check_status(op, response).await
    }

    async fn check_status(&self, op: Operation, response: Response) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VixivError::RateLimited);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(VixivError::Authentication);
        }
        if status.is_success() {
            return Ok(response);
        }

        let (header_error, header_traceback) = failure_headers(&response);
        let text = response.text().await.unwrap_or_default();
        let envelope = serde_json::from_str::<ApiEnvelope>(&text).ok();
        let message = envelope
            .as_ref()
            .and_then(|e| e.error.clone())
            .or(header_error)
            .unwrap_or_else(|| {
                if text.trim().is_empty() {
                    status.canonical_reason().unwrap_or("unknown error").to_string()
                } else {
                    text.trim().to_string()
                }
            });
        let traceback = envelope.and_then(|e| e.traceback).or(header_traceback);

        if self.config.debug {
            error!("❌ {} failed with status {}", op, status.as_u16());
            error!("    error: {}", message);
            if let Some(tb) = &traceback {
                error!("    traceback: {}", tb);
            }
        }

        Err(VixivError::Request {
            status: status.as_u16(),
            message,
            traceback,
        })
    }

    /// Parse a JSON envelope, turning `success: false` into an error.
    pub async fn read_envelope(&self, op: Operation, response: Response) -> Result<ApiEnvelope> {
        let envelope: ApiEnvelope = response.json().await?;
        envelope.into_success().inspect_err(|e| self.log_failure(op, e))
    }

    /// Parse a bare JSON object (status style responses).
    pub async fn read_object(&self, op: Operation, response: Response) -> Result<Map<String, Value>> {
        let value: Value = response.json().await?;
        let Value::Object(map) = value else {
            return Err(VixivError::Decode(format!(
                "{} returned a non-object JSON body",
                op
            )));
        };
        if map.get("success") == Some(&Value::Bool(false)) {
            let err = VixivError::Application {
                message: map
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error occurred")
                    .to_string(),
                traceback: map
                    .get("traceback")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            self.log_failure(op, &err);
            return Err(err);
        }
        Ok(map)
    }

    /// Collect a binary body flagged by the `success` header.
    ///
    /// The body is streamed chunk by chunk into one buffer; nothing is
    /// returned unless the whole body arrived.
    pub async fn read_binary(&self, op: Operation, mut response: Response) -> Result<Vec<u8>> {
        if !header_flag(&response, SUCCESS_HEADER) {
            let (message, traceback) = failure_headers(&response);
            let err = VixivError::Application {
                message: message.unwrap_or_else(|| "Unknown error occurred".to_string()),
                traceback,
            };
            self.log_failure(op, &err);
            return Err(err);
        }

        let mut buf = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        info!("📥 {} returned {} bytes", op, buf.len());
        Ok(buf)
    }

    fn log_failure(&self, op: Operation, err: &VixivError) {
        if self.config.debug {
            error!("❌ {} reported failure: {}", op, err);
            if let Some(tb) = err.traceback() {
                error!("    traceback: {}", tb);
            }
        }
    }
}

async fn multipart_form(fields: FormFields, file: &Path) -> Result<Form> {
    let handle = tokio::fs::File::open(file).await?;
    let size = handle.metadata().await?.len();
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let part = Part::stream_with_length(handle, size)
        .file_name(file_name)
        .mime_str("application/octet-stream")?;

    let form = fields
        .iter()
        .fold(Form::new(), |form, (k, v)| form.text(k.to_string(), v.to_string()));
    Ok(form.part("file", part))
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn header_flag(response: &Response, name: &str) -> bool {
    header_str(response, name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn failure_headers(response: &Response) -> (Option<String>, Option<String>) {
    (
        header_str(response, "error"),
        header_str(response, "traceback"),
    )
}
