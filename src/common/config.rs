//! # Configuration
//!
//! [`ClientConfig`] is the immutable description of a client: credentials,
//! backend base URLs and bucket-transfer settings. It can be built in code
//! with the `with_*` methods or loaded from TOML with [`load_config`].
//!
//! The library never consults the environment on its own. Binaries call
//! [`ClientConfig::with_env_api_key`] once at startup to fill a missing key
//! from `VIXIV_API_KEY`.
//!
//! # Example TOML
//!
//! ```toml
//! api_key = "sk-..."
//! user_id = "alice"
//! packing_url = "https://packing.example.com"
//! meshing_url = "https://meshing.example.com"
//!
//! [storage]
//! use_bucket = false
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::routes::Backend;
use crate::error::{Result, VixivError};

/// Environment variable consulted by [`ClientConfig::with_env_api_key`].
pub const API_KEY_ENV: &str = "VIXIV_API_KEY";

/// Default caller identifier sent in the `id` header.
pub const DEFAULT_USER_ID: &str = "anon";

/// Values that look like a key but are template leftovers.
const PLACEHOLDER_KEYS: &[&str] = &["your_api_key", "your-api-key", "<api-key>", "<api_key>", "changeme"];

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: ClientConfig = load_config("config/client.toml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        VixivError::Configuration(format!("failed to parse {}: {}", path.display(), e))
    })
}

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API key sent as `X-API-Key`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Caller identifier sent as `id`
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Base URL of the packing backend
    #[serde(default)]
    pub packing_url: Option<String>,
    /// Base URL of the meshing backend
    #[serde(default)]
    pub meshing_url: Option<String>,
    /// Echo outgoing requests and server failures to the log
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Bucket-mediated transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Stage file payloads through the bucket when permitted
    #[serde(default = "default_true")]
    pub use_bucket: bool,
    /// Credentials for the storage API; anonymous when absent
    #[serde(default)]
    pub credentials: Option<CloudCredentials>,
    /// Storage API endpoint override
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Directory for temporary staging files (OS temp dir when absent)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            user_id: default_user_id(),
            packing_url: None,
            meshing_url: None,
            debug: false,
            storage: StorageConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            use_bucket: true,
            credentials: None,
            endpoint: None,
            staging_dir: None,
        }
    }
}

/// An already-minted OAuth access token for the storage API.
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudCredentials {
    pub access_token: String,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    pub fn with_packing_url(mut self, url: impl Into<String>) -> Self {
        self.packing_url = Some(url.into());
        self
    }

    pub fn with_meshing_url(mut self, url: impl Into<String>) -> Self {
        self.meshing_url = Some(url.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_bucket(mut self, use_bucket: bool) -> Self {
        self.storage.use_bucket = use_bucket;
        self
    }

    pub fn with_credentials(mut self, credentials: CloudCredentials) -> Self {
        self.storage.credentials = Some(credentials);
        self
    }

    pub fn with_storage_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.storage.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.staging_dir = Some(dir.into());
        self
    }

    /// Fill a missing API key from `VIXIV_API_KEY`.
    ///
    /// Meant to be called once, at program startup.
    pub fn with_env_api_key(self) -> Self {
        self.with_api_key_from(|name| std::env::var(name).ok())
    }

    fn with_api_key_from<F>(mut self, lookup: F) -> Self
    where
        F: FnOnce(&str) -> Option<String>,
    {
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            self.api_key = lookup(API_KEY_ENV);
        }
        self
    }

    /// The usable API key, or a configuration error if it is missing or a placeholder.
    pub fn validated_api_key(&self) -> Result<&str> {
        let key = self.api_key.as_deref().map(str::trim).unwrap_or("");
        if key.is_empty() {
            return Err(VixivError::Configuration(format!(
                "API key must be provided either directly or through the {} environment variable",
                API_KEY_ENV
            )));
        }
        if PLACEHOLDER_KEYS.iter().any(|p| key.eq_ignore_ascii_case(p)) {
            return Err(VixivError::Configuration(format!(
                "API key `{}` is a placeholder",
                key
            )));
        }
        Ok(key)
    }

    /// Base URL of `backend`, without trailing slash.
    pub fn base_url(&self, backend: Backend) -> Result<&str> {
        let url = match backend {
            Backend::Packing => self.packing_url.as_deref(),
            Backend::Meshing => self.meshing_url.as_deref(),
        };
        url.map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                VixivError::Configuration(format!("no {} backend URL configured", backend))
            })
    }
}
