use crate::platform_api::client::Client;
use crate::platform_api::token_storage::Credentials;
use crate::platform_api::types::PlatformError;
use crate::storage::{default_token_dir, FilesystemStorage, KeyringStorage, StorageBackend};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default emo Platform API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://platform-api.bocco.me";

/// Environment variable holding a bootstrap access token
pub const ACCESS_TOKEN_ENV: &str = "EMO_PLATFORM_API_ACCESS_TOKEN";

/// Environment variable holding a bootstrap refresh token
pub const REFRESH_TOKEN_ENV: &str = "EMO_PLATFORM_API_REFRESH_TOKEN";

#[derive(Clone)]
enum StorageChoice {
    DefaultDirectory,
    Directory(PathBuf),
    Keyring(String),
    Custom(Arc<dyn StorageBackend>),
}

/// Inert client configuration
///
/// Nothing touches the network or the token store until [`ClientConfig::connect`]
/// runs token resolution and hands back a ready [`Client`].
///
/// # Example
///
/// ```no_run
/// use emo_platform_sdk::ClientConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientConfig::new()
///     .with_token_dir("/var/lib/my-app/emo")
///     .with_refresh_token("REFRESH_TOKEN")
///     .connect()
///     .await?;
///
/// let account = client.get_account_info().await?;
/// println!("Hello {}", account.name);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    endpoint: String,
    storage: StorageChoice,
    tokens: Option<Credentials>,
    api_key: Option<String>,
    timeout: Option<Duration>,
    track_bootstrap_changes: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            storage: StorageChoice::DefaultDirectory,
            tokens: None,
            api_key: None,
            timeout: Some(Duration::from_secs(30)),
            track_bootstrap_changes: true,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = match &self.storage {
            StorageChoice::DefaultDirectory => "default directory".to_string(),
            StorageChoice::Directory(path) => format!("directory {:?}", path),
            StorageChoice::Keyring(service) => format!("keyring service {}", service),
            StorageChoice::Custom(_) => "custom backend".to_string(),
        };
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("storage", &storage)
            .field("explicit_tokens", &self.tokens.is_some())
            .field("api_key", &self.api_key.is_some())
            .field("timeout", &self.timeout)
            .field("track_bootstrap_changes", &self.track_bootstrap_changes)
            .finish()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API endpoint (builder pattern)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Store tokens as JSON files in `dir` (builder pattern)
    pub fn with_token_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage = StorageChoice::Directory(dir.into());
        self
    }

    /// Store tokens in the OS keychain under `service` (builder pattern)
    pub fn with_keyring(mut self, service: impl Into<String>) -> Self {
        self.storage = StorageChoice::Keyring(service.into());
        self
    }

    /// Use a caller-provided storage backend (builder pattern)
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = StorageChoice::Custom(storage);
        self
    }

    /// Use explicit bootstrap tokens instead of the environment (builder pattern)
    pub fn with_tokens(mut self, tokens: Credentials) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Use an explicit bootstrap refresh token instead of the environment (builder pattern)
    pub fn with_refresh_token(self, refresh_token: impl Into<String>) -> Self {
        self.with_tokens(Credentials::new("", refresh_token))
    }

    /// Send `X-Channel-User: <api_key>` on every request (builder pattern)
    ///
    /// Business plan accounts address a tenant with this header. Rooms created
    /// with their own key override it.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the HTTP request timeout; `None` disables it (builder pattern)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable resetting the store when bootstrap tokens change (builder pattern)
    pub fn with_bootstrap_tracking(mut self, enabled: bool) -> Self {
        self.track_bootstrap_changes = enabled;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn tracks_bootstrap_changes(&self) -> bool {
        self.track_bootstrap_changes
    }

    /// Bootstrap tokens: explicit configuration if set, else the environment
    ///
    /// Missing variables read as empty strings.
    pub fn bootstrap_tokens(&self) -> Credentials {
        if let Some(tokens) = &self.tokens {
            return tokens.clone();
        }
        Credentials::new(
            std::env::var(ACCESS_TOKEN_ENV).unwrap_or_default(),
            std::env::var(REFRESH_TOKEN_ENV).unwrap_or_default(),
        )
    }

    pub(crate) fn build_storage(&self) -> Result<Arc<dyn StorageBackend>, PlatformError> {
        let storage: Arc<dyn StorageBackend> = match &self.storage {
            StorageChoice::DefaultDirectory => Arc::new(FilesystemStorage::new(default_token_dir()?)?),
            StorageChoice::Directory(path) => Arc::new(FilesystemStorage::new(path)?),
            StorageChoice::Keyring(service) => Arc::new(KeyringStorage::new(service.clone())),
            StorageChoice::Custom(storage) => Arc::clone(storage),
        };
        Ok(storage)
    }

    pub(crate) fn build_http_client(&self) -> Result<reqwest::Client, PlatformError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| PlatformError::Config(format!("Failed to build HTTP client: {}", e)))
    }

    /// Resolve tokens and return a ready client
    pub async fn connect(self) -> Result<Client, PlatformError> {
        Client::connect(self).await
    }
}
