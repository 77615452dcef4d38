use crate::storage::{StorageBackend, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key under which the latest credentials are stored
pub const TOKEN_STORAGE_KEY: &str = "emo-platform-api.json";

/// Key under which the bootstrap tokens seen at the last connection are stored
pub const PREVIOUS_BOOTSTRAP_KEY: &str = "emo-platform-api_previous.json";

/// Access/refresh token pair
///
/// An empty string means the token is absent.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_access_token() && !self.has_refresh_token()
    }
}

// Tokens never reach logs; only their lengths do.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token_len", &self.access_token.len())
            .field("refresh_token_len", &self.refresh_token.len())
            .finish()
    }
}

async fn read_pair(storage: &dyn StorageBackend, key: &str) -> Result<Credentials, StorageError> {
    let json = match storage.read(key).await {
        Ok(json) => json,
        Err(StorageError::NotFound(_)) => {
            tracing::debug!("No stored credentials under {}", key);
            return Ok(Credentials::default());
        }
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&json).map_err(|e| {
        tracing::error!("Failed to deserialize credentials from {}: {}", key, e);
        StorageError::Serialization(format!("JSON deserialization failed: {}", e))
    })
}

async fn write_pair(
    storage: &dyn StorageBackend,
    key: &str,
    credentials: &Credentials,
) -> Result<(), StorageError> {
    let json = serde_json::to_vec(credentials).map_err(|e| {
        tracing::error!("Failed to serialize credentials: {}", e);
        StorageError::Serialization(format!("JSON serialization failed: {}", e))
    })?;
    storage.write(key, &json).await
}

/// Load the persisted credentials, or an empty pair if nothing is stored
pub async fn load_credentials(storage: &dyn StorageBackend) -> Result<Credentials, StorageError> {
    let credentials = read_pair(storage, TOKEN_STORAGE_KEY).await?;
    tracing::debug!(
        "Loaded credentials: has_access={}, has_refresh={}",
        credentials.has_access_token(),
        credentials.has_refresh_token()
    );
    Ok(credentials)
}

/// Persist `credentials`, replacing whatever was stored
pub async fn save_credentials(
    storage: &dyn StorageBackend,
    credentials: &Credentials,
) -> Result<(), StorageError> {
    write_pair(storage, TOKEN_STORAGE_KEY, credentials).await?;
    tracing::debug!("Credentials saved: {:?}", credentials);
    Ok(())
}

/// Reset the persisted credentials to an empty pair
pub async fn clear_credentials(storage: &dyn StorageBackend) -> Result<(), StorageError> {
    write_pair(storage, TOKEN_STORAGE_KEY, &Credentials::default()).await?;
    tracing::info!("Stored credentials cleared");
    Ok(())
}

/// Record the current bootstrap tokens and reset the store if they changed
///
/// Bootstrap tokens come from the environment or explicit configuration. When
/// the user supplies a different pair than at the previous connection, the
/// stored credentials were derived from the old pair and are discarded so the
/// new ones take effect. Returns `true` if the store was reset.
pub async fn reconcile_bootstrap(
    storage: &dyn StorageBackend,
    bootstrap: &Credentials,
) -> Result<bool, StorageError> {
    let previous = read_pair(storage, PREVIOUS_BOOTSTRAP_KEY).await?;
    write_pair(storage, PREVIOUS_BOOTSTRAP_KEY, bootstrap).await?;

    if &previous == bootstrap {
        return Ok(false);
    }

    tracing::info!("Bootstrap tokens changed since the previous connection, resetting stored credentials");
    clear_credentials(storage).await?;
    Ok(true)
}
