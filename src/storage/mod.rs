use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;

/// Storage backend trait for persisting credentials
///
/// Keys are relative names such as `emo-platform-api.json`. Implementations
/// must make `write` atomic: a concurrent `read` sees either the previous
/// value or the new one, never a partial write.
pub trait StorageBackend: Send + Sync {
    /// Replace the value stored under `key`
    fn write(
        &self,
        key: &str,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>>;

    /// Read the value stored under `key`
    ///
    /// Fails with [`StorageError::NotFound`] when nothing is stored there.
    fn read(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, StorageError>> + Send + '_>>;
}

/// Storage errors
#[derive(Debug)]
pub enum StorageError {
    /// Nothing is stored under the key
    NotFound(String),
    /// IO error
    Io(std::io::Error),
    /// Stored data could not be (de)serialized
    Serialization(String),
    /// Keyring error
    Keyring(String),
    /// Path error
    Path(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(key) => write!(f, "Nothing stored under {}", key),
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StorageError::Keyring(msg) => write!(f, "Keyring error: {}", msg),
            StorageError::Path(msg) => write!(f, "Path error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

// `io::Error` is not `Clone`; a copy keeps its kind and message.
impl Clone for StorageError {
    fn clone(&self) -> Self {
        match self {
            StorageError::NotFound(key) => StorageError::NotFound(key.clone()),
            StorageError::Io(e) => StorageError::Io(std::io::Error::new(e.kind(), e.to_string())),
            StorageError::Serialization(msg) => StorageError::Serialization(msg.clone()),
            StorageError::Keyring(msg) => StorageError::Keyring(msg.clone()),
            StorageError::Path(msg) => StorageError::Path(msg.clone()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<keyring::Error> for StorageError {
    fn from(err: keyring::Error) -> Self {
        StorageError::Keyring(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Default directory for persisted tokens: `<config dir>/emo-platform`
pub fn default_token_dir() -> Result<PathBuf, StorageError> {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("emo-platform"))
        .ok_or_else(|| StorageError::Path("Cannot determine a config or home directory".to_string()))
}

/// Plain JSON files in a directory, one file per key
///
/// This is the default credential store. Files are written with a
/// write-to-temp-then-rename sequence so readers never observe a half-written
/// token pair, and get 0600 permissions on Unix.
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    /// Create a filesystem storage rooted at `base_path`, creating it if needed
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();

        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        Ok(Self { base_path })
    }

    /// Directory the files live in
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains("..") || Path::new(key).is_absolute() {
            return Err(StorageError::Path(format!("Invalid storage key: {:?}", key)));
        }
        Ok(self.base_path.join(key))
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create a new file readable only by the owner on Unix
///
/// The mode is applied at creation, so the token bytes are never readable by
/// others, not even before the rename.
async fn create_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

async fn write_atomically(target: PathBuf, data: Vec<u8>) -> Result<(), StorageError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::Path(format!("No file name in {:?}", target)))?;
    let tmp_path = target.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = create_private(&tmp_path).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp_path, &target).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}

impl StorageBackend for FilesystemStorage {
    fn write(
        &self,
        key: &str,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        let full_path = self.resolve_path(key);
        let data = data.to_vec();

        Box::pin(async move {
            let full_path = full_path?;
            write_atomically(full_path.clone(), data).await?;
            tracing::debug!("Wrote data to filesystem: {:?}", full_path);
            Ok(())
        })
    }

    fn read(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, StorageError>> + Send + '_>> {
        let full_path = self.resolve_path(key);

        Box::pin(async move {
            let full_path = full_path?;
            let data = match tokio::fs::read(&full_path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(full_path.display().to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            tracing::debug!("Read data from filesystem: {:?}", full_path);
            Ok(data)
        })
    }
}

/// Keyring-based storage using the OS credential store
///
/// - macOS: Keychain
/// - Linux: Secret Service API
/// - Windows: Credential Manager
///
/// Each key becomes one keyring entry under `service_name`. Keyring calls are
/// blocking, so they run on the blocking thread pool.
pub struct KeyringStorage {
    service_name: String,
}

impl KeyringStorage {
    /// Create a new keyring storage with the specified service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(service_name: &str, key: &str) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(service_name, key)
            .map_err(|e| StorageError::Keyring(format!("Failed to create keyring entry: {}", e)))
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Keyring(format!("Keyring task failed: {}", e)))?
}

impl StorageBackend for KeyringStorage {
    fn write(
        &self,
        key: &str,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        let key = key.to_string();
        let data = data.to_vec();
        let service_name = self.service_name.clone();

        Box::pin(async move {
            let data_str = String::from_utf8(data)
                .map_err(|e| StorageError::Serialization(format!("Invalid UTF-8 data: {}", e)))?;

            let (service, entry_key) = (service_name.clone(), key.clone());
            run_blocking(move || {
                KeyringStorage::entry(&service, &entry_key)?.set_password(&data_str)?;
                Ok(())
            })
            .await?;

            tracing::debug!("Stored data in keyring: service={}, key={}", service_name, key);
            Ok(())
        })
    }

    fn read(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, StorageError>> + Send + '_>> {
        let key = key.to_string();
        let service_name = self.service_name.clone();

        Box::pin(async move {
            run_blocking(move || {
                match KeyringStorage::entry(&service_name, &key)?.get_password() {
                    Ok(password) => Ok(password.into_bytes()),
                    Err(keyring::Error::NoEntry) => Err(StorageError::NotFound(format!(
                        "keyring entry {}/{}",
                        service_name, key
                    ))),
                    Err(e) => Err(e.into()),
                }
            })
            .await
        })
    }
}
