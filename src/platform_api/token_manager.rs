use crate::platform_api::client::read_response;
use crate::platform_api::config::REFRESH_TOKEN_ENV;
use crate::platform_api::token_storage::{
    clear_credentials, load_credentials, reconcile_bootstrap, save_credentials, Credentials,
};
use crate::platform_api::types::{ApiError, PlatformError, TokenPair};
use crate::storage::{StorageBackend, StorageError};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Path of the token exchange endpoint
pub const TOKEN_REFRESH_PATH: &str = "/oauth/token/refresh";

/// Lifecycle of the credentials held by one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Uninitialized,
    Resolving,
    Ready,
    Refreshing,
    Failed,
}

#[derive(Debug)]
struct Session {
    credentials: Credentials,
    state: TokenState,
    /// Completed refresh attempts, successful or not
    generation: u64,
    /// Error of the latest refresh attempt, `None` if it succeeded
    last_error: Option<PlatformError>,
}

/// Access token a request was sent with, tagged with the refresh generation
/// it belongs to
///
/// Handing it back to [`TokenManager::refresh_after_rejection`] lets the
/// manager tell whether a refresh already finished since the request went
/// out.
#[derive(Clone)]
pub struct TokenSnapshot {
    access_token: String,
    generation: u64,
}

impl TokenSnapshot {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for TokenSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSnapshot")
            .field("access_token_len", &self.access_token.len())
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Where a refresh candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Store,
    Bootstrap,
}

/// Owns the credential lifecycle of one client
///
/// Resolution order on [`initialize`](TokenManager::initialize):
/// 1. persisted access token
/// 2. bootstrap (environment or configured) access token
/// 3. a refresh exchange
///
/// A refresh tries the persisted refresh token first and the bootstrap refresh
/// token second. New pairs are persisted before they are adopted in memory.
/// Refreshes are single-flight: callers rejected during the same generation
/// share one exchange and its outcome, including its error.
pub struct TokenManager {
    storage: Arc<dyn StorageBackend>,
    bootstrap: Credentials,
    track_bootstrap_changes: bool,
    http: reqwest::Client,
    endpoint: String,
    session: RwLock<Session>,
    refresh_lock: Mutex<()>,
    exchanges: AtomicUsize,
}

impl TokenManager {
    /// Create an uninitialized manager
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        bootstrap: Credentials,
        endpoint: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            storage,
            bootstrap,
            track_bootstrap_changes: true,
            http,
            endpoint: endpoint.into(),
            session: RwLock::new(Session {
                credentials: Credentials::default(),
                state: TokenState::Uninitialized,
                generation: 0,
                last_error: None,
            }),
            refresh_lock: Mutex::new(()),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// Enable or disable resetting the store when bootstrap tokens change (builder pattern)
    pub fn with_bootstrap_tracking(mut self, enabled: bool) -> Self {
        self.track_bootstrap_changes = enabled;
        self
    }

    pub async fn state(&self) -> TokenState {
        self.session.read().await.state
    }

    /// Access token currently attached to requests
    pub async fn access_token(&self) -> String {
        self.session.read().await.credentials.access_token.clone()
    }

    /// Access token together with its refresh generation
    pub async fn snapshot(&self) -> TokenSnapshot {
        let session = self.session.read().await;
        TokenSnapshot {
            access_token: session.credentials.access_token.clone(),
            generation: session.generation,
        }
    }

    /// In-memory credentials
    pub async fn credentials(&self) -> Credentials {
        self.session.read().await.credentials.clone()
    }

    /// Number of token exchange requests sent so far
    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    async fn set_state(&self, state: TokenState) {
        self.session.write().await.state = state;
    }

    /// Resolve credentials: store, then bootstrap, then a refresh exchange
    pub async fn initialize(self: &Arc<Self>) -> Result<(), PlatformError> {
        let manager = Arc::clone(self);
        run_to_completion(async move {
            let _guard = manager.refresh_lock.lock().await;
            manager.set_state(TokenState::Resolving).await;

            let result = manager.resolve().await;
            if result.is_err() {
                manager.set_state(TokenState::Failed).await;
            }
            result
        })
        .await
    }

    async fn resolve(&self) -> Result<(), PlatformError> {
        if self.track_bootstrap_changes {
            reconcile_bootstrap(self.storage.as_ref(), &self.bootstrap).await?;
        }

        let stored = load_credentials(self.storage.as_ref()).await?;

        if stored.has_access_token() {
            tracing::debug!("Using stored access token");
            self.adopt_in_memory(stored).await;
            return Ok(());
        }

        if self.bootstrap.has_access_token() {
            tracing::debug!("Using bootstrap access token");
            let credentials = Credentials::new(
                self.bootstrap.access_token.clone(),
                stored.refresh_token.clone(),
            );
            self.adopt_in_memory(credentials).await;
            return Ok(());
        }

        tracing::debug!("No access token available, refreshing");
        self.refresh_with(stored).await
    }

    /// Force a refresh exchange regardless of the current token
    pub async fn refresh(self: &Arc<Self>) -> Result<(), PlatformError> {
        let manager = Arc::clone(self);
        run_to_completion(async move {
            let _guard = manager.refresh_lock.lock().await;
            manager.refresh_from_store().await
        })
        .await
    }

    /// Refresh after a request sent with `rejected` got a 401
    ///
    /// If a refresh finished while this caller waited for the lock, its
    /// outcome is returned instead of exchanging again: `Ok` so the caller
    /// retries with the rotated token, or a copy of the error it failed with.
    pub async fn refresh_after_rejection(
        self: &Arc<Self>,
        rejected: &TokenSnapshot,
    ) -> Result<(), PlatformError> {
        let manager = Arc::clone(self);
        let generation = rejected.generation;
        run_to_completion(async move {
            let _guard = manager.refresh_lock.lock().await;

            {
                let session = manager.session.read().await;
                if session.generation != generation {
                    return match &session.last_error {
                        None => {
                            tracing::debug!("Access token already rotated by a concurrent refresh");
                            Ok(())
                        }
                        Some(e) => {
                            tracing::debug!("Concurrent refresh already failed: {}", e);
                            Err(e.clone())
                        }
                    };
                }
            }

            manager.refresh_from_store().await
        })
        .await
    }

    async fn refresh_from_store(&self) -> Result<(), PlatformError> {
        match load_credentials(self.storage.as_ref()).await {
            Ok(stored) => self.refresh_with(stored).await,
            Err(e) => {
                let result = Err(storage_failure("stored tokens could not be read", e));
                self.finish_refresh(result).await
            }
        }
    }

    /// Run the refresh procedure; the caller holds `refresh_lock`
    async fn refresh_with(&self, stored: Credentials) -> Result<(), PlatformError> {
        self.set_state(TokenState::Refreshing).await;

        let result = self.exchange_candidates(stored).await;
        self.finish_refresh(result).await
    }

    /// Publish the outcome of a refresh attempt to later waiters
    async fn finish_refresh(&self, result: Result<(), PlatformError>) -> Result<(), PlatformError> {
        let mut session = self.session.write().await;
        session.generation += 1;
        match &result {
            Ok(()) => session.last_error = None,
            Err(e) => {
                session.state = TokenState::Failed;
                session.last_error = Some(e.clone());
            }
        }
        result
    }

    async fn exchange_candidates(&self, stored: Credentials) -> Result<(), PlatformError> {
        if stored.has_refresh_token() {
            match self.exchange(&stored.refresh_token, Source::Store).await {
                Ok(pair) => return self.persist_and_adopt(pair).await,
                Err(PlatformError::Unauthorized(_)) => {
                    tracing::warn!("Stored refresh token was rejected, clearing stored credentials");
                    clear_credentials(self.storage.as_ref())
                        .await
                        .map_err(|e| storage_failure("rejected tokens could not be cleared", e))?;
                    self.session.write().await.credentials = Credentials::default();
                }
                Err(e) => return Err(e),
            }
        }

        if !self.bootstrap.has_refresh_token() {
            return Err(PlatformError::NoRefreshToken(format!(
                "set a refresh token in the environment variable '{}'",
                REFRESH_TOKEN_ENV
            )));
        }

        if stored.refresh_token == self.bootstrap.refresh_token {
            return Err(PlatformError::NoRefreshToken(format!(
                "the refresh token was rejected; set a new one in '{}'",
                REFRESH_TOKEN_ENV
            )));
        }

        match self.exchange(&self.bootstrap.refresh_token, Source::Bootstrap).await {
            Ok(pair) => self.persist_and_adopt(pair).await,
            Err(PlatformError::Unauthorized(_)) => Err(PlatformError::NoRefreshToken(format!(
                "the refresh token was rejected; set a new one in '{}'",
                REFRESH_TOKEN_ENV
            ))),
            Err(e) => Err(e),
        }
    }

    async fn exchange(&self, refresh_token: &str, source: Source) -> Result<TokenPair, PlatformError> {
        let url = format!("{}{}", self.endpoint, TOKEN_REFRESH_PATH);
        tracing::debug!("Exchanging {:?} refresh token at {}", source, url);
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        let response = self
            .http
            .post(&url)
            .header("accept", "*/*")
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send token refresh request: {}", e);
                ApiError::from(e)
            })?;

        let body = read_response(response).await?;
        serde_json::from_value(body).map_err(|e| {
            tracing::error!("Failed to parse token refresh response: {}", e);
            PlatformError::Api(ApiError::Parse(format!("Invalid token refresh response: {}", e)))
        })
    }

    async fn persist_and_adopt(&self, pair: TokenPair) -> Result<(), PlatformError> {
        let credentials = Credentials::new(pair.access_token, pair.refresh_token);
        save_credentials(self.storage.as_ref(), &credentials)
            .await
            .map_err(|e| storage_failure("refreshed tokens could not be persisted", e))?;
        tracing::info!(
            "Tokens refreshed and persisted: access_token_len={}",
            credentials.access_token.len()
        );
        self.adopt_in_memory(credentials).await;
        Ok(())
    }

    async fn adopt_in_memory(&self, credentials: Credentials) {
        let mut session = self.session.write().await;
        session.credentials = credentials;
        session.state = TokenState::Ready;
    }
}

/// A store failure during a refresh leaves the client without usable tokens
fn storage_failure(context: &str, err: StorageError) -> PlatformError {
    tracing::error!("{}: {}", context, err);
    PlatformError::NoRefreshToken(format!("{}: {}", context, err))
}

/// Drive `future` on its own task so dropping the caller does not abort it
///
/// Once a token exchange is sent, its result must reach the store even if the
/// request that triggered it is cancelled.
async fn run_to_completion<F>(future: F) -> Result<(), PlatformError>
where
    F: std::future::Future<Output = Result<(), PlatformError>> + Send + 'static,
{
    tokio::spawn(future).await.map_err(|e| {
        tracing::error!("Token refresh task failed: {}", e);
        PlatformError::Api(ApiError::Request(format!("Token refresh task failed: {}", e)))
    })?
}
