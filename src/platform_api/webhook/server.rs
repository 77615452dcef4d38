use super::{DispatchOutcome, WebhookDispatcher, DEFAULT_MAX_PENDING_CALLBACKS, SECRET_HEADER};
use crate::platform_api::types::PlatformError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Where and how the webhook receiver listens
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
    /// Route deliveries are posted to
    pub path: String,
    /// Upper bound on callbacks running at once
    pub max_concurrent_callbacks: usize,
    /// Upper bound on callbacks queued or running; beyond it deliveries get 503
    pub max_pending_callbacks: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            path: "/".to_string(),
            max_concurrent_callbacks: 8,
            max_pending_callbacks: DEFAULT_MAX_PENDING_CALLBACKS,
        }
    }
}

impl WebhookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Port to bind; 0 picks a free one
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_max_concurrent_callbacks(mut self, max: usize) -> Self {
        self.max_concurrent_callbacks = max;
        self
    }

    pub fn with_max_pending_callbacks(mut self, max: usize) -> Self {
        self.max_pending_callbacks = max;
        self
    }
}

/// Build the receiver router with `dispatcher` as state
pub fn router(dispatcher: Arc<WebhookDispatcher>, path: &str) -> Router {
    Router::new()
        .route(path, post(receive))
        .with_state(dispatcher)
}

async fn receive(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let secret = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = dispatcher.handle(secret, &body);
    let status =
        StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let payload = match &outcome {
        DispatchOutcome::Malformed(reason) => json!({ "status": outcome.as_str(), "detail": reason }),
        _ => json!({ "status": outcome.as_str() }),
    };
    (status, Json(payload))
}

/// Stops a running [`WebhookServer`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    /// Ask the server to stop; in-flight requests finish first
    ///
    /// Calling this before `serve` starts makes `serve` return right away.
    pub fn shutdown(&self) {
        self.notify.notify_one();
    }
}

/// Bound webhook receiver
pub struct WebhookServer {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl WebhookServer {
    /// Bind the listener for `dispatcher` as described by `config`
    pub async fn bind(
        dispatcher: Arc<WebhookDispatcher>,
        config: &WebhookConfig,
    ) -> Result<Self, PlatformError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to bind webhook receiver on {}:{}: {}",
                    config.host,
                    config.port,
                    e
                );
                PlatformError::Webhook(format!(
                    "Failed to bind {}:{}: {}",
                    config.host, config.port, e
                ))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| PlatformError::Webhook(format!("Failed to read local address: {}", e)))?;

        tracing::info!("Webhook receiver bound to {}{}", local_addr, config.path);

        Ok(Self {
            listener,
            router: router(dispatcher, &config.path),
            local_addr,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: Arc::clone(&self.shutdown),
        }
    }

    /// Serve deliveries until the shutdown handle fires
    pub async fn serve(self) -> Result<(), PlatformError> {
        let shutdown = Arc::clone(&self.shutdown);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
                tracing::info!("Webhook receiver shutting down");
            })
            .await
            .map_err(|e| {
                tracing::error!("Webhook receiver failed: {}", e);
                PlatformError::Webhook(format!("Webhook receiver failed: {}", e))
            })?;

        tracing::info!("Webhook receiver stopped");
        Ok(())
    }
}
