//! Inbound webhook events
//!
//! The [`WebhookRegistry`] maps `(event, room)` to a callback, the
//! [`WebhookDispatcher`] verifies and deduplicates deliveries and runs the
//! matching callback in the background, and [`WebhookServer`] exposes the
//! dispatcher over HTTP.
//!
//! ```no_run
//! use emo_platform_sdk::{CallbackError, Client, ClientConfig, WebhookCallback, WebhookConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ClientConfig::new()).await?;
//!
//! client
//!     .event(
//!         "message.received",
//!         &[],
//!         WebhookCallback::from_async(|body| async move {
//!             println!("{} said {}", body.nickname, body.data);
//!             Ok::<(), CallbackError>(())
//!         }),
//!     )
//!     .await?;
//!
//! let server = client.start_webhook_event(WebhookConfig::new().with_port(8000)).await?;
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod registry;
pub mod server;

pub use dispatcher::{
    DispatchOutcome, WebhookDispatcher, DEFAULT_MAX_PENDING_CALLBACKS, MAX_SAVED_REQUEST_ID,
    SECRET_HEADER,
};
pub use registry::WebhookRegistry;
pub use server::{router, ShutdownHandle, WebhookConfig, WebhookServer};

use crate::platform_api::types::WebhookBody;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Room id matching events from any room
pub const ANY_ROOM_ID: &str = "";

/// Error a callback may return; it is logged and otherwise ignored
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type BlockingHandler = dyn Fn(WebhookBody) -> Result<(), CallbackError> + Send + Sync;
type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send>>;
type AsyncHandler = dyn Fn(WebhookBody) -> CallbackFuture + Send + Sync;

/// Handler for one subscribed event
///
/// Blocking callbacks run on the blocking thread pool, async callbacks as
/// tokio tasks.
#[derive(Clone)]
pub enum WebhookCallback {
    Blocking(Arc<BlockingHandler>),
    Async(Arc<AsyncHandler>),
}

impl WebhookCallback {
    pub fn blocking<F>(callback: F) -> Self
    where
        F: Fn(WebhookBody) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        WebhookCallback::Blocking(Arc::new(callback))
    }

    pub fn from_async<F, Fut>(callback: F) -> Self
    where
        F: Fn(WebhookBody) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        let handler = move |body: WebhookBody| -> CallbackFuture { Box::pin(callback(body)) };
        WebhookCallback::Async(Arc::new(handler))
    }

    /// Whether both handles point at the same callback
    pub fn ptr_eq(&self, other: &WebhookCallback) -> bool {
        match (self, other) {
            (WebhookCallback::Blocking(a), WebhookCallback::Blocking(b)) => Arc::ptr_eq(a, b),
            (WebhookCallback::Async(a), WebhookCallback::Async(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for WebhookCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookCallback::Blocking(_) => f.write_str("WebhookCallback::Blocking"),
            WebhookCallback::Async(_) => f.write_str("WebhookCallback::Async"),
        }
    }
}
