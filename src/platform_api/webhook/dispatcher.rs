use super::{WebhookCallback, WebhookRegistry};
use crate::platform_api::types::WebhookBody;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Number of recent request ids remembered for deduplication
pub const MAX_SAVED_REQUEST_ID: usize = 10;

/// Default bound on callbacks that are queued or running
pub const DEFAULT_MAX_PENDING_CALLBACKS: usize = 64;

/// Header carrying the shared webhook secret
pub const SECRET_HEADER: &str = "x-platform-api-secret";

/// Result of handling one inbound delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Secret header missing or wrong
    Rejected,
    /// Body is not a valid webhook notification
    Malformed(String),
    /// Request id seen among the recent deliveries
    Duplicate,
    /// No callback subscribed for this event and room
    Ignored,
    /// Callback scheduled
    Dispatched,
    /// Too many callbacks pending; the request id is not recorded so the
    /// platform's retry is handled normally
    Busy,
}

impl DispatchOutcome {
    /// HTTP status returned to the platform
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchOutcome::Rejected => 401,
            DispatchOutcome::Malformed(_) => 400,
            DispatchOutcome::Duplicate | DispatchOutcome::Ignored | DispatchOutcome::Dispatched => {
                200
            }
            DispatchOutcome::Busy => 503,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Rejected => "rejected",
            DispatchOutcome::Malformed(_) => "malformed",
            DispatchOutcome::Duplicate => "duplicate",
            DispatchOutcome::Ignored => "ignored",
            DispatchOutcome::Dispatched => "dispatched",
            DispatchOutcome::Busy => "busy",
        }
    }
}

/// Bounded FIFO of recently delivered request ids
#[derive(Debug)]
struct DeliveryRecord {
    ids: VecDeque<String>,
    capacity: usize,
}

impl DeliveryRecord {
    fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, request_id: &str) -> bool {
        self.ids.iter().any(|id| id == request_id)
    }

    fn record(&mut self, request_id: String) {
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(request_id);
    }
}

fn secrets_match(expected: &str, provided: &str) -> bool {
    // Constant-time comparison
    expected.len() == provided.len()
        && expected
            .as_bytes()
            .iter()
            .zip(provided.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Verifies, deduplicates and dispatches webhook deliveries
///
/// Callbacks run in the background; [`handle`](WebhookDispatcher::handle)
/// returns as soon as one is scheduled. At most `max_concurrent_callbacks`
/// callbacks run at once, later ones wait for a free slot without holding up
/// the inbound request. Once `max_pending_callbacks` are queued or running,
/// further deliveries are answered with [`DispatchOutcome::Busy`].
pub struct WebhookDispatcher {
    registry: Arc<WebhookRegistry>,
    secret: String,
    deliveries: Mutex<DeliveryRecord>,
    permits: Arc<Semaphore>,
    backlog: Arc<Semaphore>,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("registry", &self.registry)
            .field("available_permits", &self.permits.available_permits())
            .field("available_backlog", &self.backlog.available_permits())
            .finish_non_exhaustive()
    }
}

impl WebhookDispatcher {
    pub fn new(
        registry: Arc<WebhookRegistry>,
        secret: impl Into<String>,
        max_concurrent_callbacks: usize,
    ) -> Self {
        Self {
            registry,
            secret: secret.into(),
            deliveries: Mutex::new(DeliveryRecord::new(MAX_SAVED_REQUEST_ID)),
            permits: Arc::new(Semaphore::new(max_concurrent_callbacks.max(1))),
            backlog: Arc::new(Semaphore::new(DEFAULT_MAX_PENDING_CALLBACKS)),
        }
    }

    /// Bound callbacks queued or running, at least 1 (builder pattern)
    pub fn with_max_pending_callbacks(mut self, max: usize) -> Self {
        self.backlog = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    /// Handle one delivery
    ///
    /// Must be called within a tokio runtime.
    pub fn handle(&self, secret: Option<&str>, body: &[u8]) -> DispatchOutcome {
        if !secret.is_some_and(|provided| secrets_match(&self.secret, provided)) {
            tracing::warn!("Rejected webhook delivery with missing or invalid secret");
            return DispatchOutcome::Rejected;
        }

        let body: WebhookBody = match serde_json::from_slice(body) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Malformed webhook body: {}", e);
                return DispatchOutcome::Malformed(e.to_string());
            }
        };

        let (callback, slot) = {
            let mut deliveries = self
                .deliveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if deliveries.contains(&body.request_id) {
                tracing::debug!("Duplicate webhook delivery {}", body.request_id);
                return DispatchOutcome::Duplicate;
            }

            let Some(callback) = self.registry.resolve(&body.event, &body.uuid) else {
                tracing::debug!(
                    "No callback for event {} in room {}",
                    body.event,
                    body.uuid
                );
                return DispatchOutcome::Ignored;
            };

            let Ok(slot) = Arc::clone(&self.backlog).try_acquire_owned() else {
                tracing::warn!(
                    "Webhook callback backlog full, refusing delivery {}",
                    body.request_id
                );
                return DispatchOutcome::Busy;
            };

            deliveries.record(body.request_id.clone());
            (callback, slot)
        };

        tracing::debug!(
            "Dispatching webhook {} for event {}",
            body.request_id,
            body.event
        );
        self.schedule(callback, body, slot);
        DispatchOutcome::Dispatched
    }

    /// Run `callback` in the background; `slot` is held until it finishes
    fn schedule(&self, callback: WebhookCallback, body: WebhookBody, slot: OwnedSemaphorePermit) {
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let _slot = slot;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let request_id = body.request_id.clone();

            let result = match callback {
                WebhookCallback::Blocking(callback) => {
                    tokio::task::spawn_blocking(move || callback(body)).await
                }
                WebhookCallback::Async(callback) => tokio::spawn(callback(body)).await,
            };

            match result {
                Ok(Ok(())) => tracing::debug!("Webhook callback for {} finished", request_id),
                Ok(Err(e)) => {
                    tracing::error!("Webhook callback for {} failed: {}", request_id, e)
                }
                Err(e) if e.is_panic() => {
                    tracing::error!("Webhook callback for {} panicked", request_id)
                }
                Err(e) => tracing::warn!("Webhook callback for {} was cancelled: {}", request_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_record_evicts_oldest() {
        let mut record = DeliveryRecord::new(3);
        for id in ["a", "b", "c", "d"] {
            record.record(id.to_string());
        }
        assert!(!record.contains("a"));
        assert!(record.contains("b"));
        assert!(record.contains("d"));
        assert_eq!(record.ids.len(), 3);
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3cre"));
        assert!(!secrets_match("s3cret", "s3creT"));
        assert!(!secrets_match("s3cret", ""));
    }

    #[test]
    fn test_outcome_status_codes() {
        assert_eq!(DispatchOutcome::Rejected.status_code(), 401);
        assert_eq!(DispatchOutcome::Malformed(String::new()).status_code(), 400);
        assert_eq!(DispatchOutcome::Duplicate.status_code(), 200);
        assert_eq!(DispatchOutcome::Ignored.status_code(), 200);
        assert_eq!(DispatchOutcome::Dispatched.status_code(), 200);
        assert_eq!(DispatchOutcome::Busy.status_code(), 503);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected_before_parsing() {
        let dispatcher = WebhookDispatcher::new(Arc::new(WebhookRegistry::new()), "secret", 1);
        assert_eq!(dispatcher.handle(Some("nope"), b"not json"), DispatchOutcome::Rejected);
        assert_eq!(dispatcher.handle(None, b"not json"), DispatchOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let dispatcher = WebhookDispatcher::new(Arc::new(WebhookRegistry::new()), "secret", 1);
        let outcome = dispatcher.handle(Some("secret"), b"{\"event\": 1}");
        assert!(matches!(outcome, DispatchOutcome::Malformed(_)));
    }
}
