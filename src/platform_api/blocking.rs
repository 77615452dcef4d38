//! Blocking wrappers around the async client
//!
//! Each blocking client owns a current-thread tokio runtime and drives the
//! async client on it, so calls block the calling thread. Do not use these
//! types from inside an async context.

use crate::platform_api::client::{ApiRequest, Client as AsyncClient};
use crate::platform_api::config::ClientConfig;
use crate::platform_api::room::Room as AsyncRoom;
use crate::platform_api::types::{
    AccountInfo, BroadcastMessage, Color, Head, PlatformError, RoomsList, WebhookInfo,
    WebhookSetting,
};
use crate::platform_api::webhook::{WebhookCallback, WebhookConfig};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build_runtime() -> Result<Runtime, PlatformError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| PlatformError::Config(format!("Failed to build tokio runtime: {}", e)))
}

/// Blocking emo Platform client
#[derive(Debug, Clone)]
pub struct Client {
    inner: AsyncClient,
    runtime: Arc<Runtime>,
}

impl Client {
    /// Build a client from `config` and resolve its tokens
    pub fn connect(config: ClientConfig) -> Result<Self, PlatformError> {
        let runtime = Arc::new(build_runtime()?);
        let inner = runtime.block_on(AsyncClient::connect(config))?;
        Ok(Self { inner, runtime })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// The async client sharing this client's session
    pub fn async_client(&self) -> &AsyncClient {
        &self.inner
    }

    pub fn execute(&self, request: ApiRequest) -> Result<Value, PlatformError> {
        self.block_on(self.inner.execute(request))
    }

    pub fn get_account_info(&self) -> Result<AccountInfo, PlatformError> {
        self.block_on(self.inner.get_account_info())
    }

    pub fn delete_account_info(&self) -> Result<AccountInfo, PlatformError> {
        self.block_on(self.inner.delete_account_info())
    }

    pub fn get_rooms_list(&self) -> Result<RoomsList, PlatformError> {
        self.block_on(self.inner.get_rooms_list())
    }

    pub fn get_rooms_id(&self) -> Result<Vec<String>, PlatformError> {
        self.block_on(self.inner.get_rooms_id())
    }

    pub fn create_room_client(&self, room_id: impl Into<String>) -> Room {
        Room {
            inner: self.inner.create_room_client(room_id),
            runtime: Arc::clone(&self.runtime),
        }
    }

    pub fn create_tenant_room_client(
        &self,
        room_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Room {
        Room {
            inner: self.inner.create_tenant_room_client(room_id, api_key),
            runtime: Arc::clone(&self.runtime),
        }
    }

    pub fn get_stamps_list(&self) -> Result<Value, PlatformError> {
        self.block_on(self.inner.get_stamps_list())
    }

    pub fn get_motions_list(&self) -> Result<Value, PlatformError> {
        self.block_on(self.inner.get_motions_list())
    }

    pub fn get_broadcast_msgs_list(&self) -> Result<Value, PlatformError> {
        self.block_on(self.inner.get_broadcast_msgs_list())
    }

    pub fn get_broadcast_msg_details(&self, message_id: i64) -> Result<Value, PlatformError> {
        self.block_on(self.inner.get_broadcast_msg_details(message_id))
    }

    pub fn create_broadcast_msg(&self, message: &BroadcastMessage) -> Result<Value, PlatformError> {
        self.block_on(self.inner.create_broadcast_msg(message))
    }

    pub fn get_payments_info(&self) -> Result<Value, PlatformError> {
        self.block_on(self.inner.get_payments_info())
    }

    pub fn get_payment_info_detail(&self, payment_id: i64) -> Result<Value, PlatformError> {
        self.block_on(self.inner.get_payment_info_detail(payment_id))
    }

    pub fn get_webhook_setting(&self) -> Result<WebhookInfo, PlatformError> {
        self.block_on(self.inner.get_webhook_setting())
    }

    pub fn create_webhook_setting(&self, setting: &WebhookSetting) -> Result<WebhookInfo, PlatformError> {
        self.block_on(self.inner.create_webhook_setting(setting))
    }

    pub fn change_webhook_setting(&self, setting: &WebhookSetting) -> Result<WebhookInfo, PlatformError> {
        self.block_on(self.inner.change_webhook_setting(setting))
    }

    pub fn delete_webhook_setting(&self) -> Result<WebhookInfo, PlatformError> {
        self.block_on(self.inner.delete_webhook_setting())
    }

    pub fn register_webhook_event(&self, events: &[String]) -> Result<WebhookInfo, PlatformError> {
        self.block_on(self.inner.register_webhook_event(events))
    }

    pub fn event(
        &self,
        event: &str,
        room_ids: &[&str],
        callback: WebhookCallback,
    ) -> Result<(), PlatformError> {
        self.block_on(self.inner.event(event, room_ids, callback))
    }

    /// Register subscribed events and serve deliveries on this thread
    ///
    /// Blocks until the server stops.
    pub fn start_webhook_event(&self, config: WebhookConfig) -> Result<(), PlatformError> {
        self.block_on(async {
            let server = self.inner.start_webhook_event(config).await?;
            server.serve().await
        })
    }
}

/// Blocking room client
#[derive(Debug, Clone)]
pub struct Room {
    inner: AsyncRoom,
    runtime: Arc<Runtime>,
}

impl Room {
    pub fn room_id(&self) -> &str {
        self.inner.room_id()
    }

    pub fn get_msgs(&self, before: Option<i64>) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.get_msgs(before))
    }

    pub fn get_sensors_list(&self) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.get_sensors_list())
    }

    pub fn get_sensor_values(&self, sensor_id: &str) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.get_sensor_values(sensor_id))
    }

    pub fn send_msg(&self, text: &str) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.send_msg(text))
    }

    pub fn send_image(&self, path: impl AsRef<Path>) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.send_image(path))
    }

    pub fn send_audio_msg(&self, path: impl AsRef<Path>) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.send_audio_msg(path))
    }

    pub fn send_stamp(&self, stamp_id: &str, text: Option<&str>) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.send_stamp(stamp_id, text))
    }

    pub fn send_original_motion(&self, motion: Value) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.send_original_motion(motion))
    }

    pub fn change_led_color(&self, color: Color) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.change_led_color(color))
    }

    pub fn move_to(&self, head: Head) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.move_to(head))
    }

    pub fn send_motion(&self, motion_id: &str) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.send_motion(motion_id))
    }

    pub fn get_emo_settings(&self) -> Result<Value, PlatformError> {
        self.runtime.block_on(self.inner.get_emo_settings())
    }
}
