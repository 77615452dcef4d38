use crate::platform_api::client::{ApiRequest, Client};
use crate::platform_api::types::{ApiError, Color, Head, PlatformError};
use serde_json::{json, Value};
use std::path::Path;

/// Operations on one room
///
/// Tenant rooms carry the tenant api key and send it as `X-Channel-User`.
/// Response bodies are returned as raw JSON.
#[derive(Debug, Clone)]
pub struct Room {
    client: Client,
    room_id: String,
    api_key: Option<String>,
}

impl Room {
    pub fn new(client: Client, room_id: impl Into<String>) -> Self {
        Self {
            client,
            room_id: room_id.into(),
            api_key: None,
        }
    }

    /// Address a business-plan tenant (builder pattern)
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn path(&self, suffix: &str) -> String {
        format!("/v1/rooms/{}{}", self.room_id, suffix)
    }

    async fn send(&self, request: ApiRequest) -> Result<Value, PlatformError> {
        let request = match &self.api_key {
            Some(api_key) => request.with_channel_user(api_key.clone()),
            None => request,
        };
        self.client.execute(request).await
    }

    /// Messages in the room, optionally only those before timestamp `before`
    pub async fn get_msgs(&self, before: Option<i64>) -> Result<Value, PlatformError> {
        let mut request = ApiRequest::get(self.path("/messages"));
        if let Some(before) = before {
            request = request.with_query("before", before.to_string());
        }
        self.send(request).await
    }

    pub async fn get_sensors_list(&self) -> Result<Value, PlatformError> {
        self.send(ApiRequest::get(self.path("/sensors"))).await
    }

    pub async fn get_sensor_values(&self, sensor_id: &str) -> Result<Value, PlatformError> {
        self.send(ApiRequest::get(self.path(&format!("/sensors/{}/values", sensor_id))))
            .await
    }

    pub async fn send_msg(&self, text: &str) -> Result<Value, PlatformError> {
        self.send(ApiRequest::post(self.path("/messages/text")).with_json(json!({ "text": text })))
            .await
    }

    /// Post the image at `path` as a message
    pub async fn send_image(&self, path: impl AsRef<Path>) -> Result<Value, PlatformError> {
        self.send_file("/messages/image", "image", path.as_ref()).await
    }

    /// Post the audio file at `path` as a voice message
    pub async fn send_audio_msg(&self, path: impl AsRef<Path>) -> Result<Value, PlatformError> {
        self.send_file("/messages/audio", "audio", path.as_ref()).await
    }

    async fn send_file(&self, suffix: &str, field: &str, path: &Path) -> Result<Value, PlatformError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            tracing::error!("Failed to read {}: {}", path.display(), e);
            PlatformError::Api(ApiError::Request(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(field)
            .to_string();

        self.send(ApiRequest::post(self.path(suffix)).with_file(field, file_name, bytes))
            .await
    }

    pub async fn send_stamp(&self, stamp_id: &str, text: Option<&str>) -> Result<Value, PlatformError> {
        let mut payload = json!({ "uuid": stamp_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        self.send(ApiRequest::post(self.path("/messages/stamp")).with_json(payload))
            .await
    }

    /// Play a caller-built motion definition
    pub async fn send_original_motion(&self, motion: Value) -> Result<Value, PlatformError> {
        self.send(ApiRequest::post(self.path("/motions")).with_json(motion))
            .await
    }

    pub async fn change_led_color(&self, color: Color) -> Result<Value, PlatformError> {
        self.send(ApiRequest::post(self.path("/motions/led_color")).with_json(json!(color)))
            .await
    }

    pub async fn move_to(&self, head: Head) -> Result<Value, PlatformError> {
        self.send(ApiRequest::post(self.path("/motions/move_to")).with_json(json!(head)))
            .await
    }

    /// Play a preset motion by id
    pub async fn send_motion(&self, motion_id: &str) -> Result<Value, PlatformError> {
        self.send(ApiRequest::post(self.path("/motions/preset")).with_json(json!({ "uuid": motion_id })))
            .await
    }

    pub async fn get_emo_settings(&self) -> Result<Value, PlatformError> {
        self.send(ApiRequest::get(self.path("/emo/settings"))).await
    }
}
