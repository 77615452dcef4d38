use crate::platform_api::config::ClientConfig;
use crate::platform_api::room::Room;
use crate::platform_api::token_manager::TokenManager;
use crate::platform_api::types::{
    AccountInfo, ApiError, BroadcastMessage, PlatformError, RoomsList, WebhookInfo, WebhookSetting,
};
use crate::platform_api::webhook::{
    WebhookCallback, WebhookConfig, WebhookDispatcher, WebhookRegistry, WebhookServer, ANY_ROOM_ID,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Header carrying a business-plan tenant api key
pub const CHANNEL_USER_HEADER: &str = "X-Channel-User";

/// File sent as the single field of a multipart form
#[derive(Clone)]
struct Upload {
    field: String,
    file_name: String,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One call to the platform API
///
/// `allow_refresh` defaults to `true`: a 401 triggers one token refresh and
/// one retry. The retry itself never refreshes again.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    payload: Option<Value>,
    upload: Option<Upload>,
    channel_user: Option<String>,
    allow_refresh: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            payload: None,
            upload: None,
            channel_user: None,
            allow_refresh: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body (builder pattern)
    pub fn with_json(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Send `bytes` as a multipart form with one file field (builder pattern)
    ///
    /// Replaces any JSON body.
    pub fn with_file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.payload = None;
        self.upload = Some(Upload {
            field: field.into(),
            file_name: file_name.into(),
            bytes,
        });
        self
    }

    /// Add a query parameter (builder pattern)
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Address a business-plan tenant (builder pattern)
    pub fn with_channel_user(mut self, api_key: impl Into<String>) -> Self {
        self.channel_user = Some(api_key.into());
        self
    }

    /// Fail on the first 401 instead of refreshing (builder pattern)
    pub fn without_refresh(mut self) -> Self {
        self.allow_refresh = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn allows_refresh(&self) -> bool {
        self.allow_refresh
    }
}

struct ClientInner {
    endpoint: String,
    http: reqwest::Client,
    api_key: Option<String>,
    tokens: Arc<TokenManager>,
    webhooks: Arc<WebhookRegistry>,
}

/// Async client for the emo Platform API
///
/// Cloning is cheap and clones share one token session. Separate
/// [`Client::connect`] calls get separate sessions that only meet through the
/// token store.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client from `config` and resolve its tokens
    ///
    /// # Example
    ///
    /// ```no_run
    /// use emo_platform_sdk::{Client, ClientConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::connect(ClientConfig::new()).await?;
    /// for room_id in client.get_rooms_id().await? {
    ///     println!("room: {}", room_id);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: ClientConfig) -> Result<Self, PlatformError> {
        tracing::debug!("Connecting emo Platform client: {:?}", config);

        let http = config.build_http_client()?;
        let storage = config.build_storage()?;
        let tokens = Arc::new(
            TokenManager::new(
                storage,
                config.bootstrap_tokens(),
                config.endpoint(),
                http.clone(),
            )
            .with_bootstrap_tracking(config.tracks_bootstrap_changes()),
        );

        tokens.initialize().await?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint: config.endpoint().to_string(),
                http,
                api_key: config.api_key().map(str::to_string),
                tokens,
                webhooks: Arc::new(WebhookRegistry::new()),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.inner.tokens
    }

    pub fn webhooks(&self) -> &Arc<WebhookRegistry> {
        &self.inner.webhooks
    }

    /// Issue an authenticated request
    ///
    /// 2xx responses return the parsed JSON body (`Value::Null` when empty).
    /// A 401 with refresh allowed triggers a (single-flight) token refresh and
    /// exactly one retry.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, PlatformError> {
        let sent_with = self.inner.tokens.snapshot().await;

        match self.send(&request, sent_with.access_token()).await {
            Err(PlatformError::Unauthorized(message)) if request.allow_refresh => {
                tracing::debug!(
                    "{} {} was rejected ({}), refreshing tokens",
                    request.method,
                    request.path,
                    message
                );
                self.inner
                    .tokens
                    .refresh_after_rejection(&sent_with)
                    .await?;

                let access_token = self.inner.tokens.access_token().await;
                self.send(&request, &access_token).await
            }
            result => result,
        }
    }

    async fn send(&self, request: &ApiRequest, access_token: &str) -> Result<Value, PlatformError> {
        let url = format!("{}{}", self.inner.endpoint, request.path);
        tracing::debug!("Sending {} {}", request.method, url);

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), &url)
            .header("accept", "*/*")
            .header("Authorization", format!("Bearer {}", access_token));

        if let Some(api_key) = request.channel_user.as_ref().or(self.inner.api_key.as_ref()) {
            builder = builder.header(CHANNEL_USER_HEADER, api_key);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(upload) = &request.upload {
            // Forms are consumed by sending, so a retry builds a fresh one
            let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
                .file_name(upload.file_name.clone());
            builder = builder.multipart(reqwest::multipart::Form::new().part(upload.field.clone(), part));
        } else if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("Failed to send {} {}: {}", request.method, url, e);
            ApiError::from(e)
        })?;

        read_response(response).await
    }

    /// `execute` and deserialize the body into `T`
    pub async fn execute_as<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, PlatformError> {
        let path = request.path.clone();
        let body = self.execute(request).await?;
        serde_json::from_value(body).map_err(|e| {
            tracing::error!("Failed to parse response from {}: {}", path, e);
            PlatformError::Api(ApiError::Parse(format!("Failed to parse response JSON: {}", e)))
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        self.execute_as(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PlatformError> {
        self.execute_as(ApiRequest::post(path).with_json(to_json(body)?))
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PlatformError> {
        self.execute_as(ApiRequest::put(path).with_json(to_json(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        self.execute_as(ApiRequest::delete(path)).await
    }

    // ------------------------------------------------------------------
    // Account and rooms
    // ------------------------------------------------------------------

    pub async fn get_account_info(&self) -> Result<AccountInfo, PlatformError> {
        self.get("/v1/me").await
    }

    /// Delete the account; webhook settings tied to it are removed too
    pub async fn delete_account_info(&self) -> Result<AccountInfo, PlatformError> {
        self.delete("/v1/me").await
    }

    pub async fn get_rooms_list(&self) -> Result<RoomsList, PlatformError> {
        self.get("/v1/rooms").await
    }

    /// Ids of every room the user belongs to
    ///
    /// Also refreshes the room list webhook registrations are validated
    /// against. Fails with `NoRoom` if the user is in no room.
    pub async fn get_rooms_id(&self) -> Result<Vec<String>, PlatformError> {
        let rooms = self.get_rooms_list().await?;
        let ids: Vec<String> = rooms.rooms.into_iter().map(|room| room.uuid).collect();
        if ids.is_empty() {
            return Err(PlatformError::NoRoom("Get no room id.".to_string()));
        }
        self.inner.webhooks.set_known_rooms(ids.iter().cloned());
        Ok(ids)
    }

    pub fn create_room_client(&self, room_id: impl Into<String>) -> Room {
        Room::new(self.clone(), room_id)
    }

    /// Room client addressing a business-plan tenant
    pub fn create_tenant_room_client(
        &self,
        room_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Room {
        Room::new(self.clone(), room_id).with_api_key(api_key)
    }

    pub async fn get_stamps_list(&self) -> Result<Value, PlatformError> {
        self.get("/v1/stamps").await
    }

    pub async fn get_motions_list(&self) -> Result<Value, PlatformError> {
        self.get("/v1/motions").await
    }

    // ------------------------------------------------------------------
    // Business plan
    // ------------------------------------------------------------------

    pub async fn get_broadcast_msgs_list(&self) -> Result<Value, PlatformError> {
        self.get("/v1/broadcast_messages").await
    }

    pub async fn get_broadcast_msg_details(&self, message_id: i64) -> Result<Value, PlatformError> {
        self.get(&format!("/v1/broadcast_messages/{}", message_id)).await
    }

    pub async fn create_broadcast_msg(&self, message: &BroadcastMessage) -> Result<Value, PlatformError> {
        self.post("/v1/broadcast_messages", message).await
    }

    pub async fn get_payments_info(&self) -> Result<Value, PlatformError> {
        self.get("/v1/payments").await
    }

    pub async fn get_payment_info_detail(&self, payment_id: i64) -> Result<Value, PlatformError> {
        self.get(&format!("/v1/payments/{}", payment_id)).await
    }

    // ------------------------------------------------------------------
    // Webhook settings
    // ------------------------------------------------------------------

    pub async fn get_webhook_setting(&self) -> Result<WebhookInfo, PlatformError> {
        self.get("/v1/webhook").await
    }

    pub async fn create_webhook_setting(
        &self,
        setting: &WebhookSetting,
    ) -> Result<WebhookInfo, PlatformError> {
        self.post("/v1/webhook", setting).await
    }

    pub async fn change_webhook_setting(
        &self,
        setting: &WebhookSetting,
    ) -> Result<WebhookInfo, PlatformError> {
        self.put("/v1/webhook", setting).await
    }

    pub async fn delete_webhook_setting(&self) -> Result<WebhookInfo, PlatformError> {
        self.delete("/v1/webhook").await
    }

    /// Tell the platform which events to deliver; the response carries the secret
    pub async fn register_webhook_event(&self, events: &[String]) -> Result<WebhookInfo, PlatformError> {
        self.put("/v1/webhook/events", &serde_json::json!({ "events": events }))
            .await
    }

    // ------------------------------------------------------------------
    // Webhook events
    // ------------------------------------------------------------------

    /// Register `callback` for `event` in `room_ids` (empty = any room)
    ///
    /// The room list is fetched from the platform the first time a specific
    /// room id is requested.
    pub async fn event(
        &self,
        event: &str,
        room_ids: &[&str],
        callback: WebhookCallback,
    ) -> Result<(), PlatformError> {
        let needs_rooms = room_ids.iter().any(|id| *id != ANY_ROOM_ID);
        if needs_rooms && self.inner.webhooks.has_only_default_room() {
            self.get_rooms_id().await?;
        }
        self.inner.webhooks.register(event, room_ids, callback)
    }

    /// Register subscribed events with the platform and bind the receiver
    ///
    /// Call [`WebhookServer::serve`] on the result to start accepting
    /// deliveries.
    pub async fn start_webhook_event(
        &self,
        config: WebhookConfig,
    ) -> Result<WebhookServer, PlatformError> {
        let events = self.inner.webhooks.events();
        if events.is_empty() {
            tracing::warn!("Starting webhook receiver with no subscribed events");
        }

        let info = self.register_webhook_event(&events).await?;
        tracing::info!("Registered webhook events: {:?}", info.events);

        let dispatcher = Arc::new(
            WebhookDispatcher::new(
                Arc::clone(&self.inner.webhooks),
                info.secret,
                config.max_concurrent_callbacks,
            )
            .with_max_pending_callbacks(config.max_pending_callbacks),
        );
        WebhookServer::bind(dispatcher, &config).await
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<Value, PlatformError> {
    serde_json::to_value(body).map_err(|e| {
        PlatformError::Api(ApiError::Request(format!("Failed to serialize request body: {}", e)))
    })
}

/// Classify a response and parse its JSON body
pub(crate) async fn read_response(response: reqwest::Response) -> Result<Value, PlatformError> {
    let status = response.status();
    let text = response.text().await.map_err(|e| {
        tracing::error!("Failed to read response body: {}", e);
        ApiError::from(e)
    })?;

    if !status.is_success() {
        tracing::debug!("Request failed: HTTP {} - {}", status.as_u16(), text);
        return Err(PlatformError::from_status(status.as_u16(), text));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| {
        tracing::error!("Failed to parse response: {} - Response body: {}", e, text);
        PlatformError::Api(ApiError::Parse(format!("Failed to parse response JSON: {}", e)))
    })
}
