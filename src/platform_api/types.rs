use serde::{Deserialize, Serialize};
use std::fmt;

/// emo Platform error type
///
/// Authorization failures are recovered inside the client (one refresh and
/// one retry) and only surface as `Unauthorized` or `NoRefreshToken` when that
/// recovery fails. Every other HTTP failure class surfaces immediately.
#[derive(Debug, Clone)]
pub enum PlatformError {
    /// No usable refresh token in the store, the configuration or the environment
    NoRefreshToken(String),
    /// A call was rejected with 401 and the retry after a refresh was rejected too
    Unauthorized(String),
    /// Room id unknown to the client or the platform
    NoRoom(String),
    /// HTTP 400
    BadRequest(String),
    /// HTTP 404
    NotFound(String),
    /// HTTP 429
    RateLimit(String),
    /// Any other non-2xx status
    Unknown { status: u16, message: String },
    /// Transport, parse or request-building failure
    Api(ApiError),
    /// Credential persistence failed
    Storage(crate::storage::StorageError),
    /// Configuration error
    Config(String),
    /// Webhook receiver could not bind or serve
    Webhook(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::NoRefreshToken(msg) => write!(f, "No usable refresh token: {}", msg),
            PlatformError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            PlatformError::NoRoom(msg) => write!(f, "No such room: {}", msg),
            PlatformError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            PlatformError::NotFound(msg) => write!(f, "Not found: {}", msg),
            PlatformError::RateLimit(msg) => write!(f, "Rate limit exceeded: {}", msg),
            PlatformError::Unknown { status, message } => {
                write!(f, "Unexpected HTTP {} response: {}", status, message)
            }
            PlatformError::Api(err) => write!(f, "API error: {}", err),
            PlatformError::Storage(err) => write!(f, "Storage error: {}", err),
            PlatformError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PlatformError::Webhook(msg) => write!(f, "Webhook receiver error: {}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

impl From<ApiError> for PlatformError {
    fn from(err: ApiError) -> Self {
        PlatformError::Api(err)
    }
}

impl From<crate::storage::StorageError> for PlatformError {
    fn from(err: crate::storage::StorageError) -> Self {
        PlatformError::Storage(err)
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::Api(ApiError::from(err))
    }
}

impl PlatformError {
    /// Map a non-2xx status to its error kind
    ///
    /// 401 maps to `Unauthorized`; the executor intercepts it before this
    /// point when a refresh is still allowed.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => PlatformError::BadRequest(message),
            401 => PlatformError::Unauthorized(message),
            404 => PlatformError::NotFound(message),
            429 => PlatformError::RateLimit(message),
            _ => PlatformError::Unknown { status, message },
        }
    }

    /// HTTP status behind this error, if it came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::BadRequest(_) => Some(400),
            PlatformError::Unauthorized(_) => Some(401),
            PlatformError::NotFound(_) => Some(404),
            PlatformError::RateLimit(_) => Some(429),
            PlatformError::Unknown { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Transport-level errors
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Network error (connection, timeout, etc.)
    Network(String),
    /// Failed to parse response
    Parse(String),
    /// Request building failed
    Request(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ApiError::Request(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("Request timeout".to_string())
        } else if err.is_connect() {
            ApiError::Network(format!("Connection failed: {}", err))
        } else if err.is_builder() {
            ApiError::Request(err.to_string())
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Token pair returned by `POST /oauth/token/refresh`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Account information from `GET /v1/me`
///
/// Personal and business accounts return different field sets, so every
/// field is optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountInfo {
    pub name: String,
    pub email: String,
    pub profile_image: String,
    pub uuid: String,
    pub plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Listing {
    pub offset: f64,
    pub limit: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMember {
    pub uuid: String,
    #[serde(default)]
    pub user_type: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub profile_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub room_type: String,
    #[serde(default)]
    pub room_members: Vec<RoomMember>,
}

/// Rooms list from `GET /v1/rooms`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsList {
    pub listing: Listing,
    pub rooms: Vec<RoomInfo>,
}

/// Webhook setting as returned by the `/v1/webhook` endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookInfo {
    pub description: String,
    pub events: Vec<String>,
    pub status: String,
    /// Shared secret the platform sends back in `X-Platform-Api-Secret`
    pub secret: String,
    pub url: String,
}

/// Body of `POST /v1/webhook` and `PUT /v1/webhook`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSetting {
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl WebhookSetting {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Inbound webhook notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBody {
    pub request_id: String,
    /// Room the event originated from
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub timestamp: i64,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub receiver: String,
}

impl WebhookBody {
    /// Event time as UTC, if `timestamp` is a valid unix time in seconds
    pub fn received_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// LED color for `Room::change_led_color`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Head position for `Room::move_to`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Head {
    pub angle: f64,
    pub vertical_angle: f64,
}

/// Business-plan broadcast message
///
/// Immediate messages carry no `executed_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<i64>,
    pub immediate: bool,
}

impl BroadcastMessage {
    /// Message delivered as soon as it is created
    pub fn immediate(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            executed_at: None,
            immediate: true,
        }
    }

    /// Message delivered at unix time `executed_at`
    pub fn scheduled(title: impl Into<String>, text: impl Into<String>, executed_at: i64) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            executed_at: Some(executed_at),
            immediate: false,
        }
    }
}
