//! emo Platform SDK
//!
//! A Rust client for the BOCCO emo Platform API.
//!
//! This SDK provides:
//! - A self-healing token lifecycle (persisted credentials, environment bootstrap, single-flight refresh)
//! - Authenticated requests with one transparent re-authentication and retry
//! - Thin wrappers for account, room and webhook setting endpoints
//! - A webhook receiver that verifies, deduplicates and dispatches events to callbacks
//! - Token storage as atomic files or in the OS keychain
//!
//! # Example
//!
//! ```no_run
//! use emo_platform_sdk::{ClientConfig, Color};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads EMO_PLATFORM_API_REFRESH_TOKEN when no tokens are stored yet
//! let client = ClientConfig::new().connect().await?;
//!
//! let rooms = client.get_rooms_id().await?;
//! let room = client.create_room_client(&rooms[0]);
//! room.send_msg("Hello from Rust").await?;
//! room.change_led_color(Color { red: 0, green: 128, blue: 255 }).await?;
//! # Ok(())
//! # }
//! ```

pub mod platform_api;
pub mod storage;

// Re-export commonly used types and functions
pub use platform_api::{
    blocking,
    client::{ApiRequest, Client, CHANNEL_USER_HEADER},
    config::{ClientConfig, ACCESS_TOKEN_ENV, DEFAULT_ENDPOINT, REFRESH_TOKEN_ENV},
    room::Room,
    token_manager::{TokenManager, TokenSnapshot, TokenState, TOKEN_REFRESH_PATH},
    token_storage::{
        clear_credentials, load_credentials, save_credentials, Credentials,
        PREVIOUS_BOOTSTRAP_KEY, TOKEN_STORAGE_KEY,
    },
    types::{
        AccountInfo, ApiError, BroadcastMessage, Color, Head, PlatformError, RoomInfo, RoomsList, WebhookBody,
        WebhookInfo, WebhookSetting,
    },
    webhook::{
        CallbackError, DispatchOutcome, ShutdownHandle, WebhookCallback, WebhookConfig,
        WebhookDispatcher, WebhookRegistry, WebhookServer, ANY_ROOM_ID,
        DEFAULT_MAX_PENDING_CALLBACKS, MAX_SAVED_REQUEST_ID, SECRET_HEADER,
    },
};
