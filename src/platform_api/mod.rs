/// emo Platform API integration module
///
/// ## Token lifecycle
///
/// 1. `ClientConfig::connect` loads the persisted credentials
/// 2. Without a stored access token the bootstrap (environment) tokens are used
/// 3. A 401 on any call triggers one refresh exchange shared by all waiting callers
/// 4. The rotated token pair is persisted before the failed call is retried once
pub mod blocking;
pub mod client;
pub mod config;
pub mod room;
pub mod token_manager;
pub mod token_storage;
pub mod types;
pub mod webhook;
