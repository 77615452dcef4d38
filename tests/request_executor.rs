//! Request Executor Tests
//!
//! Tests for authenticated requests and the endpoint wrappers built on them:
//! - Status classification
//! - Retry rules after 401
//! - Tenant headers
//! - Account, room and webhook setting endpoints

use emo_platform_sdk::storage::FilesystemStorage;
use emo_platform_sdk::{
    blocking, save_credentials, ApiError, ApiRequest, BroadcastMessage, Client, ClientConfig,
    Color, Credentials, Head, PlatformError, WebhookSetting, TOKEN_REFRESH_PATH,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const ROOM: &str = "room-uuid-1";

async fn connected(server: &MockServer, dir: &TempDir) -> Client {
    let storage = FilesystemStorage::new(dir.path()).unwrap();
    save_credentials(&storage, &Credentials::new("VALID_A", "VALID_R"))
        .await
        .unwrap();

    ClientConfig::new()
        .with_endpoint(server.uri())
        .with_token_dir(dir.path())
        .with_tokens(Credentials::default())
        .connect()
        .await
        .unwrap()
}

fn rooms_body(ids: &[&str]) -> Value {
    let rooms: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "uuid": id,
                "name": "living room",
                "room_type": "normal",
                "room_members": []
            })
        })
        .collect();
    json!({
        "listing": { "offset": 0, "limit": 50, "total": ids.len() },
        "rooms": rooms
    })
}

// ============================================================================
// Status Classification Tests
// ============================================================================

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    for (status, route) in [(400, "/s400"), (404, "/s404"), (429, "/s429"), (500, "/s500")] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string("failure detail"))
            .mount(&server)
            .await;
    }

    let client = connected(&server, &dir).await;

    let bad = client.execute(ApiRequest::get("/s400")).await;
    assert!(matches!(bad, Err(PlatformError::BadRequest(ref msg)) if msg == "failure detail"));

    let missing = client.execute(ApiRequest::get("/s404")).await;
    assert!(matches!(missing, Err(PlatformError::NotFound(_))));

    let limited = client.execute(ApiRequest::get("/s429")).await;
    assert!(matches!(limited, Err(PlatformError::RateLimit(_))));

    let broken = client.execute(ApiRequest::get("/s500")).await;
    match broken {
        Err(err) => assert_eq!(err.status(), Some(500)),
        Ok(_) => panic!("expected an error for HTTP 500"),
    }
}

#[tokio::test]
async fn test_non_auth_errors_are_not_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let result = client.get_account_info().await;

    assert!(matches!(result, Err(PlatformError::Unknown { status: 500, .. })));
    assert_eq!(client.token_manager().exchange_count(), 0);
}

#[tokio::test]
async fn test_empty_success_body_is_null() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("DELETE"))
        .and(path("/v1/anything"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let body = client.execute(ApiRequest::delete("/v1/anything")).await.unwrap();
    assert!(body.is_null());
}

#[tokio::test]
async fn test_bearer_and_accept_headers_sent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/stamps"))
        .and(header("Authorization", "Bearer VALID_A"))
        .and(header("accept", "*/*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "stamps": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let stamps = client.get_stamps_list().await.unwrap();
    assert_eq!(stamps["stamps"], json!([]));
}

// ============================================================================
// Retry Tests
// ============================================================================

#[tokio::test]
async fn test_without_refresh_fails_on_first_401() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_REFRESH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let result = client
        .execute(ApiRequest::get("/v1/me").without_refresh())
        .await;

    assert!(matches!(result, Err(PlatformError::Unauthorized(_))));
}

#[tokio::test]
async fn test_second_401_after_refresh_is_unauthorized() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_REFRESH_PATH))
        .and(body_json(json!({ "refresh_token": "VALID_R" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "NEW_A",
            "refresh_token": "NEW_R"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let result = client.get_account_info().await;

    assert!(matches!(result, Err(PlatformError::Unauthorized(_))));
    assert_eq!(client.token_manager().exchange_count(), 1);
}

// ============================================================================
// Account and Rooms Tests
// ============================================================================

#[tokio::test]
async fn test_get_rooms_id_updates_known_rooms() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/rooms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rooms_body(&[ROOM, "room-uuid-2"])))
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let ids = client.get_rooms_id().await.unwrap();

    assert_eq!(ids, vec![ROOM.to_string(), "room-uuid-2".to_string()]);
    assert!(client.webhooks().known_rooms().contains(&ROOM.to_string()));
    assert!(!client.webhooks().has_only_default_room());
}

#[tokio::test]
async fn test_get_rooms_id_with_no_rooms() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/rooms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rooms_body(&[])))
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    assert!(matches!(client.get_rooms_id().await, Err(PlatformError::NoRoom(_))));
}

#[tokio::test]
async fn test_config_api_key_sent_as_channel_user() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let storage = FilesystemStorage::new(dir.path()).unwrap();
    save_credentials(&storage, &Credentials::new("VALID_A", ""))
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .and(header("X-Channel-User", "tenant-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account_id": 7,
            "name": "biz",
            "email": "biz@example.com",
            "organization_name": "Example Co.",
            "plan": "Business"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ClientConfig::new()
        .with_endpoint(server.uri())
        .with_token_dir(dir.path())
        .with_tokens(Credentials::default())
        .with_api_key("tenant-key")
        .connect()
        .await
        .unwrap();

    let info = client.get_account_info().await.unwrap();
    assert_eq!(info.organization_name.as_deref(), Some("Example Co."));
}

// ============================================================================
// Room Tests
// ============================================================================

#[tokio::test]
async fn test_room_send_msg() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path(format!("/v1/rooms/{}/messages/text", ROOM)))
        .and(body_json(json!({ "text": "hello" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sequence": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let sent = client.create_room_client(ROOM).send_msg("hello").await.unwrap();
    assert_eq!(sent["sequence"], 1);
}

#[tokio::test]
async fn test_room_get_msgs_with_before() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/v1/rooms/{}/messages", ROOM)))
        .and(query_param("before", "1650000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    client
        .create_room_client(ROOM)
        .get_msgs(Some(1_650_000_000))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_room_motions() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path(format!("/v1/rooms/{}/motions/led_color", ROOM)))
        .and(body_json(json!({ "red": 10, "green": 20, "blue": 30 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/rooms/{}/motions/move_to", ROOM)))
        .and(body_json(json!({ "angle": 10.0, "vertical_angle": -5.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/rooms/{}/motions/preset", ROOM)))
        .and(body_json(json!({ "uuid": "motion-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/rooms/{}/messages/stamp", ROOM)))
        .and(body_json(json!({ "uuid": "stamp-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let room = client.create_room_client(ROOM);
    room.change_led_color(Color { red: 10, green: 20, blue: 30 })
        .await
        .unwrap();
    room.move_to(Head { angle: 10.0, vertical_angle: -5.0 })
        .await
        .unwrap();
    room.send_motion("motion-1").await.unwrap();
    room.send_stamp("stamp-1", None).await.unwrap();
}

#[tokio::test]
async fn test_tenant_room_sends_its_own_key() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/v1/rooms/{}/sensors", ROOM)))
        .and(header("X-Channel-User", "room-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sensors": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let room = client.create_tenant_room_client(ROOM, "room-key");
    assert_eq!(room.api_key(), Some("room-key"));
    room.get_sensors_list().await.unwrap();
}

/// Matches a multipart body carrying `contents` in field `field` as `file_name`
fn multipart_file(
    field: &'static str,
    file_name: &'static str,
    contents: &'static str,
) -> impl Fn(&Request) -> bool + Send + Sync {
    move |request: &Request| {
        let body = String::from_utf8_lossy(&request.body);
        body.contains(&format!("name=\"{}\"", field))
            && body.contains(&format!("filename=\"{}\"", file_name))
            && body.contains(contents)
    }
}

#[tokio::test]
async fn test_room_send_image_is_multipart_and_survives_refresh() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("emo.png");
    std::fs::write(&image, b"PNGDATA").unwrap();
    let image_path = format!("/v1/rooms/{}/messages/image", ROOM);

    Mock::given(method("POST"))
        .and(path(image_path.as_str()))
        .and(header("Authorization", "Bearer VALID_A"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "NEW_A",
            "refresh_token": "NEW_R"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(image_path.as_str()))
        .and(header("Authorization", "Bearer NEW_A"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .and(multipart_file("image", "emo.png", "PNGDATA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sequence": 2 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let sent = client.create_room_client(ROOM).send_image(&image).await.unwrap();
    assert_eq!(sent["sequence"], 2);
}

#[tokio::test]
async fn test_room_send_audio_msg() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let audio = dir.path().join("hello.mp3");
    std::fs::write(&audio, b"MP3DATA").unwrap();

    Mock::given(method("POST"))
        .and(path(format!("/v1/rooms/{}/messages/audio", ROOM)))
        .and(multipart_file("audio", "hello.mp3", "MP3DATA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sequence": 3 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let sent = client.create_room_client(ROOM).send_audio_msg(&audio).await.unwrap();
    assert_eq!(sent["sequence"], 3);
}

#[tokio::test]
async fn test_room_send_missing_file_sends_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let result = client
        .create_room_client(ROOM)
        .send_image(dir.path().join("missing.png"))
        .await;
    assert!(matches!(result, Err(PlatformError::Api(ApiError::Request(_)))));
}

// ============================================================================
// Business Plan Tests
// ============================================================================

#[tokio::test]
async fn test_broadcast_and_payment_endpoints() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/broadcast_messages"))
        .and(body_json(json!({ "title": "notice", "text": "hello", "immediate": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/broadcast_messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/broadcast_messages/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "payments": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 3 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let created = client
        .create_broadcast_msg(&BroadcastMessage::immediate("notice", "hello"))
        .await
        .unwrap();
    assert_eq!(created["id"], 7);
    assert!(client.get_broadcast_msgs_list().await.unwrap()["messages"].is_array());
    assert_eq!(client.get_broadcast_msg_details(7).await.unwrap()["id"], 7);
    assert!(client.get_payments_info().await.unwrap()["payments"].is_array());
    assert_eq!(client.get_payment_info_detail(3).await.unwrap()["id"], 3);
}

// ============================================================================
// Webhook Setting Tests
// ============================================================================

#[tokio::test]
async fn test_webhook_setting_crud() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let info = json!({
        "description": "my hook",
        "events": [],
        "status": "active",
        "secret": "s3cret",
        "url": "https://example.com/hook"
    });

    Mock::given(method("POST"))
        .and(path("/v1/webhook"))
        .and(body_json(json!({ "url": "https://example.com/hook", "description": "my hook" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&info))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&info))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&info))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/webhook/events"))
        .and(body_json(json!({ "events": ["message.received"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&info))
        .expect(1)
        .mount(&server)
        .await;

    let client = connected(&server, &dir).await;
    let setting = WebhookSetting::new("https://example.com/hook").with_description("my hook");

    let created = client.create_webhook_setting(&setting).await.unwrap();
    assert_eq!(created.secret, "s3cret");
    assert_eq!(client.get_webhook_setting().await.unwrap().status, "active");
    client
        .register_webhook_event(&["message.received".to_string()])
        .await
        .unwrap();
    client.delete_webhook_setting().await.unwrap();
}

// ============================================================================
// Blocking Client Tests
// ============================================================================

#[test]
fn test_blocking_client_round_trip() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(MockServer::start());
    let dir = TempDir::new().unwrap();

    runtime.block_on(async {
        let storage = FilesystemStorage::new(dir.path()).unwrap();
        save_credentials(&storage, &Credentials::new("WRONG", "VALID_R"))
            .await
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer WRONG"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("Authorization", "Bearer NEW_A"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "emo user" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "NEW_A",
                "refresh_token": "NEW_R"
            })))
            .expect(1)
            .mount(&server)
            .await;
    });

    let client = blocking::Client::connect(
        ClientConfig::new()
            .with_endpoint(server.uri())
            .with_token_dir(dir.path())
            .with_tokens(Credentials::default()),
    )
    .unwrap();

    let info = client.get_account_info().unwrap();
    assert_eq!(info.name, "emo user");
    assert_eq!(client.async_client().token_manager().exchange_count(), 1);
}
