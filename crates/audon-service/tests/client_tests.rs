//! Wire-level tests for the live service and Mastodon clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use audon_service::config::BotConfig;
use audon_service::errors::AudonError;
use audon_service::models::SessionData;
use audon_service::services::livekit::ParticipantPermission;
use audon_service::services::{IdentityGateway, LiveDirectory, LiveKitClient, MastodonClient, ProfileClient};
use common::secret::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TWIRP: &str = "/twirp/livekit.RoomService";

fn live_client(server: &MockServer) -> LiveKitClient {
    LiveKitClient::new(
        server.uri(),
        "test-api-key".to_string(),
        SecretString::from("test-api-secret-with-enough-entropy".to_string()),
    )
    .unwrap()
}

fn user_session(server: &MockServer) -> SessionData {
    SessionData {
        server: server.uri(),
        access_token: SecretString::from("user-token".to_string()),
        audon_id: "id-alice".to_string(),
    }
}

// ============================================================================
// Live service
// ============================================================================

#[tokio::test]
async fn test_create_room_sends_metadata_with_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/CreateRoom")))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({ "name": "room-a", "metadata": "{\"v\":1}" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sid": "RM_1",
            "name": "room-a",
            "metadata": "{\"v\":1}",
            "numParticipants": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let room = live_client(&server)
        .create_room("room-a", "{\"v\":1}")
        .await
        .unwrap();

    assert_eq!(room.name, "room-a");
    assert_eq!(room.metadata, "{\"v\":1}");
}

#[tokio::test]
async fn test_list_rooms_filters_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/ListRooms")))
        .and(body_partial_json(json!({ "names": ["room-a"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rooms": [{ "name": "room-a", "metadata": "m", "num_participants": 2 }]
        })))
        .mount(&server)
        .await;

    let client = live_client(&server);
    let found = client.get_room("room-a").await.unwrap().unwrap();

    assert_eq!(found.num_participants, 2);
}

#[tokio::test]
async fn test_empty_list_rooms_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/ListRooms")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = live_client(&server);

    assert!(client.list_rooms(None).await.unwrap().is_empty());
    assert_eq!(client.get_room("room-a").await.unwrap(), None);
}

#[tokio::test]
async fn test_list_participants_reads_permissions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/ListParticipants")))
        .and(body_partial_json(json!({ "room": "room-a" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "participants": [{
                "identity": "id-bob",
                "metadata": "{}",
                "permission": { "canSubscribe": true, "canPublish": true, "canPublishData": true }
            }]
        })))
        .mount(&server)
        .await;

    let participants = live_client(&server)
        .list_participants("room-a")
        .await
        .unwrap();

    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].identity, "id-bob");
    assert_eq!(participants[0].permission, Some(ParticipantPermission::speaker()));
}

#[tokio::test]
async fn test_update_participant_sends_permission() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/UpdateParticipant")))
        .and(body_partial_json(json!({
            "room": "room-a",
            "identity": "id-bob",
            "permission": { "can_publish": false, "can_subscribe": true }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "identity": "id-bob" })))
        .expect(1)
        .mount(&server)
        .await;

    let participant = live_client(&server)
        .update_participant_permission("room-a", "id-bob", ParticipantPermission::listener())
        .await
        .unwrap();

    assert_eq!(participant.identity, "id-bob");
}

#[tokio::test]
async fn test_missing_room_is_tolerated_on_delete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/DeleteRoom")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/RemoveParticipant")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/UpdateRoomMetadata")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = live_client(&server);

    assert!(client.delete_room("room-a").await.is_ok());
    assert!(client.remove_participant("room-a", "id-bob").await.is_ok());
    assert!(matches!(
        client.update_room_metadata("room-a", "{}").await,
        Err(AudonError::LiveService(_))
    ));
}

#[tokio::test]
async fn test_rejected_grant_is_live_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/ListRooms")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = live_client(&server).list_rooms(None).await;

    assert!(matches!(result, Err(AudonError::LiveService(_))));
}

#[tokio::test]
async fn test_server_error_and_garbage_are_live_service_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/CreateRoom")))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{TWIRP}/ListParticipants")))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = live_client(&server);

    assert!(matches!(
        client.create_room("room-a", "{}").await,
        Err(AudonError::LiveService(_))
    ));
    assert!(matches!(
        client.list_participants("room-a").await,
        Err(AudonError::LiveService(_))
    ));
}

// ============================================================================
// Mastodon
// ============================================================================

#[tokio::test]
async fn test_resolve_current_user_uses_session_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/verify_credentials"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "109",
            "username": "alice",
            "acct": "alice",
            "url": "https://m.example/@alice",
            "avatar": "https://m.example/a.png"
        })))
        .mount(&server)
        .await;

    let client = MastodonClient::new(None).unwrap();
    let account = client
        .resolve_current_user(&user_session(&server))
        .await
        .unwrap();

    assert_eq!(account.id, "109");
    assert_eq!(account.extra["avatar"], "https://m.example/a.png");
}

#[tokio::test]
async fn test_expired_token_requires_login() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/verify_credentials"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = MastodonClient::new(None).unwrap();
    let result = client.resolve_current_user(&user_session(&server)).await;

    assert!(matches!(result, Err(AudonError::InvalidSession(m)) if m == "login_required"));
}

#[tokio::test]
async fn test_relationship_resolves_account_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/search"))
        .and(query_param("q", "host@m.example"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "42", "username": "host", "acct": "host@m.example", "url": "u" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/relationships"))
        .and(query_param("id[]", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "42", "following": true, "followed_by": false, "blocking": false }
        ])))
        .mount(&server)
        .await;

    let client = MastodonClient::new(None).unwrap();
    let relationship = client
        .relationship(&user_session(&server), "host@m.example")
        .await
        .unwrap()
        .unwrap();

    assert!(relationship.following);
    assert!(!relationship.followed_by);
}

#[tokio::test]
async fn test_ambiguous_search_yields_no_relationship() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/relationships"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let client = MastodonClient::new(None).unwrap();
    let relationship = client
        .relationship(&user_session(&server), "host@m.example")
        .await
        .unwrap();

    assert_eq!(relationship, None);
}

#[tokio::test]
async fn test_restore_avatar_uploads_cached_file() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/accounts/update_credentials"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "109" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = std::env::temp_dir().join(format!("audon-avatar-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let avatar = dir.join("original.png");
    tokio::fs::write(&avatar, b"\x89PNG fake").await.unwrap();

    let client = MastodonClient::new(None).unwrap();
    let result = client.restore_avatar(&user_session(&server), &avatar).await;
    tokio::fs::remove_dir_all(&dir).await.unwrap();

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_restore_avatar_missing_file_fails_before_upload() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/accounts/update_credentials"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = MastodonClient::new(None).unwrap();
    let missing = std::env::temp_dir().join("audon-no-such-dir/avatar.png");
    let result = client.restore_avatar(&user_session(&server), &missing).await;

    assert!(matches!(result, Err(AudonError::Internal)));
}

#[tokio::test]
async fn test_announcement_posts_as_bot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/statuses"))
        .and(header("authorization", "Bearer bot-token"))
        .and(body_partial_json(json!({
            "status": "hello",
            "language": "en",
            "visibility": "public"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = MastodonClient::new(Some(BotConfig {
        server: server.uri(),
        access_token: SecretString::from("bot-token".to_string()),
    }))
    .unwrap();

    client.post_announcement("hello", "en").await.unwrap();
}

#[tokio::test]
async fn test_announcement_without_bot_fails() {
    let client = MastodonClient::new(None).unwrap();

    let result = client.post_announcement("hello", "en").await;

    assert!(matches!(result, Err(AudonError::Internal)));
}
