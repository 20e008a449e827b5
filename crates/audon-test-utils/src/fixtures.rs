//! Fixtures for Audon tests.

use audon_service::config::Config;
use audon_service::models::{
    AudonUser, CreateRoomRequest, ProfileSnapshot, Restriction, Room, SessionData,
};
use audon_service::services::mastodon::RemoteAccount;
use chrono::{DateTime, Duration, Utc};
use common::secret::SecretString;
use common::types::RoomId;
use std::collections::HashMap;

/// Local domain used by test configuration.
pub const TEST_DOMAIN: &str = "audon.test";

/// Home server of every fixture user.
pub const TEST_SERVER: &str = "https://m.example";

pub const TEST_LIVEKIT_KEY: &str = "test-api-key";
pub const TEST_LIVEKIT_SECRET: &str = "test-api-secret-with-enough-entropy";

/// A registered user `name@m.example` holding a cached avatar.
pub fn user(name: &str) -> AudonUser {
    AudonUser {
        audon_id: format!("id-{name}"),
        remote_id: format!("remote-{name}"),
        remote_url: format!("{TEST_SERVER}/@{name}"),
        webfinger: format!("{name}@m.example"),
        avatar_file: Some(format!("{name}.png")),
        created_at: Utc::now(),
    }
}

/// The home-server account matching [`user`].
pub fn remote_account(user: &AudonUser) -> RemoteAccount {
    RemoteAccount {
        id: user.remote_id.clone(),
        username: user.webfinger.split('@').next().unwrap_or_default().to_string(),
        acct: user.webfinger.clone(),
        url: user.remote_url.clone(),
        extra: serde_json::Map::new(),
    }
}

pub fn session(user: &AudonUser) -> SessionData {
    SessionData {
        server: TEST_SERVER.to_string(),
        access_token: SecretString::from(format!("token-{}", user.audon_id)),
        audon_id: user.audon_id.clone(),
    }
}

/// Profile snapshot a client sends with a join.
pub fn profile(user: &AudonUser) -> ProfileSnapshot {
    ProfileSnapshot {
        id: Some(user.remote_id.clone()),
        acct: Some(user.webfinger.clone()),
        display_name: Some(user.webfinger.clone()),
        avatar: Some(format!("{TEST_SERVER}/avatars/{}.png", user.audon_id)),
        url: Some(user.remote_url.clone()),
        extra: serde_json::Map::new(),
    }
}

/// Request for an instant, unrestricted room.
pub fn create_request(title: &str) -> CreateRoomRequest {
    CreateRoomRequest {
        title: title.to_string(),
        description: String::new(),
        restriction: Restriction::Everyone,
        co_hosts: Vec::new(),
        scheduled_at: None,
        advertise: None,
    }
}

/// A durable room hosted by `host` that started an hour ago.
pub fn room(host: &AudonUser, restriction: Restriction) -> Room {
    room_scheduled(host, restriction, Utc::now() - Duration::hours(1))
}

pub fn room_scheduled(host: &AudonUser, restriction: Restriction, at: DateTime<Utc>) -> Room {
    Room {
        room_id: RoomId::generate().expect("rng available"),
        title: "Udon talk".to_string(),
        description: String::new(),
        host: host.clone(),
        co_hosts: Vec::new(),
        restriction,
        kicked: Vec::new(),
        scheduled_at: at,
        created_at: at,
        ended_at: None,
        advertise: None,
    }
}

pub fn config_vars() -> HashMap<String, String> {
    HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://test/test".to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("LOCAL_DOMAIN".to_string(), TEST_DOMAIN.to_string()),
        ("STORAGE_DIR".to_string(), "/var/lib/audon-test".to_string()),
        ("LIVEKIT_URL".to_string(), "http://livekit.test".to_string()),
        (
            "LIVEKIT_PUBLIC_URL".to_string(),
            "wss://livekit.test".to_string(),
        ),
        ("LIVEKIT_API_KEY".to_string(), TEST_LIVEKIT_KEY.to_string()),
        (
            "LIVEKIT_API_SECRET".to_string(),
            TEST_LIVEKIT_SECRET.to_string(),
        ),
    ])
}

pub fn test_config() -> Config {
    Config::from_vars(&config_vars()).expect("test config is valid")
}
