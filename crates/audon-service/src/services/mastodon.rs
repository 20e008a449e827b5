//! Identity Gateway and profile client for the user's Mastodon server.
//!
//! Calls are made with the caller's own access token taken from their
//! session, except announcements which are posted by the bot account.

use crate::config::BotConfig;
use crate::errors::AudonError;
use crate::models::{Relationship, SessionData};
use async_trait::async_trait;
use common::secret::ExposeSecret;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{error, instrument, warn};

const MASTODON_REQUEST_TIMEOUT_SECS: u64 = 15;

const USER_AGENT: &str = concat!("Audon/", env!("CARGO_PKG_VERSION"));

/// Account as reported by the remote server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAccount {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub acct: String,
    #[serde(default)]
    pub url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RelationshipEntry {
    #[serde(flatten)]
    relationship: Relationship,
}

/// Resolves callers and answers social-graph queries.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn resolve_current_user(&self, session: &SessionData) -> Result<RemoteAccount, AudonError>;

    /// Relationship between the session's user and the account `webfinger`,
    /// from the session user's side. `None` if the lookup is ambiguous.
    async fn relationship(
        &self,
        session: &SessionData,
        webfinger: &str,
    ) -> Result<Option<Relationship>, AudonError>;
}

/// Writes to remote profiles and timelines.
#[async_trait]
pub trait ProfileClient: Send + Sync {
    /// Upload `avatar` as the session user's profile picture.
    async fn restore_avatar(&self, session: &SessionData, avatar: &Path) -> Result<(), AudonError>;

    /// Post a public status from the bot account.
    async fn post_announcement(&self, status: &str, language: &str) -> Result<(), AudonError>;
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'a str,
    language: &'a str,
    visibility: &'static str,
}

/// HTTP client for Mastodon-compatible servers.
#[derive(Clone)]
pub struct MastodonClient {
    client: Client,
    bot: Option<BotConfig>,
}

impl MastodonClient {
    /// # Errors
    ///
    /// Returns `AudonError::Internal` if the HTTP client cannot be built.
    pub fn new(bot: Option<BotConfig>) -> Result<Self, AudonError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(MASTODON_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                error!(target: "audon.services.mastodon", error = %e, "Failed to build HTTP client");
                AudonError::Internal
            })?;

        Ok(Self { client, bot })
    }

    fn endpoint(server: &str, path: &str) -> String {
        format!("{}{path}", server.trim_end_matches('/'))
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        session: &SessionData,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, AudonError> {
        let response = self
            .client
            .get(Self::endpoint(&session.server, path))
            .bearer_auth(session.access_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "audon.services.mastodon", error = %e, "Mastodon request failed");
                AudonError::Internal
            })?;

        Self::handle_response(response).await
    }

    /// Map remote status codes to errors.
    async fn handle_response<R: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<R, AudonError> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(|e| {
                error!(target: "audon.services.mastodon", error = %e, "Failed to parse Mastodon response");
                AudonError::Internal
            })
        } else if status == StatusCode::UNAUTHORIZED {
            Err(AudonError::InvalidSession("login_required".to_string()))
        } else {
            warn!(target: "audon.services.mastodon", status = %status, "Mastodon returned error");
            Err(AudonError::Internal)
        }
    }
}

#[async_trait]
impl IdentityGateway for MastodonClient {
    #[instrument(skip_all, fields(audon_id = %session.audon_id))]
    async fn resolve_current_user(&self, session: &SessionData) -> Result<RemoteAccount, AudonError> {
        self.get_json(session, "/api/v1/accounts/verify_credentials", &[])
            .await
    }

    #[instrument(skip_all, fields(audon_id = %session.audon_id))]
    async fn relationship(
        &self,
        session: &SessionData,
        webfinger: &str,
    ) -> Result<Option<Relationship>, AudonError> {
        let found: Vec<RemoteAccount> = self
            .get_json(
                session,
                "/api/v1/accounts/search",
                &[("q", webfinger), ("limit", "1")],
            )
            .await?;
        let [account] = found.as_slice() else {
            return Ok(None);
        };

        let relationships: Vec<RelationshipEntry> = self
            .get_json(
                session,
                "/api/v1/accounts/relationships",
                &[("id[]", account.id.as_str())],
            )
            .await?;
        match relationships.as_slice() {
            [entry] => Ok(Some(entry.relationship)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ProfileClient for MastodonClient {
    #[instrument(skip_all, fields(audon_id = %session.audon_id))]
    async fn restore_avatar(&self, session: &SessionData, avatar: &Path) -> Result<(), AudonError> {
        let bytes = tokio::fs::read(avatar).await.map_err(|e| {
            warn!(target: "audon.services.mastodon", error = %e, path = %avatar.display(), "Cached avatar unreadable");
            AudonError::Internal
        })?;
        let file_name = avatar
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "avatar".to_string());
        let form = Form::new().part("avatar", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .patch(Self::endpoint(
                &session.server,
                "/api/v1/accounts/update_credentials",
            ))
            .bearer_auth(session.access_token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "audon.services.mastodon", error = %e, "Avatar upload failed");
                AudonError::Internal
            })?;

        let _: RemoteAccount = Self::handle_response(response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(language = %language))]
    async fn post_announcement(&self, status: &str, language: &str) -> Result<(), AudonError> {
        let Some(bot) = &self.bot else {
            warn!(target: "audon.services.mastodon", "Announcement requested without a bot account");
            return Err(AudonError::Internal);
        };

        let response = self
            .client
            .post(Self::endpoint(&bot.server, "/api/v1/statuses"))
            .bearer_auth(bot.access_token.expose_secret())
            .json(&StatusBody {
                status,
                language,
                visibility: "public",
            })
            .send()
            .await
            .map_err(|e| {
                warn!(target: "audon.services.mastodon", error = %e, "Announcement post failed");
                AudonError::Internal
            })?;

        let _: serde_json::Value = Self::handle_response(response).await?;
        Ok(())
    }
}

/// Scripted gateway and recording profile client for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MockIdentityGateway {
        accounts: Mutex<HashMap<String, RemoteAccount>>,
        relationships: Mutex<HashMap<(String, String), Relationship>>,
        pub relationship_calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockIdentityGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Account returned for sessions of `audon_id`.
        pub async fn set_account(&self, audon_id: &str, account: RemoteAccount) {
            self.accounts
                .lock()
                .await
                .insert(audon_id.to_string(), account);
        }

        /// Relationship seen by `audon_id` towards `webfinger`.
        pub async fn set_relationship(
            &self,
            audon_id: &str,
            webfinger: &str,
            relationship: Relationship,
        ) {
            self.relationships
                .lock()
                .await
                .insert((audon_id.to_string(), webfinger.to_string()), relationship);
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl IdentityGateway for MockIdentityGateway {
        async fn resolve_current_user(
            &self,
            session: &SessionData,
        ) -> Result<RemoteAccount, AudonError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AudonError::Internal);
            }
            self.accounts
                .lock()
                .await
                .get(&session.audon_id)
                .cloned()
                .ok_or_else(|| AudonError::InvalidSession("login_required".to_string()))
        }

        async fn relationship(
            &self,
            session: &SessionData,
            webfinger: &str,
        ) -> Result<Option<Relationship>, AudonError> {
            self.relationship_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AudonError::Internal);
            }
            Ok(self
                .relationships
                .lock()
                .await
                .get(&(session.audon_id.clone(), webfinger.to_string()))
                .copied())
        }
    }

    #[derive(Default)]
    pub struct MockProfileClient {
        restores: Mutex<Vec<(String, PathBuf)>>,
        announcements: Mutex<Vec<(String, String)>>,
        fail_restore: AtomicBool,
        fail_announce: AtomicBool,
    }

    impl MockProfileClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// `(audon_id, avatar path)` for each restore attempt.
        pub async fn restores(&self) -> Vec<(String, PathBuf)> {
            self.restores.lock().await.clone()
        }

        /// `(status, language)` for each announcement attempt.
        pub async fn announcements(&self) -> Vec<(String, String)> {
            self.announcements.lock().await.clone()
        }

        pub fn set_restore_failing(&self, fail: bool) {
            self.fail_restore.store(fail, Ordering::SeqCst);
        }

        pub fn set_announce_failing(&self, fail: bool) {
            self.fail_announce.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProfileClient for MockProfileClient {
        async fn restore_avatar(
            &self,
            session: &SessionData,
            avatar: &Path,
        ) -> Result<(), AudonError> {
            self.restores
                .lock()
                .await
                .push((session.audon_id.clone(), avatar.to_path_buf()));
            if self.fail_restore.load(Ordering::SeqCst) {
                return Err(AudonError::Internal);
            }
            Ok(())
        }

        async fn post_announcement(&self, status: &str, language: &str) -> Result<(), AudonError> {
            self.announcements
                .lock()
                .await
                .push((status.to_string(), language.to_string()));
            if self.fail_announce.load(Ordering::SeqCst) {
                return Err(AudonError::Internal);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_account_keeps_unknown_fields() {
        let json = r#"{"id":"109","username":"alice","acct":"alice","url":"https://m.example/@alice","display_name":"Alice","bot":false}"#;
        let account: RemoteAccount = serde_json::from_str(json).unwrap();
        assert_eq!(account.id, "109");
        assert_eq!(account.extra["display_name"], "Alice");

        let back = serde_json::to_value(&account).unwrap();
        assert_eq!(back["bot"], false);
    }

    #[test]
    fn test_relationship_entry_parses_mastodon_shape() {
        let json = r#"{"id":"1","following":true,"followed_by":false,"blocking":false}"#;
        let entry: RelationshipEntry = serde_json::from_str(json).unwrap();
        assert!(entry.relationship.following);
        assert!(!entry.relationship.followed_by);
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(
            MastodonClient::endpoint("https://m.example/", "/api/v1/statuses"),
            "https://m.example/api/v1/statuses"
        );
    }

    #[test]
    fn test_status_body_is_public() {
        let body = serde_json::to_value(StatusBody {
            status: "hi",
            language: "ja",
            visibility: "public",
        })
        .unwrap();
        assert_eq!(body["visibility"], "public");
        assert_eq!(body["language"], "ja");
    }
}
