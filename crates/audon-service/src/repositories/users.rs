//! Users repository.
//!
//! User records are written by the login flow. This service only reads
//! them and clears the cached avatar pointer.

use crate::errors::AudonError;
use crate::models::AudonUser;
use crate::observability::metrics;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, audon_id: &str) -> Result<Option<AudonUser>, AudonError>;

    /// Lookup by federated identity.
    async fn find_by_remote(
        &self,
        remote_id: &str,
        remote_url: &str,
    ) -> Result<Option<AudonUser>, AudonError>;

    async fn find_by_webfinger(&self, webfinger: &str) -> Result<Option<AudonUser>, AudonError>;

    /// Drop the locally cached avatar pointer. Returns false if none was set.
    async fn clear_avatar(&self, audon_id: &str) -> Result<bool, AudonError>;
}

const USER_COLUMNS: &str = "audon_id, remote_id, remote_url, webfinger, avatar, created_at";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(
        &self,
        operation: &str,
        filter: &str,
        params: &[&str],
    ) -> Result<Option<AudonUser>, AudonError> {
        let start = Instant::now();
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter}");
        let query = params
            .iter()
            .fold(sqlx::query(&sql), |query, param| query.bind(*param));

        let row = query.fetch_optional(&self.pool).await.map_err(|e| {
            metrics::record_db_query(operation, "error", start.elapsed());
            AudonError::Database(e.to_string())
        })?;
        metrics::record_db_query(operation, "success", start.elapsed());

        row.as_ref().map(map_user_row).transpose()
    }
}

fn map_user_row(row: &PgRow) -> Result<AudonUser, AudonError> {
    let avatar: Option<String> = row.try_get("avatar")?;
    Ok(AudonUser {
        audon_id: row.try_get("audon_id")?,
        remote_id: row.try_get("remote_id")?,
        remote_url: row.try_get("remote_url")?,
        webfinger: row.try_get("webfinger")?,
        avatar_file: avatar.filter(|a| !a.is_empty()),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip_all, name = "audon.repo.find_user", fields(audon_id = %audon_id))]
    async fn find_by_id(&self, audon_id: &str) -> Result<Option<AudonUser>, AudonError> {
        self.fetch_one_by("find_user", "audon_id = $1", &[audon_id])
            .await
    }

    #[instrument(skip_all, name = "audon.repo.find_user_by_remote")]
    async fn find_by_remote(
        &self,
        remote_id: &str,
        remote_url: &str,
    ) -> Result<Option<AudonUser>, AudonError> {
        self.fetch_one_by(
            "find_user_by_remote",
            "remote_id = $1 AND remote_url = $2",
            &[remote_id, remote_url],
        )
        .await
    }

    #[instrument(skip_all, name = "audon.repo.find_user_by_webfinger")]
    async fn find_by_webfinger(&self, webfinger: &str) -> Result<Option<AudonUser>, AudonError> {
        self.fetch_one_by("find_user_by_webfinger", "webfinger = $1", &[webfinger])
            .await
    }

    #[instrument(skip_all, name = "audon.repo.clear_avatar", fields(audon_id = %audon_id))]
    async fn clear_avatar(&self, audon_id: &str) -> Result<bool, AudonError> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE users SET avatar = NULL WHERE audon_id = $1 AND avatar IS NOT NULL",
        )
        .bind(audon_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("clear_avatar", "error", start.elapsed());
            AudonError::Database(e.to_string())
        })?;
        metrics::record_db_query("clear_avatar", "success", start.elapsed());

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory user repository for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MockUserRepository {
        users: Mutex<HashMap<String, AudonUser>>,
        avatar_clears: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockUserRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn seed(&self, user: AudonUser) {
            self.users.lock().await.insert(user.audon_id.clone(), user);
        }

        pub async fn get(&self, audon_id: &str) -> Option<AudonUser> {
            self.users.lock().await.get(audon_id).cloned()
        }

        pub fn avatar_clear_count(&self) -> usize {
            self.avatar_clears.load(Ordering::SeqCst)
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), AudonError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AudonError::Database("mock store unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UserRepository for MockUserRepository {
        async fn find_by_id(&self, audon_id: &str) -> Result<Option<AudonUser>, AudonError> {
            self.check()?;
            Ok(self.get(audon_id).await)
        }

        async fn find_by_remote(
            &self,
            remote_id: &str,
            remote_url: &str,
        ) -> Result<Option<AudonUser>, AudonError> {
            self.check()?;
            Ok(self
                .users
                .lock()
                .await
                .values()
                .find(|u| u.remote_id == remote_id && u.remote_url == remote_url)
                .cloned())
        }

        async fn find_by_webfinger(
            &self,
            webfinger: &str,
        ) -> Result<Option<AudonUser>, AudonError> {
            self.check()?;
            Ok(self
                .users
                .lock()
                .await
                .values()
                .find(|u| u.webfinger == webfinger)
                .cloned())
        }

        async fn clear_avatar(&self, audon_id: &str) -> Result<bool, AudonError> {
            self.check()?;
            let mut users = self.users.lock().await;
            match users.get_mut(audon_id) {
                Some(user) if user.avatar_file.is_some() => {
                    user.avatar_file = None;
                    self.avatar_clears.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockUserRepository;
    use super::*;
    use chrono::Utc;

    fn alice() -> AudonUser {
        AudonUser {
            audon_id: "alice".to_string(),
            remote_id: "109".to_string(),
            remote_url: "https://m.example/@alice".to_string(),
            webfinger: "alice@m.example".to_string(),
            avatar_file: Some("orig.png".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_mock_lookups() {
        let repo = MockUserRepository::new();
        repo.seed(alice()).await;

        assert!(repo.find_by_id("alice").await.unwrap().is_some());
        assert!(repo
            .find_by_remote("109", "https://m.example/@alice")
            .await
            .unwrap()
            .is_some());
        assert!(repo.find_by_remote("109", "https://other.example").await.unwrap().is_none());
        assert!(repo.find_by_webfinger("alice@m.example").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_clear_avatar_once() {
        let repo = MockUserRepository::new();
        repo.seed(alice()).await;

        assert!(repo.clear_avatar("alice").await.unwrap());
        assert!(!repo.clear_avatar("alice").await.unwrap());
        assert_eq!(repo.avatar_clear_count(), 1);
        assert!(repo.get("alice").await.unwrap().avatar_file.is_none());
    }
}
