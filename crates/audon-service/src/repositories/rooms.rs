//! Rooms repository.
//!
//! The append-only and set-once rules on a room are enforced by single
//! statements so concurrent writers cannot violate them:
//!
//! - `ended_at` is only written `WHERE ended_at IS NULL`
//! - `cohosts` / `kicked` are appended behind a membership guard that uses
//!   the same identity rule as `AudonUser::same_as`

use crate::errors::AudonError;
use crate::models::{AudonUser, Restriction, Room, UpdateRoomRequest};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::RoomId;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

/// Durable Room Store.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), AudonError>;

    async fn insert(&self, room: &Room) -> Result<(), AudonError>;

    async fn find_by_id(&self, room_id: &RoomId) -> Result<Option<Room>, AudonError>;

    /// Unfinished instant rooms hosted by the given user.
    async fn find_open_instant_rooms(&self, host_audon_id: &str) -> Result<Vec<Room>, AudonError>;

    /// Most recently activated room hosted by the given user.
    async fn latest_hosted_by(&self, host_audon_id: &str) -> Result<Option<Room>, AudonError>;

    async fn delete_many(&self, room_ids: &[RoomId]) -> Result<u64, AudonError>;

    /// Apply a title/description/restriction patch. Returns the updated room.
    async fn update_details(
        &self,
        room_id: &RoomId,
        patch: &UpdateRoomRequest,
    ) -> Result<Option<Room>, AudonError>;

    /// Record the time the room was first provisioned live. `created_at`
    /// never changes after insert.
    async fn mark_activated(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), AudonError>;

    /// Set `ended_at` if unset. Returns false if the room had already ended.
    async fn set_ended(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<bool, AudonError>;

    /// Append to `cohosts`. Returns false if the user was already present.
    async fn append_cohost(&self, room_id: &RoomId, user: &AudonUser) -> Result<bool, AudonError>;

    /// Append to `kicked`. Returns false if the user was already present.
    async fn append_kicked(&self, room_id: &RoomId, user: &AudonUser) -> Result<bool, AudonError>;
}

const ROOM_COLUMNS: &str = "room_id, title, description, host, cohosts, restriction, kicked, \
                            advertise, scheduled_at, created_at, ended_at";

/// PostgreSQL-backed room repository.
#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn observe<T>(
    operation: &str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, AudonError> {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_db_query(operation, status, start.elapsed());
    result.map_err(AudonError::from)
}

fn map_room_row(row: &PgRow) -> Result<Room, AudonError> {
    let room_id: String = row.try_get("room_id")?;
    let restriction: String = row.try_get("restriction")?;
    let host: Json<AudonUser> = row.try_get("host")?;
    let co_hosts: Json<Vec<AudonUser>> = row.try_get("cohosts")?;
    let kicked: Json<Vec<AudonUser>> = row.try_get("kicked")?;

    Ok(Room {
        room_id: RoomId::parse(&room_id)
            .map_err(|e| AudonError::Database(format!("stored room id is malformed: {e}")))?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        host: host.0,
        co_hosts: co_hosts.0,
        restriction: Restriction::parse(&restriction).ok_or_else(|| {
            AudonError::Database(format!("stored restriction is unknown: {restriction}"))
        })?,
        kicked: kicked.0,
        scheduled_at: row.try_get("scheduled_at")?,
        created_at: row.try_get("created_at")?,
        ended_at: row.try_get("ended_at")?,
        advertise: row.try_get("advertise")?,
    })
}

/// Guard matching an element of a JSONB user array against `$3` (audon id),
/// `$4` (remote id) and `$5` (remote url).
const MEMBER_GUARD: &str = "NOT EXISTS (
        SELECT 1 FROM jsonb_array_elements({col}) AS e
        WHERE (e->>'audon_id' <> '' AND e->>'audon_id' = $3)
           OR (e->>'remote_id' <> '' AND e->>'remote_id' = $4 AND e->>'remote_url' = $5)
    )";

impl PgRoomRepository {
    async fn append_member(
        &self,
        operation: &'static str,
        column: &'static str,
        room_id: &RoomId,
        user: &AudonUser,
    ) -> Result<bool, AudonError> {
        let start = Instant::now();
        let guard = MEMBER_GUARD.replace("{col}", column);
        let sql = format!(
            "UPDATE rooms SET {column} = {column} || jsonb_build_array($2::jsonb) \
             WHERE room_id = $1 AND {guard}"
        );

        let result = sqlx::query(&sql)
            .bind(room_id.as_str()) // $1
            .bind(Json(user)) // $2
            .bind(&user.audon_id) // $3
            .bind(&user.remote_id) // $4
            .bind(&user.remote_url) // $5
            .execute(&self.pool)
            .await;

        let result = observe(operation, start, result)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn ping(&self) -> Result<(), AudonError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all, name = "audon.repo.insert_room", fields(room_id = %room.room_id))]
    async fn insert(&self, room: &Room) -> Result<(), AudonError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO rooms (
                room_id, title, description, host_audon_id, host, cohosts,
                restriction, kicked, advertise, scheduled_at, created_at, ended_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(room.room_id.as_str()) // $1
        .bind(&room.title) // $2
        .bind(&room.description) // $3
        .bind(&room.host.audon_id) // $4
        .bind(Json(&room.host)) // $5
        .bind(Json(&room.co_hosts)) // $6
        .bind(room.restriction.as_str()) // $7
        .bind(Json(&room.kicked)) // $8
        .bind(room.advertise.as_deref()) // $9
        .bind(room.scheduled_at) // $10
        .bind(room.created_at) // $11
        .bind(room.ended_at) // $12
        .execute(&self.pool)
        .await;

        observe("insert_room", start, result)?;
        Ok(())
    }

    #[instrument(skip_all, name = "audon.repo.find_room", fields(room_id = %room_id))]
    async fn find_by_id(&self, room_id: &RoomId) -> Result<Option<Room>, AudonError> {
        let start = Instant::now();
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE room_id = $1");
        let result = sqlx::query(&sql)
            .bind(room_id.as_str())
            .fetch_optional(&self.pool)
            .await;

        observe("find_room", start, result)?
            .as_ref()
            .map(map_room_row)
            .transpose()
    }

    #[instrument(skip_all, name = "audon.repo.find_open_instant_rooms")]
    async fn find_open_instant_rooms(&self, host_audon_id: &str) -> Result<Vec<Room>, AudonError> {
        let start = Instant::now();
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms \
             WHERE host_audon_id = $1 AND ended_at IS NULL AND created_at = scheduled_at"
        );
        let result = sqlx::query(&sql)
            .bind(host_audon_id)
            .fetch_all(&self.pool)
            .await;

        observe("find_open_instant_rooms", start, result)?
            .iter()
            .map(map_room_row)
            .collect()
    }

    #[instrument(skip_all, name = "audon.repo.latest_hosted_by")]
    async fn latest_hosted_by(&self, host_audon_id: &str) -> Result<Option<Room>, AudonError> {
        let start = Instant::now();
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE host_audon_id = $1 \
             ORDER BY COALESCE(activated_at, created_at) DESC LIMIT 1"
        );
        let result = sqlx::query(&sql)
            .bind(host_audon_id)
            .fetch_optional(&self.pool)
            .await;

        observe("latest_hosted_by", start, result)?
            .as_ref()
            .map(map_room_row)
            .transpose()
    }

    #[instrument(skip_all, name = "audon.repo.delete_rooms", fields(count = room_ids.len()))]
    async fn delete_many(&self, room_ids: &[RoomId]) -> Result<u64, AudonError> {
        if room_ids.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();
        let ids: Vec<String> = room_ids.iter().map(|id| id.as_str().to_string()).collect();
        let result = sqlx::query("DELETE FROM rooms WHERE room_id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await;

        Ok(observe("delete_rooms", start, result)?.rows_affected())
    }

    #[instrument(skip_all, name = "audon.repo.update_room", fields(room_id = %room_id))]
    async fn update_details(
        &self,
        room_id: &RoomId,
        patch: &UpdateRoomRequest,
    ) -> Result<Option<Room>, AudonError> {
        let start = Instant::now();
        let sql = format!(
            "UPDATE rooms SET \
                title = COALESCE($2, title), \
                description = COALESCE($3, description), \
                restriction = COALESCE($4, restriction) \
             WHERE room_id = $1 \
             RETURNING {ROOM_COLUMNS}"
        );
        let result = sqlx::query(&sql)
            .bind(room_id.as_str()) // $1
            .bind(patch.title.as_deref()) // $2
            .bind(patch.description.as_deref()) // $3
            .bind(patch.restriction.map(Restriction::as_str)) // $4
            .fetch_optional(&self.pool)
            .await;

        observe("update_room", start, result)?
            .as_ref()
            .map(map_room_row)
            .transpose()
    }

    #[instrument(skip_all, name = "audon.repo.mark_activated", fields(room_id = %room_id))]
    async fn mark_activated(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), AudonError> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE rooms SET activated_at = $2 WHERE room_id = $1 AND activated_at IS NULL",
        )
        .bind(room_id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await;

        observe("mark_activated", start, result)?;
        Ok(())
    }

    #[instrument(skip_all, name = "audon.repo.set_ended", fields(room_id = %room_id))]
    async fn set_ended(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<bool, AudonError> {
        let start = Instant::now();
        let result =
            sqlx::query("UPDATE rooms SET ended_at = $2 WHERE room_id = $1 AND ended_at IS NULL")
                .bind(room_id.as_str())
                .bind(at)
                .execute(&self.pool)
                .await;

        Ok(observe("set_ended", start, result)?.rows_affected() > 0)
    }

    #[instrument(skip_all, name = "audon.repo.append_cohost", fields(room_id = %room_id))]
    async fn append_cohost(&self, room_id: &RoomId, user: &AudonUser) -> Result<bool, AudonError> {
        self.append_member("append_cohost", "cohosts", room_id, user)
            .await
    }

    #[instrument(skip_all, name = "audon.repo.append_kicked", fields(room_id = %room_id))]
    async fn append_kicked(&self, room_id: &RoomId, user: &AudonUser) -> Result<bool, AudonError> {
        self.append_member("append_kicked", "kicked", room_id, user)
            .await
    }
}

/// In-memory room repository for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MockRoomRepository {
        rooms: Mutex<HashMap<String, Room>>,
        activated: Mutex<HashMap<String, DateTime<Utc>>>,
        writes: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockRoomRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a room without counting a write.
        pub async fn seed(&self, room: Room) {
            self.rooms
                .lock()
                .await
                .insert(room.room_id.as_str().to_string(), room);
        }

        pub async fn get(&self, room_id: &RoomId) -> Option<Room> {
            self.rooms.lock().await.get(room_id.as_str()).cloned()
        }

        pub async fn room_count(&self) -> usize {
            self.rooms.lock().await.len()
        }

        /// Number of mutating calls that reached the store.
        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        /// Make every subsequent call fail with a database error.
        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), AudonError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AudonError::Database("mock store unavailable".to_string()));
            }
            Ok(())
        }

        fn write(&self) -> Result<(), AudonError> {
            self.check()?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl RoomRepository for MockRoomRepository {
        async fn ping(&self) -> Result<(), AudonError> {
            self.check()
        }

        async fn insert(&self, room: &Room) -> Result<(), AudonError> {
            self.write()?;
            let mut rooms = self.rooms.lock().await;
            if rooms.contains_key(room.room_id.as_str()) {
                return Err(AudonError::Database("duplicate room_id".to_string()));
            }
            rooms.insert(room.room_id.as_str().to_string(), room.clone());
            Ok(())
        }

        async fn find_by_id(&self, room_id: &RoomId) -> Result<Option<Room>, AudonError> {
            self.check()?;
            Ok(self.get(room_id).await)
        }

        async fn find_open_instant_rooms(
            &self,
            host_audon_id: &str,
        ) -> Result<Vec<Room>, AudonError> {
            self.check()?;
            Ok(self
                .rooms
                .lock()
                .await
                .values()
                .filter(|r| r.host.audon_id == host_audon_id && !r.has_ended() && r.is_instant())
                .cloned()
                .collect())
        }

        async fn latest_hosted_by(&self, host_audon_id: &str) -> Result<Option<Room>, AudonError> {
            self.check()?;
            let activated = self.activated.lock().await;
            Ok(self
                .rooms
                .lock()
                .await
                .values()
                .filter(|r| r.host.audon_id == host_audon_id)
                .max_by_key(|r| {
                    activated
                        .get(r.room_id.as_str())
                        .copied()
                        .unwrap_or(r.created_at)
                })
                .cloned())
        }

        async fn delete_many(&self, room_ids: &[RoomId]) -> Result<u64, AudonError> {
            self.write()?;
            let mut rooms = self.rooms.lock().await;
            let removed = room_ids
                .iter()
                .filter(|id| rooms.remove(id.as_str()).is_some())
                .count();
            Ok(removed as u64)
        }

        async fn update_details(
            &self,
            room_id: &RoomId,
            patch: &UpdateRoomRequest,
        ) -> Result<Option<Room>, AudonError> {
            self.write()?;
            let mut rooms = self.rooms.lock().await;
            Ok(rooms.get_mut(room_id.as_str()).map(|room| {
                patch.apply(room);
                room.clone()
            }))
        }

        async fn mark_activated(
            &self,
            room_id: &RoomId,
            at: DateTime<Utc>,
        ) -> Result<(), AudonError> {
            self.write()?;
            if self.rooms.lock().await.contains_key(room_id.as_str()) {
                self.activated
                    .lock()
                    .await
                    .entry(room_id.as_str().to_string())
                    .or_insert(at);
            }
            Ok(())
        }

        async fn set_ended(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<bool, AudonError> {
            self.write()?;
            let mut rooms = self.rooms.lock().await;
            match rooms.get_mut(room_id.as_str()) {
                Some(room) if room.ended_at.is_none() => {
                    room.ended_at = Some(at);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn append_cohost(
            &self,
            room_id: &RoomId,
            user: &AudonUser,
        ) -> Result<bool, AudonError> {
            self.write()?;
            let mut rooms = self.rooms.lock().await;
            match rooms.get_mut(room_id.as_str()) {
                Some(room) if !room.is_cohost(user) => {
                    room.co_hosts.push(user.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn append_kicked(
            &self,
            room_id: &RoomId,
            user: &AudonUser,
        ) -> Result<bool, AudonError> {
            self.write()?;
            let mut rooms = self.rooms.lock().await;
            match rooms.get_mut(room_id.as_str()) {
                Some(room) if !room.is_kicked(user) => {
                    room.kicked.push(user.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }
}
