//! Postgres repository integration tests.
//!
//! The set-once and append-only rules on rooms live in SQL. These tests run
//! that SQL against an isolated database per test via `#[sqlx::test]`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use audon_service::models::{AudonUser, Restriction, UpdateRoomRequest};
use audon_service::repositories::{
    PgRoomRepository, PgUserRepository, RoomRepository, UserRepository,
};
use audon_test_utils::fixtures::{room, room_scheduled, user};
use chrono::{Duration, Utc};
use sqlx::PgPool;

async fn insert_user(pool: &PgPool, user: &AudonUser) -> Result<(), anyhow::Error> {
    sqlx::query(
        "INSERT INTO users (audon_id, remote_id, remote_url, webfinger, avatar) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&user.audon_id)
    .bind(&user.remote_id)
    .bind(&user.remote_url)
    .bind(&user.webfinger)
    .bind(user.avatar_file.as_deref())
    .execute(pool)
    .await?;
    Ok(())
}

/// A co-host known only by federated identity.
fn pending(user: &AudonUser) -> AudonUser {
    AudonUser {
        audon_id: String::new(),
        avatar_file: None,
        ..user.clone()
    }
}

// ============================================================================
// Rooms
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_insert_and_find_room(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let alice = user("alice");
    let mut created = room(&alice, Restriction::Mutual);
    created.description = "Noodles".to_string();
    created.advertise = Some("ja".to_string());
    repo.insert(&created).await?;

    let stored = repo
        .find_by_id(&created.room_id)
        .await?
        .expect("Room should exist after insert");

    assert_eq!(stored.room_id, created.room_id);
    assert_eq!(stored.title, "Udon talk");
    assert_eq!(stored.description, "Noodles");
    assert_eq!(stored.host.audon_id, alice.audon_id);
    assert_eq!(stored.restriction, Restriction::Mutual);
    assert_eq!(stored.advertise.as_deref(), Some("ja"));
    assert!(stored.co_hosts.is_empty());
    assert!(stored.kicked.is_empty());
    assert!(stored.is_instant());
    assert!(!stored.has_ended());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_ended_at_is_set_once(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let created = room(&user("alice"), Restriction::Everyone);
    repo.insert(&created).await?;

    assert!(repo.set_ended(&created.room_id, Utc::now()).await?);
    let first = repo
        .find_by_id(&created.room_id)
        .await?
        .and_then(|r| r.ended_at)
        .expect("ended_at should be set");

    assert!(
        !repo
            .set_ended(&created.room_id, Utc::now() + Duration::minutes(5))
            .await?
    );
    let second = repo
        .find_by_id(&created.room_id)
        .await?
        .and_then(|r| r.ended_at)
        .expect("ended_at should still be set");
    assert_eq!(first, second);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_set_ended_on_missing_room(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let missing = room(&user("alice"), Restriction::Everyone);

    assert!(!repo.set_ended(&missing.room_id, Utc::now()).await?);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_append_cohost_rejects_same_audon_id(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let created = room(&user("alice"), Restriction::Everyone);
    repo.insert(&created).await?;
    let bob = user("bob");

    assert!(repo.append_cohost(&created.room_id, &bob).await?);

    // Same audon id, different remote identity.
    let moved = AudonUser {
        remote_id: "remote-elsewhere".to_string(),
        ..bob.clone()
    };
    assert!(!repo.append_cohost(&created.room_id, &moved).await?);

    let stored = repo.find_by_id(&created.room_id).await?.expect("room");
    assert_eq!(stored.co_hosts.len(), 1);
    assert_eq!(stored.co_hosts[0].audon_id, bob.audon_id);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_append_cohost_rejects_same_remote_identity(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let created = room(&user("alice"), Restriction::Everyone);
    repo.insert(&created).await?;
    let bob = user("bob");

    assert!(repo.append_cohost(&created.room_id, &pending(&bob)).await?);
    assert!(!repo.append_cohost(&created.room_id, &bob).await?);
    assert!(repo.append_cohost(&created.room_id, &user("carol")).await?);

    let stored = repo.find_by_id(&created.room_id).await?.expect("room");
    assert_eq!(stored.co_hosts.len(), 2);
    assert!(stored.is_cohost(&bob));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_append_kicked_is_append_only(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let created = room(&user("alice"), Restriction::Everyone);
    repo.insert(&created).await?;
    let bob = user("bob");

    assert!(repo.append_kicked(&created.room_id, &bob).await?);
    assert!(!repo.append_kicked(&created.room_id, &bob).await?);
    assert!(!repo.append_kicked(&created.room_id, &pending(&bob)).await?);

    let stored = repo.find_by_id(&created.room_id).await?.expect("room");
    assert_eq!(stored.kicked.len(), 1);
    assert!(stored.is_kicked(&bob));
    assert!(stored.co_hosts.is_empty());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_open_instant_room_selection(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let alice = user("alice");

    let instant = room(&alice, Restriction::Everyone);
    repo.insert(&instant).await?;

    let mut scheduled = room_scheduled(
        &alice,
        Restriction::Everyone,
        Utc::now() + Duration::hours(1),
    );
    scheduled.created_at = Utc::now();
    repo.insert(&scheduled).await?;

    let ended = room(&alice, Restriction::Everyone);
    repo.insert(&ended).await?;
    repo.set_ended(&ended.room_id, Utc::now()).await?;

    let foreign = room(&user("bob"), Restriction::Everyone);
    repo.insert(&foreign).await?;

    let found = repo.find_open_instant_rooms(&alice.audon_id).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].room_id, instant.room_id);

    // Going live does not turn an instant room into a scheduled one.
    repo.mark_activated(&instant.room_id, Utc::now()).await?;
    let found = repo.find_open_instant_rooms(&alice.audon_id).await?;
    assert_eq!(found.len(), 1);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_latest_hosted_prefers_activation(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let alice = user("alice");

    let older = room_scheduled(&alice, Restriction::Everyone, Utc::now() - Duration::hours(2));
    repo.insert(&older).await?;
    let newer = room_scheduled(&alice, Restriction::Everyone, Utc::now() - Duration::hours(1));
    repo.insert(&newer).await?;

    let latest = repo.latest_hosted_by(&alice.audon_id).await?.expect("room");
    assert_eq!(latest.room_id, newer.room_id);

    repo.mark_activated(&older.room_id, Utc::now()).await?;
    let latest = repo.latest_hosted_by(&alice.audon_id).await?.expect("room");
    assert_eq!(latest.room_id, older.room_id);

    assert!(repo.latest_hosted_by("id-nobody").await?.is_none());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_update_details_keeps_unset_fields(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let mut created = room(&user("alice"), Restriction::Follower);
    created.description = "Noodles".to_string();
    repo.insert(&created).await?;

    let patch = UpdateRoomRequest {
        title: Some("Soba talk".to_string()),
        ..UpdateRoomRequest::default()
    };
    let updated = repo
        .update_details(&created.room_id, &patch)
        .await?
        .expect("room");

    assert_eq!(updated.title, "Soba talk");
    assert_eq!(updated.description, "Noodles");
    assert_eq!(updated.restriction, Restriction::Follower);

    let missing = room(&user("alice"), Restriction::Everyone);
    assert!(repo.update_details(&missing.room_id, &patch).await?.is_none());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_delete_many_counts_removed(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let alice = user("alice");
    let first = room(&alice, Restriction::Everyone);
    let second = room(&alice, Restriction::Everyone);
    let missing = room(&alice, Restriction::Everyone);
    repo.insert(&first).await?;
    repo.insert(&second).await?;

    let deleted = repo
        .delete_many(&[
            first.room_id.clone(),
            second.room_id.clone(),
            missing.room_id.clone(),
        ])
        .await?;

    assert_eq!(deleted, 2);
    assert!(repo.find_by_id(&first.room_id).await?.is_none());
    assert_eq!(repo.delete_many(&[]).await?, 0);

    Ok(())
}

// ============================================================================
// Users
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_user_lookups(pool: PgPool) -> Result<(), anyhow::Error> {
    let alice = user("alice");
    insert_user(&pool, &alice).await?;
    let repo = PgUserRepository::new(pool);

    let by_id = repo.find_by_id(&alice.audon_id).await?.expect("by id");
    assert_eq!(by_id.webfinger, alice.webfinger);
    assert_eq!(by_id.avatar_file, alice.avatar_file);

    let by_remote = repo
        .find_by_remote(&alice.remote_id, &alice.remote_url)
        .await?
        .expect("by remote");
    assert_eq!(by_remote.audon_id, alice.audon_id);
    assert!(repo
        .find_by_remote(&alice.remote_id, "https://other.example/@alice")
        .await?
        .is_none());

    let by_handle = repo
        .find_by_webfinger(&alice.webfinger)
        .await?
        .expect("by webfinger");
    assert_eq!(by_handle.audon_id, alice.audon_id);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_clear_avatar_once(pool: PgPool) -> Result<(), anyhow::Error> {
    let alice = user("alice");
    insert_user(&pool, &alice).await?;
    let repo = PgUserRepository::new(pool);

    assert!(repo.clear_avatar(&alice.audon_id).await?);
    assert!(!repo.clear_avatar(&alice.audon_id).await?);

    let stored = repo.find_by_id(&alice.audon_id).await?.expect("user");
    assert_eq!(stored.avatar_file, None);
    assert!(!repo.clear_avatar("id-nobody").await?);

    Ok(())
}
