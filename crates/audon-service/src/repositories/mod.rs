//! Repository layer for the Audon service.
//!
//! Durable access follows the Handler -> Service -> Repository architecture.
//! Each repository is an async trait with a PostgreSQL implementation and an
//! in-memory implementation under `mock` for tests.

pub mod rooms;
pub mod users;

pub use rooms::{PgRoomRepository, RoomRepository};
pub use users::{PgUserRepository, UserRepository};
