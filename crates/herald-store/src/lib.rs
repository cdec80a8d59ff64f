//! Backing store for the sync layer: account registry, conversations,
//! reactions, notifications, and the bulletin control lock, all on SQLite.
//!
//! Every mutating operation commits first and then publishes exactly one
//! [`FeedEvent`](herald_types::events::FeedEvent) per written record, still
//! under the connection lock so each topic's events arrive in commit order.
//! Reads return plain snapshots; clients fold feed events into them.

pub mod media;
pub mod migrations;

mod contacts;
mod control;
mod messages;
mod notifications;
mod profiles;
mod reactions;
mod rooms;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use herald_feed::{FeedHub, FeedSubscription};
use herald_types::error::Error;
use herald_types::events::{FeedEvent, Topic};
use herald_types::models::{MemberRole, MessageKind, NotificationKind, Presence, RoomKind};

pub use media::MediaStore;
pub use profiles::ProfileUpdate;

/// Seeded room everyone belongs to.
pub const GENERAL_ROOM_ID: Uuid = Uuid::from_u128(1);
/// Seeded single-writer announcements room, guarded by the control lock.
pub const BULLETIN_ROOM_ID: Uuid = Uuid::from_u128(2);
/// Seeded identity that owns the built-in rooms.
pub const SYSTEM_USER_ID: Uuid = Uuid::nil();

pub(crate) const CONTROL_ROW_ID: Uuid = Uuid::from_u128(3);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    /// Per-topic feed buffer; slow subscribers past this lag and resync.
    pub feed_capacity: usize,
    /// Shared secret guarding the bulletin control lock.
    pub bulletin_secret: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("herald.db"),
            media_dir: PathBuf::from("media"),
            feed_capacity: herald_feed::DEFAULT_CAPACITY,
            bulletin_secret: "change-me".into(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("HERALD_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            media_dir: std::env::var("HERALD_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_dir),
            feed_capacity: std::env::var("HERALD_FEED_CAPACITY")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.feed_capacity),
            bulletin_secret: std::env::var("HERALD_BULLETIN_SECRET")
                .unwrap_or(defaults.bulletin_secret),
        }
    }
}

/// Handle to the store. Cheap to clone; all clones share one connection
/// and one feed hub.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    media: Arc<MediaStore>,
}

impl Store {
    pub fn open(config: StoreConfig) -> anyhow::Result<Self> {
        let conn = Connection::open(&config.db_path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn, &config.bulletin_secret)?;
        info!("store opened at {}", config.db_path.display());

        Ok(Self::assemble(conn, config))
    }

    /// In-memory store, used by tests. Same schema and seeds as [`open`].
    ///
    /// [`open`]: Store::open
    pub fn open_in_memory(config: StoreConfig) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn, &config.bulletin_secret)?;
        Ok(Self::assemble(conn, config))
    }

    fn assemble(conn: Connection, config: StoreConfig) -> Self {
        let feed = FeedHub::new(config.feed_capacity);
        Self {
            db: Arc::new(Database {
                conn: Mutex::new(conn),
                feed,
            }),
            media: Arc::new(MediaStore::new(config.media_dir)),
        }
    }

    pub fn feed(&self) -> &FeedHub {
        &self.db.feed
    }

    pub fn subscribe(&self, topic: Topic) -> FeedSubscription {
        self.db.feed.subscribe(topic)
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    /// Run database work on the blocking pool.
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Database) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || f(&db)).await {
            Ok(result) => result,
            Err(err) => Err(Error::Io(format!("store task failed: {err}"))),
        }
    }
}

/// The synchronous core: one SQLite connection behind a mutex, plus the
/// feed hub that write paths publish into before releasing the lock.
pub(crate) struct Database {
    conn: Mutex<Connection>,
    feed: FeedHub,
}

impl Database {
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Connection) -> Result<T, Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Io(format!("db lock poisoned: {e}")))?;
        f(&conn)
    }

    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Connection) -> Result<T, Error>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Io(format!("db lock poisoned: {e}")))?;
        f(&mut conn)
    }

    pub(crate) fn publish(&self, event: FeedEvent) {
        self.feed.publish(event);
    }
}

// -- Row plumbing shared by the query modules --

pub(crate) fn db_err(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
        rusqlite::Error::SqliteFailure(code, message)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            match code.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Error::AlreadyExists,
                _ => Error::invalid(
                    message.unwrap_or_else(|| "constraint violation".to_string()),
                ),
            }
        }
        other => Error::Io(other.to_string()),
    }
}

/// Commit timestamps are stored at microsecond precision; truncate up front
/// so a record round-trips identically through the TEXT column.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(err) => {
            warn!(raw, %err, "corrupt timestamp in row");
            DateTime::<Utc>::MIN_UTC
        }
    }
}

pub(crate) fn parse_id(raw: &str) -> Uuid {
    match raw.parse() {
        Ok(id) => id,
        Err(err) => {
            warn!(raw, %err, "corrupt id in row");
            Uuid::nil()
        }
    }
}

pub(crate) fn parse_presence(raw: &str) -> Presence {
    Presence::parse(raw).unwrap_or_else(|| {
        warn!(raw, "unknown presence in row");
        Presence::Offline
    })
}

pub(crate) fn parse_role(raw: &str) -> MemberRole {
    MemberRole::parse(raw).unwrap_or_else(|| {
        warn!(raw, "unknown member role in row");
        MemberRole::Member
    })
}

pub(crate) fn parse_kind(raw: &str) -> MessageKind {
    MessageKind::parse(raw).unwrap_or_else(|| {
        warn!(raw, "unknown message kind in row");
        MessageKind::Text
    })
}

pub(crate) fn parse_room_kind(raw: &str) -> RoomKind {
    RoomKind::parse(raw).unwrap_or_else(|| {
        warn!(raw, "unknown room kind in row");
        RoomKind::Standard
    })
}

pub(crate) fn parse_notification_kind(raw: &str) -> NotificationKind {
    NotificationKind::parse(raw).unwrap_or_else(|| {
        warn!(raw, "unknown notification kind in row");
        NotificationKind::System
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) const SECRET: &str = "hunt2";

    pub(crate) fn memory_store() -> Store {
        Store::open_in_memory(StoreConfig {
            bulletin_secret: SECRET.into(),
            ..StoreConfig::default()
        })
        .unwrap()
    }
}
