use anyhow::Result;
use rusqlite::{Connection, params};
use tracing::info;

use crate::{BULLETIN_ROOM_ID, CONTROL_ROW_ID, GENERAL_ROOM_ID, SYSTEM_USER_ID, fmt_ts, now};

pub fn run(conn: &Connection, bulletin_secret: &str) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE COLLATE NOCASE,
            display_name    TEXT NOT NULL,
            avatar          TEXT NOT NULL,
            presence        TEXT NOT NULL,
            password        TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contacts (
            id          TEXT PRIMARY KEY,
            owner_id    TEXT NOT NULL REFERENCES profiles(id),
            peer_id     TEXT NOT NULL REFERENCES profiles(id),
            created_at  TEXT NOT NULL,
            UNIQUE(owner_id, peer_id)
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_owner
            ON contacts(owner_id);

        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            description TEXT,
            kind        TEXT NOT NULL DEFAULT 'standard',
            created_by  TEXT NOT NULL REFERENCES profiles(id),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        -- At most one general and one bulletin room
        CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_singleton
            ON rooms(kind) WHERE kind IN ('general', 'bulletin');

        CREATE TABLE IF NOT EXISTS room_members (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            role        TEXT NOT NULL DEFAULT 'member',
            created_at  TEXT NOT NULL,
            UNIQUE(room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON room_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES profiles(id),
            receiver_id TEXT REFERENCES profiles(id),
            room_id     TEXT REFERENCES rooms(id),
            content     TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            created_at  TEXT NOT NULL,
            read_at     TEXT,
            CHECK ((receiver_id IS NULL) <> (room_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_direct
            ON messages(sender_id, receiver_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id              TEXT PRIMARY KEY,
            recipient_id    TEXT NOT NULL REFERENCES profiles(id),
            kind            TEXT NOT NULL,
            title           TEXT NOT NULL,
            body            TEXT,
            data            TEXT,
            read            INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, created_at);

        CREATE TABLE IF NOT EXISTS bulletin_control (
            id          TEXT PRIMARY KEY,
            holder_id   TEXT REFERENCES profiles(id),
            acquired_at TEXT,
            secret      TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;

    seed(conn, bulletin_secret)?;
    info!("store migrations complete");
    Ok(())
}

/// Built-in rows: the system identity, the two special rooms, and the
/// control-lock singleton. `INSERT OR IGNORE` keeps reopening idempotent;
/// the configured secret only applies on first open.
fn seed(conn: &Connection, bulletin_secret: &str) -> Result<()> {
    let ts = fmt_ts(now());

    conn.execute(
        "INSERT OR IGNORE INTO profiles
            (id, username, display_name, avatar, presence, password, created_at, updated_at)
         VALUES (?1, 'system', 'Herald', '📣', 'offline', '', ?2, ?2)",
        params![SYSTEM_USER_ID.to_string(), ts],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO rooms
            (id, name, description, kind, created_by, created_at, updated_at)
         VALUES (?1, 'general', 'Open to everyone', 'general', ?2, ?3, ?3)",
        params![GENERAL_ROOM_ID.to_string(), SYSTEM_USER_ID.to_string(), ts],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO rooms
            (id, name, description, kind, created_by, created_at, updated_at)
         VALUES (?1, 'updates', 'Official announcements', 'bulletin', ?2, ?3, ?3)",
        params![BULLETIN_ROOM_ID.to_string(), SYSTEM_USER_ID.to_string(), ts],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO bulletin_control (id, holder_id, acquired_at, secret, active)
         VALUES (?1, NULL, NULL, ?2, 0)",
        params![CONTROL_ROW_ID.to_string(), bulletin_secret],
    )?;

    Ok(())
}
