use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;
use uuid::Uuid;

use herald_types::error::Error;
use herald_types::events::{FeedEvent, Record};
use herald_types::models::{Notification, NotificationKind};

use crate::{Database, Store, db_err, fmt_ts, now, parse_id, parse_notification_kind, parse_ts};

const PREVIEW_CHARS: usize = 120;

impl Store {
    /// Most recent notifications for `recipient`, newest first.
    pub async fn notifications_for(
        &self,
        recipient: Uuid,
        limit: usize,
    ) -> Result<Vec<Notification>, Error> {
        self.run(move |db| db.notifications_for(recipient, limit))
            .await
    }

    /// Mark one notification read. Already-read notifications come back
    /// unchanged without an event.
    pub async fn mark_notification_read(&self, id: Uuid) -> Result<Notification, Error> {
        self.run(move |db| db.mark_notification_read(id)).await
    }

    /// Mark everything unread for `recipient` as read; returns the rows
    /// that actually flipped.
    pub async fn mark_all_notifications_read(
        &self,
        recipient: Uuid,
    ) -> Result<Vec<Notification>, Error> {
        self.run(move |db| db.mark_all_notifications_read(recipient))
            .await
    }
}

impl Database {
    fn notifications_for(&self, recipient: Uuid, limit: usize) -> Result<Vec<Notification>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NOTIFICATION_COLS} FROM notifications
                      WHERE recipient_id = ?1
                      ORDER BY created_at DESC, id DESC
                      LIMIT ?2"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    params![recipient.to_string(), limit as i64],
                    notification_from_row,
                )
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    fn mark_notification_read(&self, id: Uuid) -> Result<Notification, Error> {
        self.with_conn(|conn| {
            let n = conn
                .execute(
                    "UPDATE notifications SET read = 1 WHERE id = ?1 AND read = 0",
                    [id.to_string()],
                )
                .map_err(db_err)?;

            let notification = query_notification(conn, id)?.ok_or(Error::NotFound)?;
            if n > 0 {
                self.publish(FeedEvent::updated(Record::Notification(notification.clone())));
            }
            Ok(notification)
        })
    }

    fn mark_all_notifications_read(&self, recipient: Uuid) -> Result<Vec<Notification>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NOTIFICATION_COLS} FROM notifications
                      WHERE recipient_id = ?1 AND read = 0
                      ORDER BY created_at, id"
                ))
                .map_err(db_err)?;
            let unread = stmt
                .query_map([recipient.to_string()], notification_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;

            if unread.is_empty() {
                return Ok(Vec::new());
            }

            conn.execute(
                "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
                [recipient.to_string()],
            )
            .map_err(db_err)?;

            let flipped: Vec<Notification> = unread
                .into_iter()
                .map(|n| Notification { read: true, ..n })
                .collect();
            for notification in &flipped {
                self.publish(FeedEvent::updated(Record::Notification(notification.clone())));
            }
            Ok(flipped)
        })
    }
}

pub(crate) fn new_notification(
    recipient: Uuid,
    kind: NotificationKind,
    title: String,
    body: Option<String>,
    data: Option<serde_json::Value>,
) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        recipient_id: recipient,
        kind,
        title,
        body,
        data,
        read: false,
        created_at: now(),
    }
}

/// Insert inside the caller's write (the caller also publishes the event).
pub(crate) fn insert_notification(conn: &Connection, n: &Notification) -> Result<(), Error> {
    let data = n
        .data
        .as_ref()
        .map(|value| serde_json::to_string(value))
        .transpose()
        .map_err(|e| Error::Io(format!("notification payload: {e}")))?;
    conn.execute(
        "INSERT INTO notifications (id, recipient_id, kind, title, body, data, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            n.id.to_string(),
            n.recipient_id.to_string(),
            n.kind.as_str(),
            n.title,
            n.body,
            data,
            fmt_ts(n.created_at),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// First `PREVIEW_CHARS` characters of a message body, elided when longer.
pub(crate) fn preview(content: &str) -> String {
    let mut out: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

pub(crate) const NOTIFICATION_COLS: &str =
    "id, recipient_id, kind, title, body, data, read, created_at";

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let data = row.get::<_, Option<String>>(5)?.and_then(|raw| {
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%err, "corrupt notification payload in row");
                None
            }
        }
    });
    Ok(Notification {
        id: parse_id(&row.get::<_, String>(0)?),
        recipient_id: parse_id(&row.get::<_, String>(1)?),
        kind: parse_notification_kind(&row.get::<_, String>(2)?),
        title: row.get(3)?,
        body: row.get(4)?,
        data,
        read: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

fn query_notification(conn: &Connection, id: Uuid) -> Result<Option<Notification>, Error> {
    conn.query_row(
        &format!("SELECT {NOTIFICATION_COLS} FROM notifications WHERE id = ?1"),
        [id.to_string()],
        notification_from_row,
    )
    .optional()
    .map_err(db_err)
}
