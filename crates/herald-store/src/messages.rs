use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use herald_types::error::Error;
use herald_types::events::{FeedEvent, Record};
use herald_types::models::{Destination, Message, MessageKind, NotificationKind, RoomKind};

use crate::control::query_control_row;
use crate::notifications::{insert_notification, new_notification, preview};
use crate::profiles::{display_name_of, profile_exists};
use crate::rooms::query_room;
use crate::{Database, Store, db_err, fmt_ts, now, parse_id, parse_kind, parse_ts};

impl Store {
    /// Commit a direct message and notify the receiver.
    pub async fn append_direct(
        &self,
        sender: Uuid,
        receiver: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, Error> {
        let content = validated_content(content)?;
        self.run(move |db| db.append_direct(sender, receiver, &content, kind))
            .await
    }

    /// Commit a room message. Posting into the bulletin room requires the
    /// control lock to be free or held by `sender`.
    pub async fn append_room(
        &self,
        sender: Uuid,
        room: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, Error> {
        let content = validated_content(content)?;
        self.run(move |db| db.append_room(sender, room, &content, kind))
            .await
    }

    /// Both directions of the direct conversation between `a` and `b`,
    /// oldest first.
    pub async fn messages_with(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>, Error> {
        self.run(move |db| db.messages_with(a, b)).await
    }

    pub async fn messages_in(&self, room: Uuid) -> Result<Vec<Message>, Error> {
        self.run(move |db| db.messages_in(room)).await
    }

    /// Set the read marker once. Re-marking an already-read message returns
    /// it unchanged without emitting an event.
    pub async fn mark_read(&self, message: Uuid) -> Result<Message, Error> {
        self.run(move |db| db.mark_read(message)).await
    }

    /// For each peer `owner` has exchanged direct messages with, the time
    /// of the most recent one.
    pub async fn latest_direct_activity(
        &self,
        owner: Uuid,
    ) -> Result<Vec<(Uuid, DateTime<Utc>)>, Error> {
        self.run(move |db| db.latest_direct_activity(owner)).await
    }
}

fn validated_content(content: &str) -> Result<String, Error> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("message content must not be empty"));
    }
    Ok(trimmed.to_owned())
}

impl Database {
    fn append_direct(
        &self,
        sender: Uuid,
        receiver: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, Error> {
        self.with_conn_mut(|conn| {
            let Some(sender_name) = display_name_of(conn, sender)? else {
                return Err(Error::NotFound);
            };
            if !profile_exists(conn, receiver)? {
                return Err(Error::NotFound);
            }

            let message = Message {
                id: Uuid::new_v4(),
                sender_id: sender,
                destination: Destination::Direct(receiver),
                content: content.to_owned(),
                kind,
                created_at: now(),
                read_at: None,
            };

            let notification = (receiver != sender).then(|| {
                let body = match kind {
                    MessageKind::Text => preview(content),
                    MessageKind::Image => "📷 Image".to_owned(),
                };
                new_notification(
                    receiver,
                    NotificationKind::Message,
                    format!("New message from {sender_name}"),
                    Some(body),
                    Some(serde_json::json!({
                        "message_id": message.id,
                        "sender_id": sender,
                    })),
                )
            });

            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    sender.to_string(),
                    receiver.to_string(),
                    message.content,
                    kind.as_str(),
                    fmt_ts(message.created_at),
                ],
            )
            .map_err(db_err)?;
            if let Some(n) = &notification {
                insert_notification(&tx, n)?;
            }
            tx.commit().map_err(db_err)?;

            debug!(message = %message.id, "direct message committed");
            self.publish(FeedEvent::created(Record::Message(message.clone())));
            if let Some(n) = notification {
                self.publish(FeedEvent::created(Record::Notification(n)));
            }
            Ok(message)
        })
    }

    fn append_room(
        &self,
        sender: Uuid,
        room: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, Error> {
        self.with_conn(|conn| {
            let Some(room_row) = query_room(conn, room)? else {
                return Err(Error::NotFound);
            };
            if !profile_exists(conn, sender)? {
                return Err(Error::NotFound);
            }
            if room_row.kind == RoomKind::Bulletin {
                let Some((lock, _)) = query_control_row(conn)? else {
                    return Err(Error::NotFound);
                };
                if lock.held_by_other(sender) {
                    return Err(Error::Unauthorized);
                }
            }

            let message = Message {
                id: Uuid::new_v4(),
                sender_id: sender,
                destination: Destination::Room(room),
                content: content.to_owned(),
                kind,
                created_at: now(),
                read_at: None,
            };
            conn.execute(
                "INSERT INTO messages (id, sender_id, room_id, content, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    sender.to_string(),
                    room.to_string(),
                    message.content,
                    kind.as_str(),
                    fmt_ts(message.created_at),
                ],
            )
            .map_err(db_err)?;

            debug!(message = %message.id, room = %room, "room message committed");
            self.publish(FeedEvent::created(Record::Message(message.clone())));
            Ok(message)
        })
    }

    fn messages_with(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                      WHERE room_id IS NULL
                        AND ((sender_id = ?1 AND receiver_id = ?2)
                          OR (sender_id = ?2 AND receiver_id = ?1))
                      ORDER BY created_at, id"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![a.to_string(), b.to_string()], message_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    fn messages_in(&self, room: Uuid) -> Result<Vec<Message>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                      WHERE room_id = ?1
                      ORDER BY created_at, id"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map([room.to_string()], message_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    fn mark_read(&self, id: Uuid) -> Result<Message, Error> {
        self.with_conn(|conn| {
            let ts = now();
            let n = conn
                .execute(
                    "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
                    params![id.to_string(), fmt_ts(ts)],
                )
                .map_err(db_err)?;

            let message = query_message(conn, id)?.ok_or(Error::NotFound)?;
            if n > 0 {
                self.publish(FeedEvent::updated(Record::Message(message.clone())));
            }
            Ok(message)
        })
    }

    fn latest_direct_activity(&self, owner: Uuid) -> Result<Vec<(Uuid, DateTime<Utc>)>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS peer,
                            MAX(created_at)
                       FROM messages
                      WHERE room_id IS NULL AND (sender_id = ?1 OR receiver_id = ?1)
                      GROUP BY peer",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([owner.to_string()], |row| {
                    Ok((
                        parse_id(&row.get::<_, String>(0)?),
                        parse_ts(&row.get::<_, String>(1)?),
                    ))
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }
}

pub(crate) const MESSAGE_COLS: &str =
    "id, sender_id, receiver_id, room_id, content, kind, created_at, read_at";

pub(crate) fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let receiver: Option<String> = row.get(2)?;
    let room: Option<String> = row.get(3)?;
    let destination = match (&receiver, &room) {
        (Some(peer), None) => Destination::Direct(parse_id(peer)),
        (None, Some(room)) => Destination::Room(parse_id(room)),
        // The CHECK constraint forbids this shape.
        _ => Destination::Direct(Uuid::nil()),
    };
    Ok(Message {
        id: parse_id(&row.get::<_, String>(0)?),
        sender_id: parse_id(&row.get::<_, String>(1)?),
        destination,
        content: row.get(4)?,
        kind: parse_kind(&row.get::<_, String>(5)?),
        created_at: parse_ts(&row.get::<_, String>(6)?),
        read_at: row.get::<_, Option<String>>(7)?.map(|raw| parse_ts(&raw)),
    })
}

pub(crate) fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>, Error> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
        [id.to_string()],
        message_from_row,
    )
    .optional()
    .map_err(db_err)
}
