use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use herald_types::error::Error;
use herald_types::events::{FeedEvent, Record};
use herald_types::models::{NotificationKind, Reaction};

use crate::messages::query_message;
use crate::notifications::{insert_notification, new_notification, preview};
use crate::profiles::display_name_of;
use crate::{Database, Store, db_err, fmt_ts, now, parse_id, parse_ts};

impl Store {
    /// Attach `emoji` to a message. The same user reacting with the same
    /// emoji twice is `AlreadyExists`; the message author gets notified
    /// unless they reacted themselves.
    pub async fn add_reaction(
        &self,
        message: Uuid,
        user: Uuid,
        emoji: &str,
    ) -> Result<Reaction, Error> {
        let emoji = emoji.trim().to_owned();
        if emoji.is_empty() {
            return Err(Error::invalid("emoji must not be empty"));
        }
        self.run(move |db| db.add_reaction(message, user, &emoji))
            .await
    }

    /// Remove `user`'s `emoji` from a message. `NotFound` when absent.
    pub async fn remove_reaction(
        &self,
        message: Uuid,
        user: Uuid,
        emoji: &str,
    ) -> Result<Reaction, Error> {
        let emoji = emoji.trim().to_owned();
        self.run(move |db| db.remove_reaction(message, user, &emoji))
            .await
    }

    /// All reactions on a message, oldest first.
    pub async fn reactions_for(&self, message: Uuid) -> Result<Vec<Reaction>, Error> {
        self.run(move |db| db.reactions_for(message)).await
    }
}

impl Database {
    fn add_reaction(&self, message: Uuid, user: Uuid, emoji: &str) -> Result<Reaction, Error> {
        self.with_conn_mut(|conn| {
            let Some(target) = query_message(conn, message)? else {
                return Err(Error::NotFound);
            };
            let Some(reactor_name) = display_name_of(conn, user)? else {
                return Err(Error::NotFound);
            };

            let reaction = Reaction {
                id: Uuid::new_v4(),
                message_id: message,
                user_id: user,
                emoji: emoji.to_owned(),
                created_at: now(),
            };

            let notification = (target.sender_id != user).then(|| {
                new_notification(
                    target.sender_id,
                    NotificationKind::Reaction,
                    format!("{reactor_name} reacted {emoji}"),
                    Some(preview(&target.content)),
                    Some(serde_json::json!({
                        "message_id": message,
                        "reaction_id": reaction.id,
                        "emoji": emoji,
                    })),
                )
            });

            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reaction.id.to_string(),
                    reaction.message_id.to_string(),
                    reaction.user_id.to_string(),
                    reaction.emoji,
                    fmt_ts(reaction.created_at),
                ],
            )
            .map_err(db_err)?;
            if let Some(n) = &notification {
                insert_notification(&tx, n)?;
            }
            tx.commit().map_err(db_err)?;

            self.publish(FeedEvent::created(Record::Reaction(reaction.clone())));
            if let Some(n) = notification {
                self.publish(FeedEvent::created(Record::Notification(n)));
            }
            Ok(reaction)
        })
    }

    fn remove_reaction(&self, message: Uuid, user: Uuid, emoji: &str) -> Result<Reaction, Error> {
        self.with_conn(|conn| {
            let Some(existing) = query_reaction_by_triple(conn, message, user, emoji)? else {
                return Err(Error::NotFound);
            };

            conn.execute(
                "DELETE FROM reactions WHERE id = ?1",
                [existing.id.to_string()],
            )
            .map_err(db_err)?;

            // Deleted events carry the removed record.
            self.publish(FeedEvent::deleted(Record::Reaction(existing.clone())));
            Ok(existing)
        })
    }

    fn reactions_for(&self, message: Uuid) -> Result<Vec<Reaction>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, message_id, user_id, emoji, created_at
                       FROM reactions
                      WHERE message_id = ?1
                      ORDER BY created_at, id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([message.to_string()], reaction_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }
}

fn reaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: parse_id(&row.get::<_, String>(0)?),
        message_id: parse_id(&row.get::<_, String>(1)?),
        user_id: parse_id(&row.get::<_, String>(2)?),
        emoji: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?),
    })
}

fn query_reaction_by_triple(
    conn: &Connection,
    message: Uuid,
    user: Uuid,
    emoji: &str,
) -> Result<Option<Reaction>, Error> {
    conn.query_row(
        "SELECT id, message_id, user_id, emoji, created_at
           FROM reactions
          WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
        params![message.to_string(), user.to_string(), emoji],
        reaction_from_row,
    )
    .optional()
    .map_err(db_err)
}
