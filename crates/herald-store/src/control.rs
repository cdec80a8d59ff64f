use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use herald_types::error::Error;
use herald_types::events::{FeedEvent, Record};
use herald_types::models::ControlLock;

use crate::{CONTROL_ROW_ID, Database, Store, db_err, fmt_ts, now, parse_id, parse_ts};

impl Store {
    pub async fn control_state(&self) -> Result<ControlLock, Error> {
        self.run(move |db| db.control_state()).await
    }

    /// Take the bulletin lock. `Unauthorized` on a wrong password,
    /// `Conflict` while someone else holds it. Reacquiring while already
    /// the holder refreshes `acquired_at`.
    pub async fn acquire_control(&self, user: Uuid, password: &str) -> Result<ControlLock, Error> {
        let password = password.to_owned();
        self.run(move |db| db.acquire_control(user, &password)).await
    }

    /// Release the bulletin lock; only the current holder may.
    pub async fn forfeit_control(&self, user: Uuid) -> Result<ControlLock, Error> {
        self.run(move |db| db.forfeit_control(user)).await
    }
}

impl Database {
    fn control_state(&self) -> Result<ControlLock, Error> {
        self.with_conn(|conn| {
            query_control_row(conn)?
                .map(|(lock, _)| lock)
                .ok_or(Error::NotFound)
        })
    }

    // Check and write happen under the connection lock, so acquisition is
    // atomic: of two concurrent callers exactly one wins.
    fn acquire_control(&self, user: Uuid, password: &str) -> Result<ControlLock, Error> {
        self.with_conn(|conn| {
            let Some((lock, secret)) = query_control_row(conn)? else {
                return Err(Error::NotFound);
            };
            if password != secret {
                return Err(Error::Unauthorized);
            }
            if lock.held_by_other(user) {
                return Err(Error::Conflict);
            }

            let next = ControlLock {
                holder_id: Some(user),
                acquired_at: Some(now()),
                active: true,
            };
            conn.execute(
                "UPDATE bulletin_control
                    SET holder_id = ?2, acquired_at = ?3, active = 1
                  WHERE id = ?1",
                params![
                    CONTROL_ROW_ID.to_string(),
                    user.to_string(),
                    next.acquired_at.map(fmt_ts),
                ],
            )
            .map_err(db_err)?;

            info!(holder = %user, "bulletin control acquired");
            self.publish(FeedEvent::updated(Record::Control(next.clone())));
            Ok(next)
        })
    }

    fn forfeit_control(&self, user: Uuid) -> Result<ControlLock, Error> {
        self.with_conn(|conn| {
            let Some((lock, _)) = query_control_row(conn)? else {
                return Err(Error::NotFound);
            };
            if !lock.held_by(user) {
                return Err(Error::Unauthorized);
            }

            let next = ControlLock {
                holder_id: None,
                acquired_at: None,
                active: false,
            };
            conn.execute(
                "UPDATE bulletin_control
                    SET holder_id = NULL, acquired_at = NULL, active = 0
                  WHERE id = ?1",
                [CONTROL_ROW_ID.to_string()],
            )
            .map_err(db_err)?;

            info!(holder = %user, "bulletin control forfeited");
            self.publish(FeedEvent::updated(Record::Control(next.clone())));
            Ok(next)
        })
    }
}

pub(crate) fn query_control_row(
    conn: &Connection,
) -> Result<Option<(ControlLock, String)>, Error> {
    conn.query_row(
        "SELECT holder_id, acquired_at, secret, active FROM bulletin_control WHERE id = ?1",
        [CONTROL_ROW_ID.to_string()],
        |row| {
            let lock = ControlLock {
                holder_id: row.get::<_, Option<String>>(0)?.map(|raw| parse_id(&raw)),
                acquired_at: row.get::<_, Option<String>>(1)?.map(|raw| parse_ts(&raw)),
                active: row.get(3)?,
            };
            Ok((lock, row.get::<_, String>(2)?))
        },
    )
    .optional()
    .map_err(db_err)
}
