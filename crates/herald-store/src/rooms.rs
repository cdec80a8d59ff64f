use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use herald_types::error::Error;
use herald_types::events::{FeedEvent, Record};
use herald_types::models::{MemberRole, Membership, Room, RoomKind};

use crate::profiles::profile_exists;
use crate::{Database, Store, db_err, fmt_ts, now, parse_id, parse_room_kind, parse_role, parse_ts};

impl Store {
    /// Create a standard room with `creator` as its admin member.
    pub async fn create_room(
        &self,
        creator: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Room, Error> {
        let name = name.trim().to_owned();
        if name.is_empty() {
            return Err(Error::invalid("room name must not be empty"));
        }
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned);
        self.run(move |db| db.create_room(creator, &name, description.as_deref()))
            .await
    }

    pub async fn room(&self, id: Uuid) -> Result<Room, Error> {
        self.run(move |db| db.room(id)).await
    }

    /// Rooms visible to `user`: the general and bulletin rooms plus any
    /// room the user is a member of.
    pub async fn rooms_for(&self, user: Uuid) -> Result<Vec<Room>, Error> {
        self.run(move |db| db.rooms_for(user)).await
    }

    /// Idempotent join. Returns the new membership, or `None` when the user
    /// already belongs to the room.
    pub async fn ensure_member(
        &self,
        room: Uuid,
        user: Uuid,
    ) -> Result<Option<Membership>, Error> {
        self.run(move |db| db.ensure_member(room, user)).await
    }

    pub async fn members_of(&self, room: Uuid) -> Result<Vec<Membership>, Error> {
        self.run(move |db| db.members_of(room)).await
    }
}

impl Database {
    fn create_room(
        &self,
        creator: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Room, Error> {
        self.with_conn_mut(|conn| {
            let ts = now();
            let room = Room {
                id: Uuid::new_v4(),
                name: name.to_owned(),
                description: description.map(str::to_owned),
                kind: RoomKind::Standard,
                created_by: creator,
                created_at: ts,
                updated_at: ts,
            };
            let membership = Membership {
                id: Uuid::new_v4(),
                room_id: room.id,
                user_id: creator,
                role: MemberRole::Admin,
                created_at: ts,
            };

            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO rooms (id, name, description, kind, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    room.id.to_string(),
                    room.name,
                    room.description,
                    room.kind.as_str(),
                    room.created_by.to_string(),
                    fmt_ts(ts),
                ],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO room_members (id, room_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    membership.id.to_string(),
                    membership.room_id.to_string(),
                    membership.user_id.to_string(),
                    membership.role.as_str(),
                    fmt_ts(ts),
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            info!(room = %room.id, name = %room.name, "room created");
            self.publish(FeedEvent::created(Record::Room(room.clone())));
            self.publish(FeedEvent::created(Record::Member(membership)));
            Ok(room)
        })
    }

    fn room(&self, id: Uuid) -> Result<Room, Error> {
        self.with_conn(|conn| query_room(conn, id)?.ok_or(Error::NotFound))
    }

    fn rooms_for(&self, user: Uuid) -> Result<Vec<Room>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, description, kind, created_by, created_at, updated_at
                       FROM rooms
                      WHERE kind IN ('general', 'bulletin')
                         OR id IN (SELECT room_id FROM room_members WHERE user_id = ?1)
                      ORDER BY name COLLATE NOCASE",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([user.to_string()], room_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    fn ensure_member(&self, room: Uuid, user: Uuid) -> Result<Option<Membership>, Error> {
        self.with_conn(|conn| {
            if query_room(conn, room)?.is_none() || !profile_exists(conn, user)? {
                return Err(Error::NotFound);
            }

            let already: Option<()> = conn
                .query_row(
                    "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    params![room.to_string(), user.to_string()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(db_err)?;
            if already.is_some() {
                return Ok(None);
            }

            let membership = Membership {
                id: Uuid::new_v4(),
                room_id: room,
                user_id: user,
                role: MemberRole::Member,
                created_at: now(),
            };
            conn.execute(
                "INSERT INTO room_members (id, room_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    membership.id.to_string(),
                    membership.room_id.to_string(),
                    membership.user_id.to_string(),
                    membership.role.as_str(),
                    fmt_ts(membership.created_at),
                ],
            )
            .map_err(db_err)?;

            self.publish(FeedEvent::created(Record::Member(membership.clone())));
            Ok(Some(membership))
        })
    }

    fn members_of(&self, room: Uuid) -> Result<Vec<Membership>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, room_id, user_id, role, created_at
                       FROM room_members
                      WHERE room_id = ?1
                      ORDER BY created_at, id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([room.to_string()], membership_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }
}

fn room_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: parse_id(&row.get::<_, String>(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        kind: parse_room_kind(&row.get::<_, String>(3)?),
        created_by: parse_id(&row.get::<_, String>(4)?),
        created_at: parse_ts(&row.get::<_, String>(5)?),
        updated_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn membership_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: parse_id(&row.get::<_, String>(0)?),
        room_id: parse_id(&row.get::<_, String>(1)?),
        user_id: parse_id(&row.get::<_, String>(2)?),
        role: parse_role(&row.get::<_, String>(3)?),
        created_at: parse_ts(&row.get::<_, String>(4)?),
    })
}

pub(crate) fn query_room(conn: &Connection, id: Uuid) -> Result<Option<Room>, Error> {
    conn.query_row(
        "SELECT id, name, description, kind, created_by, created_at, updated_at
           FROM rooms WHERE id = ?1",
        [id.to_string()],
        room_from_row,
    )
    .optional()
    .map_err(db_err)
}
