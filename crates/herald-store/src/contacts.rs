use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use herald_types::error::Error;
use herald_types::events::{FeedEvent, Record};
use herald_types::models::{ContactEdge, Profile};

use crate::profiles::{PROFILE_COLS, profile_exists, profile_from_row};
use crate::{Database, Store, db_err, fmt_ts, now, parse_id, parse_ts};

impl Store {
    /// Record the directed edge `owner -> peer`. The companion reverse edge
    /// is the caller's concern; a duplicate edge is `AlreadyExists`.
    pub async fn insert_contact(&self, owner: Uuid, peer: Uuid) -> Result<ContactEdge, Error> {
        if owner == peer {
            return Err(Error::invalid("cannot add yourself as a contact"));
        }
        self.run(move |db| db.insert_contact(owner, peer)).await
    }

    /// All of `owner`'s contacts with their current profiles.
    pub async fn contacts_of(&self, owner: Uuid) -> Result<Vec<(ContactEdge, Profile)>, Error> {
        self.run(move |db| db.contacts_of(owner)).await
    }

    pub async fn contact_exists(&self, owner: Uuid, peer: Uuid) -> Result<bool, Error> {
        self.run(move |db| db.contact_exists(owner, peer)).await
    }
}

impl Database {
    fn insert_contact(&self, owner: Uuid, peer: Uuid) -> Result<ContactEdge, Error> {
        self.with_conn(|conn| {
            if !profile_exists(conn, owner)? || !profile_exists(conn, peer)? {
                return Err(Error::NotFound);
            }

            let edge = ContactEdge {
                id: Uuid::new_v4(),
                owner_id: owner,
                peer_id: peer,
                created_at: now(),
            };
            conn.execute(
                "INSERT INTO contacts (id, owner_id, peer_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    edge.id.to_string(),
                    edge.owner_id.to_string(),
                    edge.peer_id.to_string(),
                    fmt_ts(edge.created_at),
                ],
            )
            .map_err(db_err)?;

            self.publish(FeedEvent::created(Record::Contact(edge.clone())));
            Ok(edge)
        })
    }

    fn contacts_of(&self, owner: Uuid) -> Result<Vec<(ContactEdge, Profile)>, Error> {
        self.with_conn(|conn| {
            // JOIN the peer profile in one query (no N+1)
            let sql = format!(
                "SELECT c.id, c.owner_id, c.peer_id, c.created_at, {cols}
                   FROM contacts c
                   JOIN profiles p ON p.id = c.peer_id
                  WHERE c.owner_id = ?1
                  ORDER BY p.display_name COLLATE NOCASE",
                cols = prefixed_profile_cols()
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map([owner.to_string()], |row| {
                    let edge = ContactEdge {
                        id: parse_id(&row.get::<_, String>(0)?),
                        owner_id: parse_id(&row.get::<_, String>(1)?),
                        peer_id: parse_id(&row.get::<_, String>(2)?),
                        created_at: parse_ts(&row.get::<_, String>(3)?),
                    };
                    // Profile columns start after the four edge columns.
                    let profile = Profile {
                        id: parse_id(&row.get::<_, String>(4)?),
                        username: row.get(5)?,
                        display_name: row.get(6)?,
                        avatar: row.get(7)?,
                        presence: crate::parse_presence(&row.get::<_, String>(8)?),
                        created_at: parse_ts(&row.get::<_, String>(9)?),
                        updated_at: parse_ts(&row.get::<_, String>(10)?),
                    };
                    Ok((edge, profile))
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    fn contact_exists(&self, owner: Uuid, peer: Uuid) -> Result<bool, Error> {
        self.with_conn(|conn| query_contact_exists(conn, owner, peer))
    }
}

fn prefixed_profile_cols() -> String {
    PROFILE_COLS
        .split(", ")
        .map(|col| format!("p.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn query_contact_exists(
    conn: &Connection,
    owner: Uuid,
    peer: Uuid,
) -> Result<bool, Error> {
    conn.query_row(
        "SELECT 1 FROM contacts WHERE owner_id = ?1 AND peer_id = ?2",
        params![owner.to_string(), peer.to_string()],
        |_| Ok(()),
    )
    .optional()
    .map_err(db_err)
    .map(|row| row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_store;
    use herald_types::events::{ChangeKind, Topic};

    async fn two_users(store: &Store) -> (Uuid, Uuid) {
        let a = store
            .register("alice", "Alice", "password123")
            .await
            .unwrap();
        let b = store.register("bob", "Bob", "password123").await.unwrap();
        (a.id, b.id)
    }

    #[tokio::test]
    async fn edges_are_directed_and_unique() {
        let store = memory_store();
        let (alice, bob) = two_users(&store).await;

        store.insert_contact(alice, bob).await.unwrap();
        assert!(store.contact_exists(alice, bob).await.unwrap());
        // The reverse edge is a separate row.
        assert!(!store.contact_exists(bob, alice).await.unwrap());

        let dup = store.insert_contact(alice, bob).await;
        assert!(matches!(dup, Err(Error::AlreadyExists)));

        store.insert_contact(bob, alice).await.unwrap();
        assert!(store.contact_exists(bob, alice).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_self_and_unknown_peers() {
        let store = memory_store();
        let (alice, _) = two_users(&store).await;

        assert!(matches!(
            store.insert_contact(alice, alice).await,
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            store.insert_contact(alice, Uuid::new_v4()).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn listing_joins_peer_profiles() {
        let store = memory_store();
        let (alice, bob) = two_users(&store).await;
        let carol = store
            .register("carol", "Carol", "password123")
            .await
            .unwrap();

        store.insert_contact(alice, carol.id).await.unwrap();
        store.insert_contact(alice, bob).await.unwrap();

        let contacts = store.contacts_of(alice).await.unwrap();
        let names: Vec<&str> = contacts
            .iter()
            .map(|(_, p)| p.display_name.as_str())
            .collect();
        assert_eq!(names, ["Bob", "Carol"]);
        assert!(contacts.iter().all(|(e, _)| e.owner_id == alice));
    }

    #[tokio::test]
    async fn inserts_reach_the_feed() {
        let store = memory_store();
        let (alice, bob) = two_users(&store).await;

        let mut sub = store.subscribe(Topic::Contacts);
        let edge = store.insert_contact(alice, bob).await.unwrap();

        let event = sub.next().await.unwrap();
        assert_eq!(event.change, ChangeKind::Created);
        match event.record {
            Record::Contact(got) => {
                assert_eq!(got.id, edge.id);
                assert!(got.touches(alice) && got.touches(bob));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
