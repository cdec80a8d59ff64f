use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use herald_types::error::Error;
use herald_types::events::{FeedEvent, Record};
use herald_types::models::{Presence, Profile};

use crate::{Database, Store, db_err, fmt_ts, now, parse_id, parse_presence, parse_ts};

const DEFAULT_AVATAR: &str = "🙂";

/// Fields of a profile its owner may edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub presence: Option<Presence>,
}

impl Store {
    /// Create an account. The new profile starts online.
    pub async fn register(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> Result<Profile, Error> {
        let username = username.trim().to_owned();
        let len = username.chars().count();
        if !(3..=32).contains(&len) {
            return Err(Error::invalid("username must be 3-32 characters"));
        }
        if password.len() < 8 {
            return Err(Error::invalid("password must be at least 8 characters"));
        }
        let display_name = {
            let trimmed = display_name.trim();
            if trimmed.is_empty() {
                username.clone()
            } else {
                trimmed.to_owned()
            }
        };
        let password = password.to_owned();
        self.run(move |db| db.register(&username, &display_name, &password))
            .await
    }

    /// Verify credentials and bring the profile online. Unknown usernames
    /// and bad passwords both come back as `Unauthorized`.
    pub async fn login(&self, username: &str, password: &str) -> Result<Profile, Error> {
        let username = username.trim().to_owned();
        let password = password.to_owned();
        self.run(move |db| db.login(&username, &password)).await
    }

    pub async fn logout(&self, user: Uuid) -> Result<(), Error> {
        self.set_presence(user, Presence::Offline).await.map(|_| ())
    }

    pub async fn profile(&self, id: Uuid) -> Result<Profile, Error> {
        self.run(move |db| db.profile(id)).await
    }

    /// Exact username lookup, case-insensitive. `NotFound` on miss.
    pub async fn resolve_username(&self, username: &str) -> Result<Profile, Error> {
        let username = username.trim().to_owned();
        if username.is_empty() {
            return Err(Error::invalid("username must not be empty"));
        }
        self.run(move |db| {
            db.profile_by_username(&username)?.ok_or(Error::NotFound)
        })
        .await
    }

    pub async fn update_profile(
        &self,
        id: Uuid,
        mut update: ProfileUpdate,
    ) -> Result<Profile, Error> {
        if let Some(name) = update.display_name.take() {
            let name = name.trim().to_owned();
            if name.is_empty() {
                return Err(Error::invalid("display name must not be empty"));
            }
            update.display_name = Some(name);
        }
        self.run(move |db| db.update_profile(id, update)).await
    }

    pub async fn set_presence(&self, id: Uuid, presence: Presence) -> Result<Profile, Error> {
        self.update_profile(
            id,
            ProfileUpdate {
                presence: Some(presence),
                ..Default::default()
            },
        )
        .await
    }
}

impl Database {
    fn register(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> Result<Profile, Error> {
        let hash = hash_password(password)?;
        self.with_conn(|conn| {
            let ts = now();
            let profile = Profile {
                id: Uuid::new_v4(),
                username: username.to_owned(),
                display_name: display_name.to_owned(),
                avatar: DEFAULT_AVATAR.to_owned(),
                presence: Presence::Online,
                created_at: ts,
                updated_at: ts,
            };
            conn.execute(
                "INSERT INTO profiles
                    (id, username, display_name, avatar, presence, password, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    profile.id.to_string(),
                    profile.username,
                    profile.display_name,
                    profile.avatar,
                    profile.presence.as_str(),
                    hash,
                    fmt_ts(ts),
                ],
            )
            .map_err(db_err)?;
            info!(user = %profile.id, username = %profile.username, "registered account");
            self.publish(FeedEvent::created(Record::Profile(profile.clone())));
            Ok(profile)
        })
    }

    fn login(&self, username: &str, password: &str) -> Result<Profile, Error> {
        self.with_conn(|conn| {
            let Some((profile, hash)) = query_credential(conn, username)? else {
                return Err(Error::Unauthorized);
            };
            verify_password(password, &hash)?;

            let ts = now();
            conn.execute(
                "UPDATE profiles SET presence = 'online', updated_at = ?2 WHERE id = ?1",
                params![profile.id.to_string(), fmt_ts(ts)],
            )
            .map_err(db_err)?;

            let profile = Profile {
                presence: Presence::Online,
                updated_at: ts,
                ..profile
            };
            info!(user = %profile.id, "login");
            self.publish(FeedEvent::updated(Record::Profile(profile.clone())));
            Ok(profile)
        })
    }

    fn profile(&self, id: Uuid) -> Result<Profile, Error> {
        self.with_conn(|conn| query_profile(conn, id)?.ok_or(Error::NotFound))
    }

    fn profile_by_username(&self, username: &str) -> Result<Option<Profile>, Error> {
        self.with_conn(|conn| query_profile_by_username(conn, username))
    }

    fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<Profile, Error> {
        self.with_conn(|conn| {
            let Some(current) = query_profile(conn, id)? else {
                return Err(Error::NotFound);
            };

            let ts = now();
            let profile = Profile {
                id: current.id,
                username: current.username,
                display_name: update.display_name.unwrap_or(current.display_name),
                avatar: update.avatar.unwrap_or(current.avatar),
                presence: update.presence.unwrap_or(current.presence),
                created_at: current.created_at,
                updated_at: ts,
            };
            conn.execute(
                "UPDATE profiles
                    SET display_name = ?2, avatar = ?3, presence = ?4, updated_at = ?5
                  WHERE id = ?1",
                params![
                    profile.id.to_string(),
                    profile.display_name,
                    profile.avatar,
                    profile.presence.as_str(),
                    fmt_ts(ts),
                ],
            )
            .map_err(db_err)?;

            self.publish(FeedEvent::updated(Record::Profile(profile.clone())));
            Ok(profile)
        })
    }
}

fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Io(format!("password hash failed: {e}")))
}

fn verify_password(password: &str, stored: &str) -> Result<(), Error> {
    // An unparsable stored hash (e.g. the seeded system row) can never verify.
    let parsed = PasswordHash::new(stored).map_err(|_| Error::Unauthorized)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| Error::Unauthorized)
}

pub(crate) const PROFILE_COLS: &str =
    "id, username, display_name, avatar, presence, created_at, updated_at";

pub(crate) fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: parse_id(&row.get::<_, String>(0)?),
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar: row.get(3)?,
        presence: parse_presence(&row.get::<_, String>(4)?),
        created_at: parse_ts(&row.get::<_, String>(5)?),
        updated_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

pub(crate) fn query_profile(conn: &Connection, id: Uuid) -> Result<Option<Profile>, Error> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLS} FROM profiles WHERE id = ?1"),
        [id.to_string()],
        profile_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn query_profile_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<Profile>, Error> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLS} FROM profiles WHERE username = ?1"),
        [username],
        profile_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn query_credential(conn: &Connection, username: &str) -> Result<Option<(Profile, String)>, Error> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLS}, password FROM profiles WHERE username = ?1"),
        [username],
        |row| Ok((profile_from_row(row)?, row.get::<_, String>(7)?)),
    )
    .optional()
    .map_err(db_err)
}

pub(crate) fn profile_exists(conn: &Connection, id: Uuid) -> Result<bool, Error> {
    conn.query_row(
        "SELECT 1 FROM profiles WHERE id = ?1",
        [id.to_string()],
        |_| Ok(()),
    )
    .optional()
    .map_err(db_err)
    .map(|row| row.is_some())
}

pub(crate) fn display_name_of(conn: &Connection, id: Uuid) -> Result<Option<String>, Error> {
    conn.query_row(
        "SELECT display_name FROM profiles WHERE id = ?1",
        [id.to_string()],
        |row| row.get(0),
    )
    .optional()
    .map_err(db_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_store;
    use herald_types::events::{ChangeKind, Topic};

    #[tokio::test]
    async fn register_then_login() {
        let store = memory_store();
        let alice = store
            .register("alice", "Alice", "correct horse")
            .await
            .unwrap();
        assert_eq!(alice.presence, Presence::Online);
        assert_eq!(alice.display_name, "Alice");

        let again = store.login("ALICE", "correct horse").await.unwrap();
        assert_eq!(again.id, alice.id);

        let wrong = store.login("alice", "not the password").await;
        assert!(matches!(wrong, Err(Error::Unauthorized)));
        let unknown = store.login("nobody", "correct horse").await;
        assert!(matches!(unknown, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn usernames_are_unique_ignoring_case() {
        let store = memory_store();
        store.register("bob", "Bob", "password123").await.unwrap();

        let dup = store.register("BOB", "Other Bob", "password123").await;
        assert!(matches!(dup, Err(Error::AlreadyExists)));

        let found = store.resolve_username("  Bob ").await.unwrap();
        assert_eq!(found.username, "bob");
        assert!(matches!(
            store.resolve_username("ghost").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn rejects_short_credentials() {
        let store = memory_store();
        assert!(matches!(
            store.register("ab", "Ab", "password123").await,
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            store.register("carol", "Carol", "short").await,
            Err(Error::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn profile_updates_reach_the_feed() {
        let store = memory_store();
        let user = store
            .register("dora", "Dora", "password123")
            .await
            .unwrap();

        let mut profiles = store.subscribe(Topic::Profiles);
        let updated = store
            .update_profile(
                user.id,
                ProfileUpdate {
                    display_name: Some("Dora the Explorer".into()),
                    avatar: Some("🧭".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Dora the Explorer");
        assert_eq!(updated.avatar, "🧭");
        // Untouched fields survive a partial update.
        assert_eq!(updated.presence, Presence::Online);

        let event = profiles.next().await.unwrap();
        assert_eq!(event.change, ChangeKind::Updated);
        match event.record {
            Record::Profile(p) => assert_eq!(p.display_name, "Dora the Explorer"),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[tokio::test]
    async fn logout_goes_offline() {
        let store = memory_store();
        let user = store
            .register("eve", "Eve", "password123")
            .await
            .unwrap();
        store.logout(user.id).await.unwrap();
        let profile = store.profile(user.id).await.unwrap();
        assert_eq!(profile.presence, Presence::Offline);
    }
}
