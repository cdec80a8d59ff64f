use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use herald_feed::{FeedLoss, FeedSubscription};
use herald_store::Store;
use herald_types::error::Error;
use herald_types::events::{ChangeKind, FeedEvent, Record, Topic};
use herald_types::models::{ContactEdge, Destination, Message, Profile};

/// One row of the contact list: the owner's edge, the peer's profile, and
/// the latest direct-message activity with that peer.
#[derive(Debug, Clone)]
pub struct ContactEntry {
    pub edge: ContactEdge,
    pub profile: Profile,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactsChange {
    /// The list was refetched and resorted.
    Refreshed,
    /// A known contact's profile was updated in place.
    ProfileApplied(Uuid),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddContactError {
    #[error("username must not be empty")]
    InvalidUsername,
    #[error("no such user")]
    UnknownUser,
    #[error("cannot add yourself")]
    SelfReference,
    #[error("already a contact")]
    AlreadyExists,
    #[error(transparent)]
    Store(#[from] Error),
}

/// The owner's contact list, kept sorted by most recent conversation.
pub struct ContactGraph {
    store: Store,
    owner: Uuid,
    entries: Vec<ContactEntry>,
    contact_events: FeedSubscription,
    profile_events: FeedSubscription,
    message_events: FeedSubscription,
}

impl ContactGraph {
    pub async fn open(store: Store, owner: Uuid) -> Result<Self, Error> {
        let contact_events = store.subscribe(Topic::Contacts);
        let profile_events = store.subscribe(Topic::Profiles);
        let message_events = store.subscribe(Topic::Messages);
        let mut graph = Self {
            store,
            owner,
            entries: Vec::new(),
            contact_events,
            profile_events,
            message_events,
        };
        graph.refresh().await?;
        Ok(graph)
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Most recently active first; contacts with no history follow, by
    /// display name.
    pub fn contacts(&self) -> &[ContactEntry] {
        &self.entries
    }

    /// Add the user named by `identifier` (matched case-insensitively) as a
    /// contact. The reverse edge is written best-effort: its failure is
    /// logged and the forward relationship stands.
    pub async fn add_contact(&mut self, identifier: &str) -> Result<Profile, AddContactError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(AddContactError::InvalidUsername);
        }
        let peer = match self.store.resolve_username(identifier).await {
            Ok(profile) => profile,
            Err(Error::NotFound) => return Err(AddContactError::UnknownUser),
            Err(err) => return Err(err.into()),
        };
        if peer.id == self.owner {
            return Err(AddContactError::SelfReference);
        }
        if self.store.contact_exists(self.owner, peer.id).await? {
            return Err(AddContactError::AlreadyExists);
        }
        match self.store.insert_contact(self.owner, peer.id).await {
            Ok(_) => {}
            Err(Error::AlreadyExists) => return Err(AddContactError::AlreadyExists),
            Err(err) => return Err(err.into()),
        }
        // A lone forward edge repairs itself when the peer adds back.
        if let Err(err) = self.store.insert_contact(peer.id, self.owner).await {
            if err != Error::AlreadyExists {
                warn!(%err, peer = %peer.id, "reverse contact edge failed");
            }
        }
        Ok(peer)
    }

    /// Refetch the list and the per-peer activity map, then resort.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let contacts = self.store.contacts_of(self.owner).await?;
        let activity: HashMap<Uuid, DateTime<Utc>> = self
            .store
            .latest_direct_activity(self.owner)
            .await?
            .into_iter()
            .collect();
        self.entries = contacts
            .into_iter()
            .map(|(edge, profile)| {
                let last_message_at = activity.get(&profile.id).copied();
                ContactEntry { edge, profile, last_message_at }
            })
            .collect();
        self.entries.sort_by(compare_entries);
        Ok(())
    }

    /// Fold the next feed event. Edges touching the owner and new direct
    /// messages refetch the list; profile updates apply in place when the
    /// subject is already a contact.
    pub async fn pump(&mut self) -> Result<ContactsChange, Error> {
        let next = tokio::select! {
            event = self.contact_events.next() => event,
            event = self.profile_events.next() => event,
            event = self.message_events.next() => event,
        };
        match next {
            Ok(event) => self.fold(event).await,
            Err(FeedLoss::Lagged { skipped }) => {
                warn!(skipped, "contact feed lagged; refreshing");
                self.refresh().await?;
                Ok(ContactsChange::Refreshed)
            }
            Err(FeedLoss::Closed) => Err(crate::feed_closed()),
        }
    }

    async fn fold(&mut self, event: FeedEvent) -> Result<ContactsChange, Error> {
        match event.record {
            Record::Contact(edge) if edge.touches(self.owner) => {
                self.refresh().await?;
                Ok(ContactsChange::Refreshed)
            }
            Record::Message(message)
                if event.change == ChangeKind::Created && self.is_direct_with_owner(&message) =>
            {
                self.refresh().await?;
                Ok(ContactsChange::Refreshed)
            }
            Record::Profile(profile) => {
                let subject = profile.id;
                match self.entries.iter_mut().find(|e| e.profile.id == subject) {
                    Some(entry) => {
                        entry.profile = profile;
                        self.entries.sort_by(compare_entries);
                        debug!(contact = %subject, "profile applied");
                        Ok(ContactsChange::ProfileApplied(subject))
                    }
                    None => Ok(ContactsChange::Ignored),
                }
            }
            _ => Ok(ContactsChange::Ignored),
        }
    }

    fn is_direct_with_owner(&self, message: &Message) -> bool {
        match message.destination {
            Destination::Direct(to) => message.sender_id == self.owner || to == self.owner,
            Destination::Room(_) => false,
        }
    }
}

fn compare_entries(a: &ContactEntry, b: &ContactEntry) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(at_a), Some(at_b)) => at_b.cmp(&at_a).then_with(|| name_order(a, b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => name_order(a, b),
    }
}

fn name_order(a: &ContactEntry, b: &ContactEntry) -> Ordering {
    a.profile
        .display_name
        .to_lowercase()
        .cmp(&b.profile.display_name.to_lowercase())
        .then_with(|| a.profile.id.cmp(&b.profile.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use herald_types::models::Presence;

    fn entry(name: &str, last: Option<DateTime<Utc>>) -> ContactEntry {
        let peer = Uuid::new_v4();
        let now = Utc::now();
        ContactEntry {
            edge: ContactEdge {
                id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                peer_id: peer,
                created_at: now,
            },
            profile: Profile {
                id: peer,
                username: name.to_lowercase(),
                display_name: name.into(),
                avatar: "🙂".into(),
                presence: Presence::Online,
                created_at: now,
                updated_at: now,
            },
            last_message_at: last,
        }
    }

    fn names(entries: &[ContactEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.profile.display_name.as_str()).collect()
    }

    #[test]
    fn activity_outranks_the_alphabet() {
        let old = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

        let mut entries = vec![
            entry("Aaron", None),
            entry("Zoe", Some(old)),
            entry("Mia", Some(new)),
        ];
        entries.sort_by(compare_entries);

        assert_eq!(names(&entries), ["Mia", "Zoe", "Aaron"]);
    }

    #[test]
    fn ties_and_no_history_fall_back_to_names() {
        let when = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();

        let mut entries = vec![
            entry("zoe", Some(when)),
            entry("Aaron", Some(when)),
            entry("chris", None),
            entry("Bea", None),
        ];
        entries.sort_by(compare_entries);

        assert_eq!(names(&entries), ["Aaron", "zoe", "Bea", "chris"]);
    }
}
