use tracing::{debug, warn};
use uuid::Uuid;

use herald_feed::{FeedLoss, FeedSubscription};
use herald_store::Store;
use herald_types::error::Error;
use herald_types::events::{Record, Topic};
use herald_types::models::{Room, RoomKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    Refreshed,
    Ignored,
}

/// Rooms visible to one user, with general rooms auto-joined on first
/// sight.
pub struct GroupRoster {
    store: Store,
    user: Uuid,
    rooms: Vec<Room>,
    room_events: FeedSubscription,
    member_events: FeedSubscription,
}

impl GroupRoster {
    pub async fn open(store: Store, user: Uuid) -> Result<Self, Error> {
        let room_events = store.subscribe(Topic::Rooms);
        let member_events = store.subscribe(Topic::Members);
        let mut roster = Self {
            store,
            user,
            rooms: Vec::new(),
            room_events,
            member_events,
        };
        roster.refresh().await?;
        Ok(roster)
    }

    /// Sorted by name.
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn bulletin(&self) -> Option<&Room> {
        self.rooms.iter().find(|r| r.kind == RoomKind::Bulletin)
    }

    pub fn general(&self) -> Option<&Room> {
        self.rooms.iter().find(|r| r.kind == RoomKind::General)
    }

    /// Create a standard room with this user as its admin. The local list
    /// updates when the room's own event folds through `pump`.
    pub async fn create_room(
        &mut self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Room, Error> {
        self.store.create_room(self.user, name, description).await
    }

    /// Refetch the visible rooms; joining general rooms is idempotent, so
    /// only the first sight of one writes.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        self.rooms = self.store.rooms_for(self.user).await?;
        let general: Vec<Uuid> = self
            .rooms
            .iter()
            .filter(|r| r.kind == RoomKind::General)
            .map(|r| r.id)
            .collect();
        for room in general {
            if let Some(membership) = self.store.ensure_member(room, self.user).await? {
                debug!(room = %membership.room_id, "joined general room");
            }
        }
        Ok(())
    }

    pub async fn pump(&mut self) -> Result<RosterChange, Error> {
        let next = tokio::select! {
            event = self.room_events.next() => event,
            event = self.member_events.next() => event,
        };
        match next {
            Ok(event) => match event.record {
                Record::Room(_) => {
                    self.refresh().await?;
                    Ok(RosterChange::Refreshed)
                }
                Record::Member(membership) if membership.user_id == self.user => {
                    self.refresh().await?;
                    Ok(RosterChange::Refreshed)
                }
                _ => Ok(RosterChange::Ignored),
            },
            Err(FeedLoss::Lagged { skipped }) => {
                warn!(skipped, "roster feed lagged; refreshing");
                self.refresh().await?;
                Ok(RosterChange::Refreshed)
            }
            Err(FeedLoss::Closed) => Err(crate::feed_closed()),
        }
    }
}
