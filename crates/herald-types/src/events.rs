use serde::{Deserialize, Serialize};

use crate::models::{
    ContactEdge, ControlLock, Membership, Message, Notification, Profile, Reaction, Room,
};

/// One subscription stream per topic; events for different topics carry no
/// relative ordering guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Profiles,
    Contacts,
    Rooms,
    Members,
    Messages,
    Reactions,
    Notifications,
    Control,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::Profiles,
        Topic::Contacts,
        Topic::Rooms,
        Topic::Members,
        Topic::Messages,
        Topic::Reactions,
        Topic::Notifications,
        Topic::Control,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// The record carried by a feed event. `Deleted` events carry the record as
/// it was before deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Record {
    Profile(Profile),
    Contact(ContactEdge),
    Room(Room),
    Member(Membership),
    Message(Message),
    Reaction(Reaction),
    Notification(Notification),
    Control(ControlLock),
}

impl Record {
    pub fn topic(&self) -> Topic {
        match self {
            Record::Profile(_) => Topic::Profiles,
            Record::Contact(_) => Topic::Contacts,
            Record::Room(_) => Topic::Rooms,
            Record::Member(_) => Topic::Members,
            Record::Message(_) => Topic::Messages,
            Record::Reaction(_) => Topic::Reactions,
            Record::Notification(_) => Topic::Notifications,
            Record::Control(_) => Topic::Control,
        }
    }
}

/// A single change notification, delivered at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    pub change: ChangeKind,
    pub record: Record,
}

impl FeedEvent {
    pub fn created(record: Record) -> Self {
        Self { change: ChangeKind::Created, record }
    }

    pub fn updated(record: Record) -> Self {
        Self { change: ChangeKind::Updated, record }
    }

    pub fn deleted(record: Record) -> Self {
        Self { change: ChangeKind::Deleted, record }
    }

    pub fn topic(&self) -> Topic {
        self.record.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn record_topic_routing() {
        let edge = ContactEdge {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            peer_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        let event = FeedEvent::created(Record::Contact(edge));
        assert_eq!(event.topic(), Topic::Contacts);
        assert_eq!(event.change, ChangeKind::Created);
    }

    #[test]
    fn events_round_trip_as_json() {
        let lock = ControlLock { holder_id: None, acquired_at: None, active: false };
        let event = FeedEvent::updated(Record::Control(lock));

        let json = serde_json::to_string(&event).unwrap();
        let back: FeedEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.topic(), Topic::Control);
        assert_eq!(back.change, ChangeKind::Updated);
    }
}
