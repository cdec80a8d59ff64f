use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Away,
    Offline,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Online => "online",
            Presence::Away => "away",
            Presence::Offline => "offline",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "online" => Some(Presence::Online),
            "away" => Some(Presence::Away),
            "offline" => Some(Presence::Offline),
            _ => None,
        }
    }
}

/// A user's public profile. The credential hash never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    /// Unique, compared case-insensitively.
    pub username: String,
    pub display_name: String,
    /// Emoji or a `media://` URL.
    pub avatar: String,
    pub presence: Presence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One directed half of a contact relationship. A full relationship is the
/// pair of edges (A→B, B→A); the reverse edge is written best-effort, so a
/// lone forward edge is a legal (asymmetric) state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEdge {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub peer_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ContactEdge {
    /// Whether this edge is part of `user`'s relationships, in either role.
    pub fn touches(&self, user: Uuid) -> bool {
        self.owner_id == user || self.peer_id == user
    }
}

/// What kind of room this is. `General` and `Bulletin` are singletons seeded
/// by the store; user-created rooms are always `Standard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Visible to everyone; clients join themselves on first sight.
    General,
    /// Readable by everyone; writable only per the control lock.
    Bulletin,
    Standard,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::General => "general",
            RoomKind::Bulletin => "bulletin",
            RoomKind::Standard => "standard",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "general" => Some(RoomKind::General),
            "bulletin" => Some(RoomKind::Bulletin),
            "standard" => Some(RoomKind::Standard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: RoomKind,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(MemberRole::Admin),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            _ => None,
        }
    }
}

/// Where a message was sent: to one peer, or into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum Destination {
    Direct(Uuid),
    Room(Uuid),
}

/// A committed message. Immutable after creation except for `read_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub destination: Destination,
    pub content: String,
    pub kind: MessageKind,
    /// Assigned by the store at commit time.
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Total order for timeline merging: chronological, ids break ties.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }

    /// Whether this message belongs to the direct conversation between
    /// `a` and `b` (in either direction).
    pub fn in_direct(&self, a: Uuid, b: Uuid) -> bool {
        match self.destination {
            Destination::Direct(to) => {
                (self.sender_id == a && to == b) || (self.sender_id == b && to == a)
            }
            Destination::Room(_) => false,
        }
    }

    pub fn in_room(&self, room: Uuid) -> bool {
        self.destination == Destination::Room(room)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// The control-lock singleton as visible to clients. The shared secret stays
/// in the store; only the holder state travels over the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlLock {
    pub holder_id: Option<Uuid>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl ControlLock {
    pub fn held_by(&self, user: Uuid) -> bool {
        self.active && self.holder_id == Some(user)
    }

    pub fn held_by_other(&self, user: Uuid) -> bool {
        self.active && self.holder_id.is_some() && self.holder_id != Some(user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    Reaction,
    GroupInvite,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Message => "message",
            NotificationKind::Reaction => "reaction",
            NotificationKind::GroupInvite => "group_invite",
            NotificationKind::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "message" => Some(NotificationKind::Message),
            "reaction" => Some(NotificationKind::Reaction),
            "group_invite" => Some(NotificationKind::GroupInvite),
            "system" => Some(NotificationKind::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: Option<String>,
    /// Free-form payload set by the trigger that created the notification.
    pub data: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: Uuid, destination: Destination) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            destination,
            content: "hi".into(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    #[test]
    fn direct_membership_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let m = msg(a, Destination::Direct(b));
        assert!(m.in_direct(a, b));
        assert!(m.in_direct(b, a));
        assert!(!m.in_direct(a, c));
        assert!(!m.in_room(b));
    }

    #[test]
    fn room_messages_never_match_direct_scopes() {
        let a = Uuid::new_v4();
        let room = Uuid::new_v4();

        let m = msg(a, Destination::Room(room));
        assert!(m.in_room(room));
        assert!(!m.in_direct(a, a));
    }

    #[test]
    fn control_lock_holder_checks() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();

        let unlocked = ControlLock { holder_id: None, acquired_at: None, active: false };
        assert!(!unlocked.held_by(me));
        assert!(!unlocked.held_by_other(me));

        let mine = ControlLock { holder_id: Some(me), acquired_at: Some(Utc::now()), active: true };
        assert!(mine.held_by(me));
        assert!(mine.held_by_other(other));
        assert!(!mine.held_by_other(me));
    }
}
