use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use herald_feed::{FeedLoss, FeedSubscription};
use herald_store::Store;
use herald_types::error::Error;
use herald_types::events::{ChangeKind, FeedEvent, Record, Topic};
use herald_types::models::{Message, MessageKind};

/// Which conversation a timeline shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversation {
    Direct { peer: Uuid },
    Room { room: Uuid },
}

impl Conversation {
    fn contains(&self, viewer: Uuid, message: &Message) -> bool {
        match *self {
            Conversation::Direct { peer } => message.in_direct(viewer, peer),
            Conversation::Room { room } => message.in_room(room),
        }
    }
}

/// Local echo of a send that has not committed yet. Rendered after the
/// committed tail until the authoritative record replaces it.
#[derive(Debug, Clone)]
pub struct PendingEcho {
    pub temp_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    /// Provisional; the store assigns the real timestamp at commit.
    pub queued_at: DateTime<Utc>,
}

struct InFlight {
    echo: PendingEcho,
    done: oneshot::Receiver<Result<Message, Error>>,
}

/// What one `pump` call did to the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineChange {
    Appended(Uuid),
    Updated(Uuid),
    /// The in-flight send committed; the id is the store-assigned one.
    SendConfirmed(Uuid),
    /// The in-flight send failed and its echo was dropped.
    SendFailed(Error),
    Resynced,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("message content is empty")]
    Empty,
    #[error("another send is in flight")]
    Busy,
}

struct SenderTag {
    display_name: String,
    avatar: String,
}

/// Merged, ordered view of one conversation.
///
/// Messages arrive from two directions: feed events pushed by the store,
/// and the confirmation of this client's own in-flight send. Both fold
/// through [`pump`], which keeps the vector sorted by `(created_at, id)`
/// and drops duplicate deliveries by id.
///
/// [`pump`]: Timeline::pump
pub struct Timeline {
    store: Store,
    viewer: Uuid,
    conversation: Conversation,
    messages: Vec<Message>,
    senders: HashMap<Uuid, SenderTag>,
    pending: Option<InFlight>,
    events: FeedSubscription,
}

impl Timeline {
    pub async fn open_direct(store: Store, viewer: Uuid, peer: Uuid) -> Result<Self, Error> {
        Self::open(store, viewer, Conversation::Direct { peer }).await
    }

    pub async fn open_room(store: Store, viewer: Uuid, room: Uuid) -> Result<Self, Error> {
        Self::open(store, viewer, Conversation::Room { room }).await
    }

    async fn open(store: Store, viewer: Uuid, conversation: Conversation) -> Result<Self, Error> {
        // Subscribe before the snapshot so nothing slips between the two.
        let events = store.subscribe(Topic::Messages);
        let mut timeline = Self {
            store,
            viewer,
            conversation,
            messages: Vec::new(),
            senders: HashMap::new(),
            pending: None,
            events,
        };
        timeline.resync().await?;
        Ok(timeline)
    }

    pub fn conversation(&self) -> Conversation {
        self.conversation
    }

    /// Committed messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending(&self) -> Option<&PendingEcho> {
        self.pending.as_ref().map(|p| &p.echo)
    }

    /// Sender display name for rendering; `user-XXXXXXXX` until the profile
    /// is known.
    pub fn sender_label(&self, sender: Uuid) -> String {
        match self.senders.get(&sender) {
            Some(tag) => tag.display_name.clone(),
            None => placeholder_label(sender),
        }
    }

    pub fn sender_avatar(&self, sender: Uuid) -> Option<&str> {
        self.senders.get(&sender).map(|tag| tag.avatar.as_str())
    }

    /// Queue a send. The append runs on its own task so the in-flight guard
    /// outlives this call; the result comes back through [`pump`]. One send
    /// at a time: a second call while one is in flight is `Busy`.
    ///
    /// Returns the temp id of the local echo.
    ///
    /// [`pump`]: Timeline::pump
    pub fn send(&mut self, content: &str, kind: MessageKind) -> Result<Uuid, SendError> {
        if self.pending.is_some() {
            return Err(SendError::Busy);
        }
        let content = content.trim().to_owned();
        if content.is_empty() {
            return Err(SendError::Empty);
        }

        let echo = PendingEcho {
            temp_id: Uuid::new_v4(),
            content: content.clone(),
            kind,
            queued_at: Utc::now(),
        };
        let (tx, rx) = oneshot::channel();
        let store = self.store.clone();
        let viewer = self.viewer;
        let conversation = self.conversation;
        tokio::spawn(async move {
            let result = match conversation {
                Conversation::Direct { peer } => {
                    store.append_direct(viewer, peer, &content, kind).await
                }
                Conversation::Room { room } => {
                    store.append_room(viewer, room, &content, kind).await
                }
            };
            // A dropped receiver means the timeline was torn down; the
            // committed write stands either way.
            if tx.send(result).is_err() {
                debug!("send completed after timeline teardown");
            }
        });

        debug!(temp = %echo.temp_id, "send in flight");
        let temp_id = echo.temp_id;
        self.pending = Some(InFlight { echo, done: rx });
        Ok(temp_id)
    }

    /// Set the read marker on a direct message. The change comes back as an
    /// `Updated` fold on every subscribed timeline.
    pub async fn mark_read(&self, message: Uuid) -> Result<(), Error> {
        self.store.mark_read(message).await?;
        Ok(())
    }

    /// Wait for the next feed event or in-flight completion and fold it.
    pub async fn pump(&mut self) -> Result<TimelineChange, Error> {
        enum Wake {
            Feed(Result<FeedEvent, FeedLoss>),
            Confirmed(Result<Result<Message, Error>, oneshot::error::RecvError>),
        }

        let wake = match self.pending.as_mut() {
            Some(inflight) => tokio::select! {
                event = self.events.next() => Wake::Feed(event),
                result = &mut inflight.done => Wake::Confirmed(result),
            },
            None => Wake::Feed(self.events.next().await),
        };

        match wake {
            Wake::Feed(Ok(event)) => Ok(self.fold(event).await),
            Wake::Feed(Err(FeedLoss::Lagged { skipped })) => {
                warn!(skipped, "message feed lagged; resyncing");
                self.resync().await?;
                Ok(TimelineChange::Resynced)
            }
            Wake::Feed(Err(FeedLoss::Closed)) => Err(crate::feed_closed()),
            Wake::Confirmed(outcome) => {
                self.pending = None;
                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => Err(Error::Io("send task dropped".into())),
                };
                match result {
                    Ok(message) => {
                        let id = message.id;
                        self.integrate(message).await;
                        Ok(TimelineChange::SendConfirmed(id))
                    }
                    Err(err) => {
                        warn!(%err, "send failed");
                        Ok(TimelineChange::SendFailed(err))
                    }
                }
            }
        }
    }

    async fn fold(&mut self, event: FeedEvent) -> TimelineChange {
        let Record::Message(message) = event.record else {
            return TimelineChange::Ignored;
        };
        if !self.conversation.contains(self.viewer, &message) {
            return TimelineChange::Ignored;
        }
        match event.change {
            ChangeKind::Created => {
                if self.contains_message(message.id) {
                    debug!(message = %message.id, "duplicate delivery ignored");
                    return TimelineChange::Ignored;
                }
                // The echo of this client's own send can land here before
                // its confirmation; the confirmation then dedupes by id.
                let id = message.id;
                self.remember_sender(message.sender_id).await;
                insert_sorted(&mut self.messages, message);
                TimelineChange::Appended(id)
            }
            ChangeKind::Updated => {
                match self.messages.iter_mut().find(|m| m.id == message.id) {
                    Some(slot) => {
                        let id = message.id;
                        *slot = message;
                        TimelineChange::Updated(id)
                    }
                    None => TimelineChange::Ignored,
                }
            }
            // Messages are immutable once committed; nothing deletes them.
            ChangeKind::Deleted => TimelineChange::Ignored,
        }
    }

    async fn resync(&mut self) -> Result<(), Error> {
        self.messages = match self.conversation {
            Conversation::Direct { peer } => self.store.messages_with(self.viewer, peer).await?,
            Conversation::Room { room } => self.store.messages_in(room).await?,
        };
        let senders: Vec<Uuid> = self.messages.iter().map(|m| m.sender_id).collect();
        for sender in senders {
            self.remember_sender(sender).await;
        }
        Ok(())
    }

    /// Fold a confirmed send whose feed echo may or may not have arrived.
    async fn integrate(&mut self, message: Message) {
        if self.contains_message(message.id) {
            return;
        }
        self.remember_sender(message.sender_id).await;
        insert_sorted(&mut self.messages, message);
    }

    fn contains_message(&self, id: Uuid) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    async fn remember_sender(&mut self, sender: Uuid) {
        if self.senders.contains_key(&sender) {
            return;
        }
        match self.store.profile(sender).await {
            Ok(profile) => {
                self.senders.insert(
                    sender,
                    SenderTag { display_name: profile.display_name, avatar: profile.avatar },
                );
            }
            // Left out of the map, so the next sighting retries.
            Err(err) => debug!(%sender, %err, "sender profile unavailable"),
        }
    }
}

fn insert_sorted(messages: &mut Vec<Message>, message: Message) {
    let key = message.sort_key();
    let at = messages.partition_point(|m| m.sort_key() <= key);
    messages.insert(at, message);
}

fn placeholder_label(sender: Uuid) -> String {
    let hex = sender.simple().to_string();
    format!("user-{}", &hex[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use herald_types::models::Destination;

    fn message_at(created_at: DateTime<Utc>, id: Uuid) -> Message {
        Message {
            id,
            sender_id: Uuid::new_v4(),
            destination: Destination::Direct(Uuid::new_v4()),
            content: "hi".into(),
            kind: MessageKind::Text,
            created_at,
            read_at: None,
        }
    }

    #[test]
    fn sorted_insert_breaks_timestamp_ties_by_id() {
        let when = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 1).unwrap();
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);

        let mut messages = Vec::new();
        insert_sorted(&mut messages, message_at(later, Uuid::from_u128(9)));
        insert_sorted(&mut messages, message_at(when, high));
        insert_sorted(&mut messages, message_at(when, low));

        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, [low, high, Uuid::from_u128(9)]);
    }

    #[test]
    fn unknown_senders_get_a_stable_placeholder() {
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        assert_eq!(placeholder_label(id), "user-01234567");
    }
}
