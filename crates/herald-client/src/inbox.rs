use tracing::{debug, warn};
use uuid::Uuid;

use herald_feed::{FeedLoss, FeedSubscription};
use herald_store::Store;
use herald_types::error::Error;
use herald_types::events::{ChangeKind, FeedEvent, Record, Topic};
use herald_types::models::Notification;

/// How many notifications the inbox retains; older entries fall off.
pub const INBOX_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxChange {
    Arrived(Uuid),
    Updated(Uuid),
    Resynced,
    Ignored,
}

/// Most-recent-first notification window for one recipient.
pub struct Inbox {
    store: Store,
    user: Uuid,
    items: Vec<Notification>,
    events: FeedSubscription,
}

impl Inbox {
    pub async fn open(store: Store, user: Uuid) -> Result<Self, Error> {
        let events = store.subscribe(Topic::Notifications);
        let items = store.notifications_for(user, INBOX_WINDOW).await?;
        Ok(Self { store, user, items, events })
    }

    /// Newest first.
    pub fn list(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// Already-read is a no-op success.
    pub async fn mark_read(&self, id: Uuid) -> Result<(), Error> {
        self.store.mark_notification_read(id).await?;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), Error> {
        let flipped = self.store.mark_all_notifications_read(self.user).await?;
        debug!(count = flipped.len(), "marked all notifications read");
        Ok(())
    }

    pub async fn pump(&mut self) -> Result<InboxChange, Error> {
        match self.events.next().await {
            Ok(event) => Ok(self.fold(event)),
            Err(FeedLoss::Lagged { skipped }) => {
                warn!(skipped, "notification feed lagged; refetching");
                self.items = self.store.notifications_for(self.user, INBOX_WINDOW).await?;
                Ok(InboxChange::Resynced)
            }
            Err(FeedLoss::Closed) => Err(crate::feed_closed()),
        }
    }

    fn fold(&mut self, event: FeedEvent) -> InboxChange {
        let Record::Notification(notification) = event.record else {
            return InboxChange::Ignored;
        };
        if notification.recipient_id != self.user {
            return InboxChange::Ignored;
        }
        match event.change {
            ChangeKind::Created => {
                if self.items.iter().any(|n| n.id == notification.id) {
                    debug!(notification = %notification.id, "duplicate delivery ignored");
                    return InboxChange::Ignored;
                }
                let id = notification.id;
                let key = (notification.created_at, notification.id);
                let at = self.items.partition_point(|n| (n.created_at, n.id) > key);
                if at >= INBOX_WINDOW {
                    // Older than everything retained.
                    return InboxChange::Ignored;
                }
                self.items.insert(at, notification);
                self.items.truncate(INBOX_WINDOW);
                InboxChange::Arrived(id)
            }
            ChangeKind::Updated => {
                match self.items.iter_mut().find(|n| n.id == notification.id) {
                    Some(slot) => {
                        let id = notification.id;
                        *slot = notification;
                        InboxChange::Updated(id)
                    }
                    // Outside the window; nothing to update.
                    None => InboxChange::Ignored,
                }
            }
            ChangeKind::Deleted => InboxChange::Ignored,
        }
    }
}
