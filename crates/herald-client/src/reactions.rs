use tracing::{debug, warn};
use uuid::Uuid;

use herald_feed::{FeedLoss, FeedSubscription};
use herald_store::Store;
use herald_types::error::Error;
use herald_types::events::{ChangeKind, FeedEvent, Record, Topic};
use herald_types::models::Reaction;

/// One emoji bucket on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionsChange {
    Changed,
    Resynced,
    Ignored,
}

/// Live reaction set for one message, grouped for display.
pub struct MessageReactions {
    store: Store,
    viewer: Uuid,
    message_id: Uuid,
    reactions: Vec<Reaction>,
    events: FeedSubscription,
}

impl MessageReactions {
    pub async fn open(store: Store, viewer: Uuid, message: Uuid) -> Result<Self, Error> {
        let events = store.subscribe(Topic::Reactions);
        let reactions = store.reactions_for(message).await?;
        Ok(Self { store, viewer, message_id: message, reactions, events })
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Buckets in first-occurrence order; each keeps its reactors in
    /// arrival order.
    pub fn grouped(&self) -> Vec<ReactionGroup> {
        let mut groups: Vec<ReactionGroup> = Vec::new();
        for reaction in &self.reactions {
            match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
                Some(group) => {
                    group.count += 1;
                    group.user_ids.push(reaction.user_id);
                }
                None => groups.push(ReactionGroup {
                    emoji: reaction.emoji.clone(),
                    count: 1,
                    user_ids: vec![reaction.user_id],
                }),
            }
        }
        groups
    }

    /// Whether the viewer currently holds `emoji` on this message.
    pub fn reacted_with(&self, emoji: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.user_id == self.viewer && r.emoji == emoji)
    }

    /// Add or remove the viewer's `emoji`, decided from the local view. A
    /// racing client can flip the row first, in which case the store's
    /// `AlreadyExists`/`NotFound` surfaces here and the next pump
    /// reconciles the view.
    pub async fn toggle(&mut self, emoji: &str) -> Result<ToggleOutcome, Error> {
        let emoji = emoji.trim();
        if self.reacted_with(emoji) {
            self.store
                .remove_reaction(self.message_id, self.viewer, emoji)
                .await?;
            Ok(ToggleOutcome::Removed)
        } else {
            self.store
                .add_reaction(self.message_id, self.viewer, emoji)
                .await?;
            Ok(ToggleOutcome::Added)
        }
    }

    pub async fn pump(&mut self) -> Result<ReactionsChange, Error> {
        match self.events.next().await {
            Ok(event) => Ok(self.fold(event)),
            Err(FeedLoss::Lagged { skipped }) => {
                warn!(skipped, "reaction feed lagged; refetching");
                self.reactions = self.store.reactions_for(self.message_id).await?;
                Ok(ReactionsChange::Resynced)
            }
            Err(FeedLoss::Closed) => Err(crate::feed_closed()),
        }
    }

    fn fold(&mut self, event: FeedEvent) -> ReactionsChange {
        let Record::Reaction(reaction) = event.record else {
            return ReactionsChange::Ignored;
        };
        if reaction.message_id != self.message_id {
            return ReactionsChange::Ignored;
        }
        match event.change {
            ChangeKind::Created => {
                let duplicate = self.reactions.iter().any(|r| {
                    r.id == reaction.id
                        || (r.user_id == reaction.user_id && r.emoji == reaction.emoji)
                });
                if duplicate {
                    debug!(reaction = %reaction.id, "duplicate delivery ignored");
                    return ReactionsChange::Ignored;
                }
                self.reactions.push(reaction);
                ReactionsChange::Changed
            }
            ChangeKind::Deleted => {
                let before = self.reactions.len();
                self.reactions.retain(|r| r.id != reaction.id);
                if self.reactions.len() == before {
                    ReactionsChange::Ignored
                } else {
                    ReactionsChange::Changed
                }
            }
            ChangeKind::Updated => ReactionsChange::Ignored,
        }
    }
}
