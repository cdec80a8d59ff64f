//! Push-style change feed connecting the store to client-side state managers.
//!
//! Every committed write publishes exactly one [`FeedEvent`] per affected
//! record onto the topic channel that record belongs to. Channels are
//! bounded; a subscriber that falls behind observes [`FeedLoss::Lagged`]
//! and is expected to refetch its snapshot before resuming.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use herald_types::events::{FeedEvent, Topic};

/// Default per-topic channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// What a subscriber sees when its stream of events is no longer contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FeedLoss {
    /// The subscriber fell behind and `skipped` events were dropped.
    /// Recover by refetching the backing snapshot, then resume reading.
    #[error("feed subscriber lagged, {skipped} events dropped")]
    Lagged { skipped: u64 },
    /// The hub was dropped; no further events will arrive.
    #[error("feed closed")]
    Closed,
}

/// Fan-out hub for change events, one bounded broadcast channel per topic.
#[derive(Clone)]
pub struct FeedHub {
    inner: Arc<FeedHubInner>,
}

struct FeedHubInner {
    channels: HashMap<Topic, broadcast::Sender<FeedEvent>>,
}

impl FeedHub {
    /// Create a hub with `capacity` buffered events per topic.
    pub fn new(capacity: usize) -> Self {
        let channels = Topic::ALL
            .iter()
            .map(|&topic| {
                let (tx, _) = broadcast::channel(capacity);
                (topic, tx)
            })
            .collect();
        Self {
            inner: Arc::new(FeedHubInner { channels }),
        }
    }

    /// Subscribe to one topic. Only events published after this call are seen.
    pub fn subscribe(&self, topic: Topic) -> FeedSubscription {
        let rx = self.inner.channels[&topic].subscribe();
        FeedSubscription { topic, rx }
    }

    /// Publish an event onto its record's topic channel.
    pub fn publish(&self, event: FeedEvent) {
        let topic = event.topic();
        debug!(?topic, change = ?event.change, "feed event");
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.inner.channels[&topic].send(event);
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner.channels[&topic].receiver_count()
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A single-topic event stream held by one consumer.
pub struct FeedSubscription {
    topic: Topic,
    rx: broadcast::Receiver<FeedEvent>,
}

impl FeedSubscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Wait for the next event on this topic.
    ///
    /// Cancel-safe: dropping the future loses no events.
    pub async fn next(&mut self) -> Result<FeedEvent, FeedLoss> {
        match self.rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(topic = ?self.topic, skipped, "feed subscriber lagged");
                Err(FeedLoss::Lagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => Err(FeedLoss::Closed),
        }
    }
}
