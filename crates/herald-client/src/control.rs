use tracing::{debug, warn};
use uuid::Uuid;

use herald_feed::{FeedLoss, FeedSubscription};
use herald_store::Store;
use herald_types::error::Error;
use herald_types::events::{Record, Topic};
use herald_types::models::ControlLock;

/// Where the exclusive bulletin-writer lock stands relative to this user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Unlocked,
    LockedBySelf,
    LockedByOther,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChange {
    Changed(ControlState),
    Unchanged,
}

/// Cached view of the control-lock singleton. The store is the authority;
/// this cache only decides what the UI may offer.
pub struct BulletinControl {
    store: Store,
    user: Uuid,
    lock: ControlLock,
    events: FeedSubscription,
}

impl BulletinControl {
    pub async fn open(store: Store, user: Uuid) -> Result<Self, Error> {
        let events = store.subscribe(Topic::Control);
        let lock = store.control_state().await?;
        Ok(Self { store, user, lock, events })
    }

    pub fn state(&self) -> ControlState {
        if self.lock.held_by(self.user) {
            ControlState::LockedBySelf
        } else if self.lock.held_by_other(self.user) {
            ControlState::LockedByOther
        } else {
            ControlState::Unlocked
        }
    }

    pub fn holder(&self) -> Option<Uuid> {
        self.lock.holder_id.filter(|_| self.lock.active)
    }

    /// Whether this user may post to the bulletin room right now. The store
    /// enforces the same gate on every bulletin append.
    pub fn may_post(&self) -> bool {
        !matches!(self.state(), ControlState::LockedByOther)
    }

    /// Take the lock. `Unauthorized` on a wrong password, `Conflict` while
    /// someone else holds it; both leave the cache untouched. Reacquiring a
    /// lock already held refreshes its timestamp.
    pub async fn acquire(&mut self, password: &str) -> Result<ControlState, Error> {
        self.lock = self.store.acquire_control(self.user, password).await?;
        Ok(self.state())
    }

    /// Release the lock. `Unauthorized` unless this user holds it.
    pub async fn forfeit(&mut self) -> Result<ControlState, Error> {
        self.lock = self.store.forfeit_control(self.user).await?;
        Ok(self.state())
    }

    /// Fold the next control event, replacing the cached row wholesale.
    pub async fn pump(&mut self) -> Result<ControlChange, Error> {
        match self.events.next().await {
            Ok(event) => {
                let Record::Control(lock) = event.record else {
                    return Ok(ControlChange::Unchanged);
                };
                Ok(self.replace(lock))
            }
            Err(FeedLoss::Lagged { skipped }) => {
                warn!(skipped, "control feed lagged; refetching");
                let lock = self.store.control_state().await?;
                Ok(self.replace(lock))
            }
            Err(FeedLoss::Closed) => Err(crate::feed_closed()),
        }
    }

    fn replace(&mut self, lock: ControlLock) -> ControlChange {
        let before = (self.state(), self.lock.holder_id);
        self.lock = lock;
        let after = (self.state(), self.lock.holder_id);
        if before == after {
            ControlChange::Unchanged
        } else {
            debug!(state = ?after.0, "control state changed");
            ControlChange::Changed(after.0)
        }
    }
}
