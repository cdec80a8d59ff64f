//! Client-side sync managers over the herald store.
//!
//! Each manager owns a snapshot of one concern plus the feed subscriptions
//! that keep it current. Operations write through the store and return typed
//! results immediately; `pump()` awaits the next feed event (or the
//! completion of an in-flight send) and folds it into the snapshot,
//! reporting what changed. State reads are synchronous borrows.
//!
//! Managers are single-task citizens: `&mut self` on `pump` means folds
//! never interleave, so none of them lock.

mod contacts;
mod control;
mod inbox;
mod reactions;
mod roster;
mod session;
mod timeline;

pub use contacts::{AddContactError, ContactEntry, ContactGraph, ContactsChange};
pub use control::{BulletinControl, ControlChange, ControlState};
pub use inbox::{INBOX_WINDOW, Inbox, InboxChange};
pub use reactions::{MessageReactions, ReactionGroup, ReactionsChange, ToggleOutcome};
pub use roster::{GroupRoster, RosterChange};
pub use session::Session;
pub use timeline::{Conversation, PendingEcho, SendError, Timeline, TimelineChange};

use herald_types::error::Error;

/// A closed feed means the store (and its hub) is gone; nothing recovers
/// from that short of reopening.
pub(crate) fn feed_closed() -> Error {
    Error::Io("change feed closed".into())
}
