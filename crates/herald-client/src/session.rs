use tracing::{debug, info};
use uuid::Uuid;

use herald_store::{ProfileUpdate, Store};
use herald_types::error::Error;
use herald_types::models::{Presence, Profile};

use crate::{BulletinControl, ContactGraph, GroupRoster, Inbox, MessageReactions, Timeline};

/// A logged-in user and the store handle their managers share.
pub struct Session {
    store: Store,
    profile: Profile,
    call_active: bool,
}

impl Session {
    /// Create an account and start a session for it.
    pub async fn register(
        store: Store,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> Result<Self, Error> {
        let profile = store.register(username, display_name, password).await?;
        info!(user = %profile.username, "session started");
        Ok(Self { store, profile, call_active: false })
    }

    pub async fn login(store: Store, username: &str, password: &str) -> Result<Self, Error> {
        let profile = store.login(username, password).await?;
        info!(user = %profile.username, "session started");
        Ok(Self { store, profile, call_active: false })
    }

    /// Mark the account offline and end the session.
    pub async fn logout(self) -> Result<(), Error> {
        self.store.logout(self.profile.id).await?;
        info!(user = %self.profile.username, "session ended");
        Ok(())
    }

    pub fn user_id(&self) -> Uuid {
        self.profile.id
    }

    /// The cached profile as of the last write through this session.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn update_profile(&mut self, update: ProfileUpdate) -> Result<&Profile, Error> {
        self.profile = self.store.update_profile(self.profile.id, update).await?;
        Ok(&self.profile)
    }

    pub async fn set_presence(&mut self, presence: Presence) -> Result<(), Error> {
        self.profile = self.store.set_presence(self.profile.id, presence).await?;
        Ok(())
    }

    /// Opaque call-signaling flag; presence and timelines are unaffected.
    pub fn call_active(&self) -> bool {
        self.call_active
    }

    pub fn set_call_active(&mut self, active: bool) {
        if self.call_active != active {
            debug!(active, "call state toggled");
        }
        self.call_active = active;
    }

    /// Store-backed media upload; returns a `media://` URL.
    pub async fn upload_media(&self, data: &[u8], ext: &str) -> Result<String, Error> {
        self.store.upload_media(data, ext).await
    }

    // Managers. Each subscribes to its topics before taking its snapshot,
    // so nothing slips between the two.

    pub async fn contacts(&self) -> Result<ContactGraph, Error> {
        ContactGraph::open(self.store.clone(), self.profile.id).await
    }

    pub async fn direct_timeline(&self, peer: Uuid) -> Result<Timeline, Error> {
        Timeline::open_direct(self.store.clone(), self.profile.id, peer).await
    }

    pub async fn room_timeline(&self, room: Uuid) -> Result<Timeline, Error> {
        Timeline::open_room(self.store.clone(), self.profile.id, room).await
    }

    pub async fn bulletin_control(&self) -> Result<BulletinControl, Error> {
        BulletinControl::open(self.store.clone(), self.profile.id).await
    }

    pub async fn reactions(&self, message: Uuid) -> Result<MessageReactions, Error> {
        MessageReactions::open(self.store.clone(), self.profile.id, message).await
    }

    pub async fn inbox(&self) -> Result<Inbox, Error> {
        Inbox::open(self.store.clone(), self.profile.id).await
    }

    pub async fn roster(&self) -> Result<GroupRoster, Error> {
        GroupRoster::open(self.store.clone(), self.profile.id).await
    }
}
