//! Observable session state.
//!
//! [`SessionContext`] is built once and handed to consumers. It wraps the
//! [`IdentityResolver`], owns the guest flag and publishes every session
//! transition through a `watch` channel.

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::directory::{DonorFilters, DonorStats};
use crate::error::{AuthError, AuthResult};
use crate::profile::{Profile, ProfileInput, ProfileUpdate};
use crate::resolver::{AuthOutcome, IdentityResolver, SyncOutcome};

/// Snapshot of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// The signed-in profile.
    pub profile: Option<Profile>,
    /// Whether the user is browsing as a guest.
    pub is_guest: bool,
    /// Whether the initial load is still running.
    pub is_loading: bool,
}

impl Session {
    /// The state before the store has been read.
    #[must_use]
    pub const fn loading() -> Self {
        Self {
            profile: None,
            is_guest: false,
            is_loading: true,
        }
    }

    /// A settled state with neither a profile nor guest mode.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            profile: None,
            is_guest: false,
            is_loading: false,
        }
    }

    fn signed_in(profile: Profile) -> Self {
        Self {
            profile: Some(profile),
            is_guest: false,
            is_loading: false,
        }
    }

    fn guest() -> Self {
        Self {
            profile: None,
            is_guest: true,
            is_loading: false,
        }
    }

    /// Whether the user has to sign in, register or pick guest mode.
    #[must_use]
    pub fn needs_login(&self) -> bool {
        !self.is_loading && self.profile.is_none() && !self.is_guest
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::loading()
    }
}

/// Failures surfaced by the session context.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The resolver failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The operation needs a signed-in profile.
    #[error("no profile is signed in")]
    NotSignedIn,
}

impl SessionError {
    /// Localized message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.user_message(),
            Self::NotSignedIn => "لا يوجد مستخدم مسجل دخول",
        }
    }
}

impl From<crate::error::Error> for SessionError {
    fn from(err: crate::error::Error) -> Self {
        Self::Auth(AuthError::Storage(err))
    }
}

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Session state shared with consumers.
#[derive(Debug)]
pub struct SessionContext {
    resolver: IdentityResolver,
    tx: watch::Sender<Session>,
}

impl SessionContext {
    /// Create a context in the loading state. Call [`mount`](Self::mount)
    /// before using it.
    #[must_use]
    pub fn new(resolver: IdentityResolver) -> Self {
        let (tx, _rx) = watch::channel(Session::loading());
        Self { resolver, tx }
    }

    /// Subscribe to session transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// The current session.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// The underlying resolver.
    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    fn publish(&self, session: Session) {
        debug!(
            signed_in = session.profile.is_some(),
            is_guest = session.is_guest,
            is_loading = session.is_loading,
            "Session changed"
        );
        self.tx.send_replace(session);
    }

    async fn load(&self) -> AuthResult<Session> {
        let store = self.resolver.store();
        if let Some(profile) = store.get_profile().await? {
            if let Err(e) = store.set_guest_mode(false).await {
                warn!(error = %e, "Failed to clear guest mode");
            }
            return Ok(Session::signed_in(profile));
        }
        if store.guest_mode().await? {
            Ok(Session::guest())
        } else {
            Ok(Session::signed_out())
        }
    }

    /// Read the stored identity once and publish it.
    ///
    /// A storage failure settles the session as signed out.
    pub async fn mount(&self) -> Session {
        let session = match self.load().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Failed to load session, starting signed out");
                Session::signed_out()
            }
        };
        self.publish(session.clone());
        session
    }

    /// Publish a resolved profile. The stored profile already wins over a
    /// stale guest flag on the next mount, so failing to clear it is logged.
    async fn enter(&self, outcome: AuthOutcome) -> AuthOutcome {
        if let Err(e) = self.resolver.store().set_guest_mode(false).await {
            warn!(error = %e, "Failed to clear guest mode");
        }
        self.publish(Session::signed_in(outcome.profile.clone()));
        outcome
    }

    fn current_id(&self) -> SessionResult<String> {
        self.tx
            .borrow()
            .profile
            .as_ref()
            .map(|p| p.id.clone())
            .ok_or(SessionError::NotSignedIn)
    }

    /// Sign in and leave guest mode.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error; the session is left unchanged.
    pub async fn sign_in(&self, phone: &str, use_built_in_demo: bool) -> SessionResult<AuthOutcome> {
        let outcome = self.resolver.sign_in(phone, use_built_in_demo).await?;
        Ok(self.enter(outcome).await)
    }

    /// Register a profile and leave guest mode.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error; the session is left unchanged.
    pub async fn create_profile(&self, input: ProfileInput) -> SessionResult<AuthOutcome> {
        let outcome = self.resolver.create_profile(input).await?;
        Ok(self.enter(outcome).await)
    }

    /// Update the signed-in profile.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotSignedIn`] without a profile, otherwise the
    /// resolver's error.
    pub async fn update_profile(&self, updates: &ProfileUpdate) -> SessionResult<AuthOutcome> {
        let id = self.current_id()?;
        let outcome = self.resolver.update_profile(&id, updates).await?;
        self.publish(Session::signed_in(outcome.profile.clone()));
        Ok(outcome)
    }

    /// Change availability of the signed-in profile.
    ///
    /// # Errors
    ///
    /// Same as [`update_profile`](Self::update_profile).
    pub async fn update_availability(
        &self,
        is_active: bool,
        last_donation_date: Option<Option<NaiveDate>>,
    ) -> SessionResult<AuthOutcome> {
        let updates = ProfileUpdate {
            is_active: Some(is_active),
            last_donation_date,
            ..ProfileUpdate::default()
        };
        self.update_profile(&updates).await
    }

    /// Sign out and leave guest mode.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be cleared.
    pub async fn sign_out(&self) -> SessionResult<()> {
        self.resolver.sign_out().await?;
        self.resolver.store().set_guest_mode(false).await?;
        self.publish(Session::signed_out());
        Ok(())
    }

    /// Re-read the stored profile.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub async fn refresh_profile(&self) -> SessionResult<Option<Profile>> {
        let profile = self.resolver.current_user().await?;
        let session = match profile.clone() {
            Some(p) => Session::signed_in(p),
            None => Session {
                profile: None,
                is_guest: self.tx.borrow().is_guest,
                is_loading: false,
            },
        };
        self.publish(session);
        Ok(profile)
    }

    /// Browse without an identity. Works offline.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flag cannot be persisted.
    pub async fn continue_as_guest(&self) -> SessionResult<()> {
        let store = self.resolver.store();
        store.set_guest_mode(true).await?;
        store.clear_profile().await?;
        info!("Continuing as guest");
        self.publish(Session::guest());
        Ok(())
    }

    /// Leave guest mode without signing in.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flag cannot be cleared.
    pub async fn exit_guest_mode(&self) -> SessionResult<()> {
        self.resolver.store().set_guest_mode(false).await?;
        let mut session = self.snapshot();
        session.is_guest = false;
        self.publish(session);
        Ok(())
    }

    /// Delete the signed-in profile and sign out.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error; the session is left unchanged.
    pub async fn delete_profile(&self) -> SessionResult<()> {
        self.resolver.delete_profile().await?;
        self.publish(Session::signed_out());
        Ok(())
    }

    /// Send changes made on this device to the directory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotSignedIn`] without a profile, otherwise the
    /// resolver's error.
    pub async fn sync(&self) -> SessionResult<SyncOutcome> {
        let synced = self
            .resolver
            .sync_local_profile()
            .await?
            .ok_or(SessionError::NotSignedIn)?;
        self.publish(Session::signed_in(synced.outcome().profile.clone()));
        Ok(synced)
    }

    /// Search donors, leaving out the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error.
    pub async fn search_donors(&self, filters: &DonorFilters) -> SessionResult<Vec<Profile>> {
        Ok(self.resolver.search_donors(filters).await?)
    }

    /// Donor counts.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error.
    pub async fn donor_stats(&self) -> SessionResult<DonorStats> {
        Ok(self.resolver.donor_stats().await?)
    }

    /// Clear everything stored on this device.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be cleared.
    pub async fn reset_local_data(&self) -> SessionResult<()> {
        self.resolver.reset_local_data().await?;
        self.publish(Session::signed_out());
        Ok(())
    }
}
