//! Identity resolution.
//!
//! [`IdentityResolver`] decides, per operation, whether to talk to the remote
//! directory or fall back to the device. Every remote failure is folded into
//! the closed [`AuthError`] taxonomy; transport errors never escape.
//!
//! Each operation moves through `Idle → CheckingConnectivity →
//! {LocalFallback | RemoteCall} → Resolved | Failed`, logged at `debug`.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityOracle;
use crate::directory::{DirectoryError, DonorFilters, DonorStats, ProfileDirectory};
use crate::error::{AuthError, AuthResult};
use crate::profile::{
    is_demo_phone, is_local_only_id, mask_phone, Profile, ProfileInput, ProfileUpdate,
};
use crate::store::IdentityStore;

/// A resolved identity.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    /// The profile now stored as current.
    pub profile: Profile,
    /// Whether the profile has no remote counterpart.
    pub is_local_only: bool,
}

impl AuthOutcome {
    fn remote(profile: Profile) -> Self {
        Self {
            profile,
            is_local_only: false,
        }
    }

    fn local(profile: Profile) -> Self {
        Self {
            profile,
            is_local_only: true,
        }
    }
}

/// What [`IdentityResolver::sync_local_profile`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Nothing on the device was waiting for the directory.
    UpToDate(AuthOutcome),
    /// Device changes reached the directory.
    Synced(AuthOutcome),
}

impl SyncOutcome {
    /// The profile now stored as current.
    #[must_use]
    pub fn outcome(&self) -> &AuthOutcome {
        match self {
            Self::UpToDate(outcome) | Self::Synced(outcome) => outcome,
        }
    }

    /// Consume into the stored outcome.
    #[must_use]
    pub fn into_outcome(self) -> AuthOutcome {
        match self {
            Self::UpToDate(outcome) | Self::Synced(outcome) => outcome,
        }
    }

    /// Whether anything was sent to the directory.
    #[must_use]
    pub fn was_sent(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CheckingConnectivity,
    LocalFallback,
    RemoteCall,
    Resolved,
    Failed,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckingConnectivity => "checking_connectivity",
            Self::LocalFallback => "local_fallback",
            Self::RemoteCall => "remote_call",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn step(op: &'static str, to: Step) {
    debug!(op, state = %to, "Identity resolution step");
}

/// Map a directory failure that has no local fallback.
///
/// Anything that is not a recognized business outcome is reported as a
/// connectivity problem, which is the only retryable member of the taxonomy.
fn surface(err: DirectoryError) -> AuthError {
    match err {
        DirectoryError::DuplicatePhone(phone) => AuthError::DuplicatePhone { phone },
        DirectoryError::NotFound(id) => AuthError::NotFound { id },
        DirectoryError::Unavailable(_) | DirectoryError::Rejected { .. } => {
            AuthError::NoConnectivity
        }
    }
}

/// Resolves the current identity across the remote directory and the device.
pub struct IdentityResolver {
    connectivity: Arc<dyn ConnectivityOracle>,
    directory: Arc<dyn ProfileDirectory>,
    store: Arc<dyn IdentityStore>,
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver").finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Create a resolver over the given collaborators.
    #[must_use]
    pub fn new(
        connectivity: Arc<dyn ConnectivityOracle>,
        directory: Arc<dyn ProfileDirectory>,
        store: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            connectivity,
            directory,
            store,
        }
    }

    /// The local identity store this resolver writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    async fn reachable(&self, op: &'static str) -> bool {
        step(op, Step::CheckingConnectivity);
        self.connectivity.is_reachable().await
    }

    /// Store `outcome` as current. A local outcome for a remote id marks the
    /// profile as carrying unsent changes; anything else clears the mark.
    async fn resolve(&self, op: &'static str, outcome: AuthOutcome) -> AuthResult<AuthOutcome> {
        let pending = outcome.is_local_only && !is_local_only_id(&outcome.profile.id);
        let stored = match self.store.set_profile(&outcome.profile).await {
            Ok(()) => self.store.set_pending_changes(pending).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            step(op, Step::Failed);
            return Err(e.into());
        }
        step(op, Step::Resolved);
        Ok(outcome)
    }

    fn fail(op: &'static str, err: AuthError) -> AuthError {
        step(op, Step::Failed);
        debug!(op, error = %err, "Identity resolution failed");
        err
    }

    /// Sign in with a phone number.
    ///
    /// The demo phone number, or `use_built_in_demo`, resolves to the built-in
    /// demo profile without any network traffic.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoConnectivity`] when offline or the lookup fails.
    /// - [`AuthError::NotRegistered`] when no remote profile has this phone.
    /// - [`AuthError::Storage`] when the profile cannot be stored.
    pub async fn sign_in(&self, phone: &str, use_built_in_demo: bool) -> AuthResult<AuthOutcome> {
        const OP: &str = "sign_in";
        let phone = phone.trim();

        if use_built_in_demo || is_demo_phone(phone) {
            step(OP, Step::LocalFallback);
            info!("Signing in with the demo account");
            return self.resolve(OP, AuthOutcome::local(Profile::demo())).await;
        }

        if !self.reachable(OP).await {
            return Err(Self::fail(OP, AuthError::NoConnectivity));
        }

        step(OP, Step::RemoteCall);
        match self.directory.find_by_phone(phone).await {
            Ok(Some(profile)) => {
                info!(phone = %mask_phone(phone), "Signed in");
                self.resolve(OP, AuthOutcome::remote(profile)).await
            }
            Ok(None) => Err(Self::fail(
                OP,
                AuthError::NotRegistered {
                    phone: phone.to_string(),
                },
            )),
            Err(e) => {
                warn!(phone = %mask_phone(phone), error = %e, "Profile lookup failed");
                Err(Self::fail(OP, AuthError::NoConnectivity))
            }
        }
    }

    async fn create_local(&self, input: ProfileInput) -> AuthResult<AuthOutcome> {
        step("create_profile", Step::LocalFallback);
        let profile = Profile::local_from_input(input);
        info!(profile_id = %profile.id, "Created local-only profile");
        self.resolve("create_profile", AuthOutcome::local(profile))
            .await
    }

    /// Register a new profile.
    ///
    /// Offline, or when the remote cannot be reached mid-call, the profile is
    /// created on the device with a `local_` identifier instead.
    ///
    /// # Errors
    ///
    /// - [`AuthError::DuplicatePhone`] when the phone is already registered.
    /// - [`AuthError::NoConnectivity`] when the remote rejects the request.
    /// - [`AuthError::Storage`] when the profile cannot be stored.
    pub async fn create_profile(&self, input: ProfileInput) -> AuthResult<AuthOutcome> {
        const OP: &str = "create_profile";
        let input = input.normalized();

        if !self.reachable(OP).await {
            return self.create_local(input).await;
        }

        step(OP, Step::RemoteCall);
        match self.directory.find_by_phone(&input.phone).await {
            Ok(Some(_)) => {
                return Err(Self::fail(
                    OP,
                    AuthError::DuplicatePhone {
                        phone: input.phone,
                    },
                ));
            }
            Ok(None) => {}
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Duplicate check failed, creating profile locally");
                return self.create_local(input).await;
            }
            Err(e) => return Err(Self::fail(OP, surface(e))),
        }

        match self.directory.insert(&input).await {
            Ok(profile) => {
                info!(profile_id = %profile.id, "Registered profile");
                self.resolve(OP, AuthOutcome::remote(profile)).await
            }
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Insert failed, creating profile locally");
                self.create_local(input).await
            }
            Err(e) => Err(Self::fail(OP, surface(e))),
        }
    }

    async fn update_local(&self, id: &str, updates: &ProfileUpdate) -> AuthResult<AuthOutcome> {
        const OP: &str = "update_profile";
        step(OP, Step::LocalFallback);

        let mut profile = match self.store.get_profile().await {
            Ok(Some(profile)) if profile.id == id => profile,
            Ok(_) => return Err(Self::fail(OP, AuthError::NotFound { id: id.to_string() })),
            Err(e) => return Err(Self::fail(OP, e.into())),
        };

        updates.apply_to(&mut profile);
        profile.updated_at = Utc::now().max(profile.updated_at);
        debug!(profile_id = %id, "Merged update into stored profile");
        self.resolve(OP, AuthOutcome::local(profile)).await
    }

    async fn has_pending_for(&self, id: &str) -> AuthResult<bool> {
        if !self.store.has_pending_changes().await? {
            return Ok(false);
        }
        Ok(self.store.get_profile().await?.is_some_and(|p| p.id == id))
    }

    /// Send the whole stored profile over its remote row.
    async fn push_pending(&self, op: &'static str, profile: &Profile) -> AuthResult<AuthOutcome> {
        step(op, Step::RemoteCall);
        match self.directory.update(&profile.id, &profile.to_update()).await {
            Ok(remote) => {
                info!(profile_id = %remote.id, "Sent pending profile changes");
                self.resolve(op, AuthOutcome::remote(remote)).await
            }
            Err(e) => {
                warn!(profile_id = %profile.id, error = %e, "Pending changes not sent");
                Err(Self::fail(op, surface(e)))
            }
        }
    }

    /// Apply a partial update to a profile.
    ///
    /// Local-only and demo ids never touch the network. Remote ids fall back
    /// to a local merge when the remote is unreachable; the merge is kept as
    /// pending and sent with the next update or sync that reaches the remote.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotFound`] when the remote no longer has `id`, or no
    ///   stored profile matches `id` for a local merge.
    /// - [`AuthError::DuplicatePhone`] when a new phone is already taken.
    /// - [`AuthError::Storage`] when the profile cannot be read or stored.
    pub async fn update_profile(
        &self,
        id: &str,
        updates: &ProfileUpdate,
    ) -> AuthResult<AuthOutcome> {
        const OP: &str = "update_profile";

        if is_local_only_id(id) || !self.reachable(OP).await {
            return self.update_local(id, updates).await;
        }

        if self.has_pending_for(id).await? {
            let merged = self.update_local(id, updates).await?;
            return match self.push_pending(OP, &merged.profile).await {
                Err(AuthError::NoConnectivity) => Ok(merged),
                other => other,
            };
        }

        step(OP, Step::RemoteCall);
        match self.directory.update(id, updates).await {
            Ok(profile) => self.resolve(OP, AuthOutcome::remote(profile)).await,
            Err(e) if e.is_transport() => {
                warn!(profile_id = %id, error = %e, "Remote update failed, merging locally");
                self.update_local(id, updates).await
            }
            Err(e) => Err(Self::fail(OP, surface(e))),
        }
    }

    /// Change availability and, optionally, the last donation date.
    ///
    /// # Errors
    ///
    /// Same as [`update_profile`](Self::update_profile).
    pub async fn update_availability(
        &self,
        id: &str,
        is_active: bool,
        last_donation_date: Option<Option<NaiveDate>>,
    ) -> AuthResult<AuthOutcome> {
        let updates = ProfileUpdate {
            is_active: Some(is_active),
            last_donation_date,
            ..ProfileUpdate::default()
        };
        self.update_profile(id, &updates).await
    }

    /// Forget the current profile on this device. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store cannot be cleared.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.store.clear_profile().await?;
        debug!("Signed out");
        Ok(())
    }

    /// The current profile, read from the device only.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store cannot be read.
    pub async fn current_user(&self) -> AuthResult<Option<Profile>> {
        Ok(self.store.get_profile().await?)
    }

    /// Delete the current profile remotely, then sign out.
    ///
    /// Local-only and demo profiles are only removed from the device.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoConnectivity`] when a remote profile cannot be deleted.
    /// - [`AuthError::Storage`] when the store fails.
    pub async fn delete_profile(&self) -> AuthResult<()> {
        const OP: &str = "delete_profile";

        let Some(profile) = self.store.get_profile().await? else {
            return self.sign_out().await;
        };

        if !profile.is_local_only() {
            if !self.reachable(OP).await {
                return Err(Self::fail(OP, AuthError::NoConnectivity));
            }
            step(OP, Step::RemoteCall);
            if let Err(e) = self.directory.delete(&profile.id).await {
                warn!(profile_id = %profile.id, error = %e, "Remote delete failed");
                return Err(Self::fail(OP, AuthError::NoConnectivity));
            }
            info!(profile_id = %profile.id, "Deleted remote profile");
        }

        self.sign_out().await?;
        step(OP, Step::Resolved);
        Ok(())
    }

    /// Reconcile the stored profile with the directory.
    ///
    /// A local-only profile is registered remotely. A remote profile edited
    /// while offline has its stored fields written over the remote row.
    /// Returns `None` when nothing is signed in; demo profiles and remote
    /// profiles without pending changes come back as
    /// [`SyncOutcome::UpToDate`] without any network traffic.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoConnectivity`] when offline or the remote fails.
    /// - [`AuthError::DuplicatePhone`] when the phone was registered meanwhile.
    /// - [`AuthError::NotFound`] when the remote row is gone.
    /// - [`AuthError::Storage`] when the store fails.
    pub async fn sync_local_profile(&self) -> AuthResult<Option<SyncOutcome>> {
        const OP: &str = "sync_local_profile";

        let Some(profile) = self.store.get_profile().await? else {
            return Ok(None);
        };
        if profile.is_demo() {
            return Ok(Some(SyncOutcome::UpToDate(AuthOutcome::local(profile))));
        }
        let pending = !profile.is_local_only() && self.store.has_pending_changes().await?;
        if !profile.is_local_only() && !pending {
            return Ok(Some(SyncOutcome::UpToDate(AuthOutcome::remote(profile))));
        }

        if !self.reachable(OP).await {
            return Err(Self::fail(OP, AuthError::NoConnectivity));
        }

        if pending {
            let outcome = self.push_pending(OP, &profile).await?;
            return Ok(Some(SyncOutcome::Synced(outcome)));
        }

        step(OP, Step::RemoteCall);
        let input = profile.to_input();
        match self.directory.find_by_phone(&input.phone).await {
            Ok(Some(_)) => {
                return Err(Self::fail(
                    OP,
                    AuthError::DuplicatePhone {
                        phone: input.phone,
                    },
                ))
            }
            Ok(None) => {}
            Err(e) => return Err(Self::fail(OP, surface(e))),
        }

        let remote = self
            .directory
            .insert(&input)
            .await
            .map_err(|e| Self::fail(OP, surface(e)))?;
        info!(local_id = %profile.id, profile_id = %remote.id, "Synced local profile");
        let outcome = self.resolve(OP, AuthOutcome::remote(remote)).await?;
        Ok(Some(SyncOutcome::Synced(outcome)))
    }

    /// Search active donors, leaving out the signed-in user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoConnectivity`] when offline or the remote fails.
    /// - [`AuthError::Storage`] when the current profile cannot be read.
    pub async fn search_donors(&self, filters: &DonorFilters) -> AuthResult<Vec<Profile>> {
        const OP: &str = "search_donors";

        let mut filters = filters.clone();
        if filters.exclude_id.is_none() {
            filters.exclude_id = self.store.get_profile().await?.map(|p| p.id);
        }

        if !self.reachable(OP).await {
            return Err(Self::fail(OP, AuthError::NoConnectivity));
        }
        step(OP, Step::RemoteCall);
        let donors = self
            .directory
            .search(&filters)
            .await
            .map_err(|e| Self::fail(OP, surface(e)))?;
        step(OP, Step::Resolved);
        Ok(donors)
    }

    /// Total and available donor counts.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoConnectivity`] when offline or the remote fails.
    pub async fn donor_stats(&self) -> AuthResult<DonorStats> {
        const OP: &str = "donor_stats";

        if !self.reachable(OP).await {
            return Err(Self::fail(OP, AuthError::NoConnectivity));
        }
        step(OP, Step::RemoteCall);
        let stats = self
            .directory
            .stats()
            .await
            .map_err(|e| Self::fail(OP, surface(e)))?;
        step(OP, Step::Resolved);
        Ok(stats)
    }

    /// Remove every locally stored key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store cannot be cleared.
    pub async fn reset_local_data(&self) -> AuthResult<()> {
        self.store.reset().await?;
        info!("Local data reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BloodType, DEMO_NAME, DEMO_PHONE, DEMO_PROFILE_ID, LOCAL_ID_PREFIX};
    use crate::store::SqliteIdentityStore;
    use crate::testing::{
        ali_input, remote_profile, FailingStore, FakeDirectory, ScriptedConnectivity,
    };

    struct Harness {
        connectivity: Arc<ScriptedConnectivity>,
        directory: Arc<FakeDirectory>,
        store: Arc<SqliteIdentityStore>,
        resolver: IdentityResolver,
    }

    fn harness(online: bool, rows: Vec<Profile>) -> Harness {
        crate::logging::init_test_logging();
        let connectivity = Arc::new(ScriptedConnectivity::new(online));
        let directory = Arc::new(FakeDirectory::with_rows(rows));
        let store = Arc::new(SqliteIdentityStore::open_in_memory().unwrap());
        let resolver = IdentityResolver::new(connectivity.clone(), directory.clone(), store.clone());
        Harness {
            connectivity,
            directory,
            store,
            resolver,
        }
    }

    #[tokio::test]
    async fn test_demo_phone_makes_no_network_calls() {
        let h = harness(false, vec![]);

        let outcome = h.resolver.sign_in(" 07000001001 ", false).await.unwrap();

        assert_eq!(outcome.profile.id, DEMO_PROFILE_ID);
        assert_eq!(outcome.profile.name, DEMO_NAME);
        assert_eq!(h.connectivity.calls(), 0);
        assert_eq!(h.directory.calls(), 0);
        assert_eq!(h.store.get_profile().await.unwrap(), Some(outcome.profile));
    }

    #[tokio::test]
    async fn test_demo_flag_ignores_phone() {
        let h = harness(true, vec![]);

        let outcome = h.resolver.sign_in("07911111111", true).await.unwrap();

        assert_eq!(outcome.profile.phone, DEMO_PHONE);
        assert_eq!(h.connectivity.calls(), 0);
        assert_eq!(h.directory.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_phone_is_not_registered() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);

        let err = h.resolver.sign_in("07911111111", false).await.unwrap_err();

        assert!(matches!(err, AuthError::NotRegistered { ref phone } if phone == "07911111111"));
        assert!(err.needs_registration());
        assert!(h.store.get_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_stores_remote_profile() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);

        let outcome = h.resolver.sign_in("07711111111 ", false).await.unwrap();

        assert_eq!(outcome.profile.id, "r1");
        assert!(!outcome.is_local_only);
        assert_eq!(h.resolver.current_user().await.unwrap(), Some(outcome.profile));
    }

    #[tokio::test]
    async fn test_sign_in_offline() {
        let h = harness(false, vec![remote_profile("r1", "07711111111")]);

        let err = h.resolver.sign_in("07711111111", false).await.unwrap_err();

        assert!(matches!(err, AuthError::NoConnectivity));
        assert_eq!(h.directory.calls(), 0);
    }

    #[tokio::test]
    async fn test_sign_in_remote_failures_are_no_connectivity() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);

        h.directory.set_online(false);
        let err = h.resolver.sign_in("07711111111", false).await.unwrap_err();
        assert!(matches!(err, AuthError::NoConnectivity));

        h.directory.set_online(true);
        h.directory.set_reject(true);
        let err = h.resolver.sign_in("07711111111", false).await.unwrap_err();
        assert!(matches!(err, AuthError::NoConnectivity));
    }

    #[tokio::test]
    async fn test_create_offline_is_local_only() {
        let h = harness(false, vec![]);

        let outcome = h.resolver.create_profile(ali_input()).await.unwrap();

        assert!(outcome.is_local_only);
        assert!(outcome.profile.id.starts_with(LOCAL_ID_PREFIX));
        assert_eq!(outcome.profile.name, "Ali");
        assert_eq!(outcome.profile.blood_type, BloodType::OPositive);
        assert_eq!(h.directory.calls(), 0);
        assert_eq!(h.store.get_profile().await.unwrap(), Some(outcome.profile));
    }

    #[tokio::test]
    async fn test_create_online_then_current_user() {
        let h = harness(true, vec![]);

        let outcome = h.resolver.create_profile(ali_input()).await.unwrap();

        assert!(!outcome.is_local_only);
        assert_eq!(outcome.profile.id, "remote-1");
        assert_eq!(h.directory.rows().len(), 1);
        assert_eq!(h.resolver.current_user().await.unwrap(), Some(outcome.profile));
    }

    #[tokio::test]
    async fn test_create_duplicate_phone() {
        let h = harness(true, vec![remote_profile("r1", "07901234567")]);

        let err = h.resolver.create_profile(ali_input()).await.unwrap_err();

        assert!(matches!(err, AuthError::DuplicatePhone { ref phone } if phone == "07901234567"));
        assert_eq!(h.directory.rows().len(), 1);
        assert!(h.store.get_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_insert_conflict_is_duplicate() {
        let h = harness(true, vec![remote_profile("r1", "07901234567")]);
        h.directory.set_stale_lookups(true);

        let err = h.resolver.create_profile(ali_input()).await.unwrap_err();

        assert!(matches!(err, AuthError::DuplicatePhone { ref phone } if phone == "07901234567"));
        assert_eq!(h.directory.calls(), 2);
        assert_eq!(h.directory.rows().len(), 1);
        assert!(h.store.get_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_transport_failure_falls_back_locally() {
        let h = harness(true, vec![]);
        h.directory.set_online(false);

        let outcome = h.resolver.create_profile(ali_input()).await.unwrap();

        assert!(outcome.is_local_only);
        assert!(outcome.profile.is_local_only());
        assert_eq!(h.directory.calls(), 1);
    }

    #[tokio::test]
    async fn test_create_rejection_is_surfaced() {
        let h = harness(true, vec![]);
        h.directory.set_reject(true);

        let err = h.resolver.create_profile(ali_input()).await.unwrap_err();

        assert!(matches!(err, AuthError::NoConnectivity));
        assert!(h.store.get_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_twice() {
        let h = harness(false, vec![]);
        h.resolver.create_profile(ali_input()).await.unwrap();

        h.resolver.sign_out().await.unwrap();
        assert!(h.store.get_profile().await.unwrap().is_none());
        h.resolver.sign_out().await.unwrap();
        assert!(h.store.get_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_local_id_makes_no_remote_calls() {
        let h = harness(true, vec![]);
        h.connectivity.set(false);
        let created = h.resolver.create_profile(ali_input()).await.unwrap().profile;
        h.connectivity.set(true);
        let calls_before = h.connectivity.calls();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let updates = ProfileUpdate {
            city: Some("الكاظمية".to_string()),
            notes: Some(Some("evenings only".to_string())),
            ..ProfileUpdate::default()
        };
        let outcome = h.resolver.update_profile(&created.id, &updates).await.unwrap();

        assert!(outcome.is_local_only);
        assert_eq!(h.directory.calls(), 0);
        assert_eq!(h.connectivity.calls(), calls_before);
        assert_eq!(outcome.profile.city, "الكاظمية");
        assert_eq!(outcome.profile.notes.as_deref(), Some("evenings only"));
        assert_eq!(outcome.profile.name, "Ali");
        assert!(outcome.profile.updated_at > created.updated_at);
        assert_eq!(h.store.get_profile().await.unwrap(), Some(outcome.profile));
    }

    #[tokio::test]
    async fn test_update_demo_is_local() {
        let h = harness(true, vec![]);
        h.resolver.sign_in(DEMO_PHONE, false).await.unwrap();

        let outcome = h
            .resolver
            .update_availability(DEMO_PROFILE_ID, false, None)
            .await
            .unwrap();

        assert!(!outcome.profile.is_active);
        assert_eq!(h.directory.calls(), 0);
    }

    #[tokio::test]
    async fn test_update_remote_success() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 5, 1);
        let outcome = h
            .resolver
            .update_availability("r1", false, Some(date))
            .await
            .unwrap();

        assert!(!outcome.is_local_only);
        assert!(!outcome.profile.is_active);
        assert_eq!(outcome.profile.last_donation_date, date);
        assert!(!h.directory.rows()[0].is_active);
    }

    #[tokio::test]
    async fn test_update_transport_failure_merges_locally() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();
        h.directory.set_online(false);

        let updates = ProfileUpdate {
            name: Some("Sara Ali".to_string()),
            ..ProfileUpdate::default()
        };
        let outcome = h.resolver.update_profile("r1", &updates).await.unwrap();

        assert!(outcome.is_local_only);
        assert_eq!(outcome.profile.id, "r1");
        assert_eq!(outcome.profile.name, "Sara Ali");
        assert_eq!(h.directory.rows()[0].name, "Sara");
    }

    #[tokio::test]
    async fn test_update_offline_merges_locally() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();
        h.connectivity.set(false);
        let calls_before = h.directory.calls();

        let updates = ProfileUpdate {
            is_active: Some(false),
            ..ProfileUpdate::default()
        };
        let outcome = h.resolver.update_profile("r1", &updates).await.unwrap();

        assert!(outcome.is_local_only);
        assert!(!outcome.profile.is_active);
        assert_eq!(h.directory.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_update_not_found_has_no_fallback() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();
        let before = h.store.get_profile().await.unwrap();

        let updates = ProfileUpdate {
            city: Some("x".to_string()),
            ..ProfileUpdate::default()
        };
        let err = h.resolver.update_profile("r9", &updates).await.unwrap_err();

        assert!(matches!(err, AuthError::NotFound { ref id } if id == "r9"));
        assert_eq!(h.store.get_profile().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_local_update_without_stored_profile() {
        let h = harness(false, vec![]);

        let err = h
            .resolver
            .update_profile("local_deadbeef", &ProfileUpdate::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let connectivity = Arc::new(ScriptedConnectivity::new(false));
        let directory = Arc::new(FakeDirectory::default());
        let resolver = IdentityResolver::new(connectivity, directory, Arc::new(FailingStore));

        let err = resolver.sign_in(DEMO_PHONE, false).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));

        let err = resolver.create_profile(ali_input()).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));

        assert!(matches!(
            resolver.sign_out().await.unwrap_err(),
            AuthError::Storage(_)
        ));
        assert!(matches!(
            resolver.current_user().await.unwrap_err(),
            AuthError::Storage(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_remote_profile() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();

        h.resolver.delete_profile().await.unwrap();

        assert!(h.directory.rows().is_empty());
        assert!(h.store.get_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_offline_keeps_profile() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();
        h.connectivity.set(false);

        let err = h.resolver.delete_profile().await.unwrap_err();

        assert!(matches!(err, AuthError::NoConnectivity));
        assert!(h.store.get_profile().await.unwrap().is_some());
        assert_eq!(h.directory.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_local_profile_is_local() {
        let h = harness(false, vec![]);
        h.resolver.create_profile(ali_input()).await.unwrap();

        h.resolver.delete_profile().await.unwrap();

        assert_eq!(h.directory.calls(), 0);
        assert!(h.store.get_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_local_profile() {
        let h = harness(false, vec![]);
        let local = h.resolver.create_profile(ali_input()).await.unwrap().profile;
        h.connectivity.set(true);

        let synced = h
            .resolver
            .sync_local_profile()
            .await
            .unwrap()
            .unwrap()
            .into_outcome();

        assert!(!synced.is_local_only);
        assert_eq!(synced.profile.phone, local.phone);
        assert_ne!(synced.profile.id, local.id);
        assert_eq!(h.store.get_profile().await.unwrap(), Some(synced.profile));
    }

    #[tokio::test]
    async fn test_sync_offline_and_duplicate() {
        let h = harness(false, vec![remote_profile("r1", "07901234567")]);
        h.resolver.create_profile(ali_input()).await.unwrap();

        let err = h.resolver.sync_local_profile().await.unwrap_err();
        assert!(matches!(err, AuthError::NoConnectivity));

        h.connectivity.set(true);
        let err = h.resolver.sync_local_profile().await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicatePhone { .. }));
        assert!(h.store.get_profile().await.unwrap().unwrap().is_local_only());
    }

    #[tokio::test]
    async fn test_sync_remote_profile_is_unchanged() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        assert!(h.resolver.sync_local_profile().await.unwrap().is_none());

        let signed_in = h.resolver.sign_in("07711111111", false).await.unwrap();
        let calls_before = h.directory.calls();

        let synced = h.resolver.sync_local_profile().await.unwrap().unwrap();
        assert_eq!(synced, SyncOutcome::UpToDate(signed_in));
        assert!(!synced.was_sent());
        assert_eq!(h.directory.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_sync_sends_offline_edit_of_remote_profile() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();
        h.connectivity.set(false);

        let updates = ProfileUpdate {
            name: Some("Offline Edit".to_string()),
            notes: Some(Some("after 5pm".to_string())),
            ..ProfileUpdate::default()
        };
        let merged = h.resolver.update_profile("r1", &updates).await.unwrap();
        assert!(merged.is_local_only);
        assert!(h.store.has_pending_changes().await.unwrap());

        let err = h.resolver.sync_local_profile().await.unwrap_err();
        assert!(matches!(err, AuthError::NoConnectivity));
        assert!(h.store.has_pending_changes().await.unwrap());

        h.connectivity.set(true);
        let calls_before = h.directory.calls();
        let synced = h.resolver.sync_local_profile().await.unwrap().unwrap();

        assert!(synced.was_sent());
        assert!(!synced.outcome().is_local_only);
        assert_eq!(synced.outcome().profile.id, "r1");
        assert_eq!(h.directory.calls(), calls_before + 1);
        assert_eq!(h.directory.rows()[0].name, "Offline Edit");
        assert_eq!(h.directory.rows()[0].notes.as_deref(), Some("after 5pm"));
        assert!(!h.store.has_pending_changes().await.unwrap());

        let again = h.resolver.sign_in("07711111111", false).await.unwrap();
        assert_eq!(again.profile.name, "Offline Edit");
    }

    #[tokio::test]
    async fn test_online_update_sends_earlier_offline_edit() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();
        h.directory.set_online(false);

        let rename = ProfileUpdate {
            name: Some("Sara Ali".to_string()),
            ..ProfileUpdate::default()
        };
        h.resolver.update_profile("r1", &rename).await.unwrap();
        assert!(h.store.has_pending_changes().await.unwrap());

        h.directory.set_online(true);
        let outcome = h
            .resolver
            .update_availability("r1", false, None)
            .await
            .unwrap();

        assert!(!outcome.is_local_only);
        assert_eq!(h.directory.rows()[0].name, "Sara Ali");
        assert!(!h.directory.rows()[0].is_active);
        assert!(!h.store.has_pending_changes().await.unwrap());
    }

    #[tokio::test]
    async fn test_sign_in_discards_pending_mark() {
        let h = harness(true, vec![remote_profile("r1", "07711111111")]);
        h.resolver.sign_in("07711111111", false).await.unwrap();
        h.connectivity.set(false);
        h.resolver
            .update_availability("r1", false, None)
            .await
            .unwrap();
        assert!(h.store.has_pending_changes().await.unwrap());

        h.resolver.sign_in(DEMO_PHONE, false).await.unwrap();

        assert!(!h.store.has_pending_changes().await.unwrap());
    }

    #[tokio::test]
    async fn test_search_excludes_current_user() {
        let h = harness(
            true,
            vec![
                remote_profile("r1", "07711111111"),
                remote_profile("r2", "07722222222"),
            ],
        );
        h.resolver.sign_in("07711111111", false).await.unwrap();

        let donors = h.resolver.search_donors(&DonorFilters::default()).await.unwrap();

        assert_eq!(donors.len(), 1);
        assert_eq!(donors[0].id, "r2");
    }

    #[tokio::test]
    async fn test_search_and_stats_need_connectivity() {
        let h = harness(false, vec![remote_profile("r1", "07711111111")]);

        let err = h.resolver.search_donors(&DonorFilters::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::NoConnectivity));
        let err = h.resolver.donor_stats().await.unwrap_err();
        assert!(matches!(err, AuthError::NoConnectivity));

        h.connectivity.set(true);
        let stats = h.resolver.donor_stats().await.unwrap();
        assert_eq!(stats.total_donors, 1);
        assert_eq!(stats.available_donors, 1);
    }

    #[tokio::test]
    async fn test_reset_local_data() {
        let h = harness(false, vec![]);
        h.resolver.create_profile(ali_input()).await.unwrap();
        h.store.set_guest_mode(true).await.unwrap();

        h.resolver.reset_local_data().await.unwrap();

        assert!(h.store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_surface_mapping() {
        assert!(matches!(
            surface(DirectoryError::NotFound("x".to_string())),
            AuthError::NotFound { .. }
        ));
        assert!(matches!(
            surface(DirectoryError::DuplicatePhone("0790".to_string())),
            AuthError::DuplicatePhone { .. }
        ));
        assert!(matches!(
            surface(DirectoryError::unavailable("down")),
            AuthError::NoConnectivity
        ));
    }
}
