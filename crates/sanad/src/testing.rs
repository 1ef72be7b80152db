//! Test doubles shared by the resolver and session tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::connectivity::ConnectivityOracle;
use crate::directory::{
    DirectoryError, DirectoryResult, DonorFilters, DonorStats, ProfileDirectory, SEARCH_LIMIT,
};
use crate::error::{Error, Result};
use crate::profile::{BloodType, Profile, ProfileInput, ProfileUpdate};
use crate::store::{IdentityStore, SqliteIdentityStore};

/// Oracle whose answer can be flipped mid-test.
#[derive(Debug)]
pub struct ScriptedConnectivity {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedConnectivity {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityOracle for ScriptedConnectivity {
    async fn is_reachable(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

/// In-memory directory with a call counter.
///
/// When `online` is false every call fails with `Unavailable`, which models a
/// transport failure after the oracle already said "reachable".
#[derive(Debug)]
pub struct FakeDirectory {
    rows: Mutex<Vec<Profile>>,
    online: AtomicBool,
    reject: AtomicBool,
    stale_lookups: AtomicBool,
    calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl Default for FakeDirectory {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            reject: AtomicBool::new(false),
            stale_lookups: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl FakeDirectory {
    pub fn with_rows(rows: Vec<Profile>) -> Self {
        let directory = Self::default();
        *directory.rows.lock().unwrap() = rows;
        directory
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make every call fail with a 500 rejection.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Make `find_by_phone` miss every row while `insert` still enforces
    /// unique phones, as when another device registers between the two calls.
    pub fn set_stale_lookups(&self, stale: bool) {
        self.stale_lookups.store(stale, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<Profile> {
        self.rows.lock().unwrap().clone()
    }

    fn enter(&self) -> DirectoryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(DirectoryError::unavailable("connection refused"));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(DirectoryError::Rejected {
                status: 500,
                code: None,
                message: "internal server error".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for FakeDirectory {
    async fn find_by_phone(&self, phone: &str) -> DirectoryResult<Option<Profile>> {
        self.enter()?;
        if self.stale_lookups.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let phone = phone.trim();
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.phone == phone)
            .cloned())
    }

    async fn insert(&self, input: &ProfileInput) -> DirectoryResult<Profile> {
        self.enter()?;
        let mut rows = self.rows.lock().unwrap();
        let input = input.clone().normalized();
        if rows.iter().any(|p| p.phone == input.phone) {
            return Err(DirectoryError::DuplicatePhone(input.phone));
        }

        let mut profile = Profile::local_from_input(input);
        profile.id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        rows.push(profile.clone());
        Ok(profile)
    }

    async fn update(&self, id: &str, update: &ProfileUpdate) -> DirectoryResult<Profile> {
        self.enter()?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;
        update.apply_to(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, id: &str) -> DirectoryResult<()> {
        self.enter()?;
        self.rows.lock().unwrap().retain(|p| p.id != id);
        Ok(())
    }

    async fn search(&self, filters: &DonorFilters) -> DirectoryResult<Vec<Profile>> {
        self.enter()?;
        let mut found: Vec<Profile> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active)
            .filter(|p| filters.exclude_id.as_deref() != Some(p.id.as_str()))
            .filter(|p| filters.blood_type.map_or(true, |bt| p.blood_type == bt))
            .filter(|p| filters.governorate.as_deref().map_or(true, |g| p.governorate == g))
            .filter(|p| filters.city.as_deref().map_or(true, |c| p.city == c))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(SEARCH_LIMIT);
        Ok(found)
    }

    async fn stats(&self) -> DirectoryResult<DonorStats> {
        self.enter()?;
        let rows = self.rows.lock().unwrap();
        Ok(DonorStats {
            total_donors: rows.len() as u64,
            available_donors: rows.iter().filter(|p| p.is_active).count() as u64,
        })
    }
}

/// Store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl IdentityStore for FailingStore {
    async fn get_profile(&self) -> Result<Option<Profile>> {
        Err(Error::internal("storage offline"))
    }

    async fn set_profile(&self, _profile: &Profile) -> Result<()> {
        Err(Error::internal("storage offline"))
    }

    async fn clear_profile(&self) -> Result<()> {
        Err(Error::internal("storage offline"))
    }

    async fn has_pending_changes(&self) -> Result<bool> {
        Err(Error::internal("storage offline"))
    }

    async fn set_pending_changes(&self, _pending: bool) -> Result<()> {
        Err(Error::internal("storage offline"))
    }

    async fn guest_mode(&self) -> Result<bool> {
        Err(Error::internal("storage offline"))
    }

    async fn set_guest_mode(&self, _enabled: bool) -> Result<()> {
        Err(Error::internal("storage offline"))
    }

    async fn reset(&self) -> Result<()> {
        Err(Error::internal("storage offline"))
    }
}

/// In-memory store whose guest flag cannot be written.
#[derive(Debug)]
pub struct GuestFlagFailingStore {
    inner: SqliteIdentityStore,
}

impl GuestFlagFailingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteIdentityStore::open_in_memory().unwrap(),
        }
    }
}

#[async_trait]
impl IdentityStore for GuestFlagFailingStore {
    async fn get_profile(&self) -> Result<Option<Profile>> {
        self.inner.get_profile().await
    }

    async fn set_profile(&self, profile: &Profile) -> Result<()> {
        self.inner.set_profile(profile).await
    }

    async fn clear_profile(&self) -> Result<()> {
        self.inner.clear_profile().await
    }

    async fn has_pending_changes(&self) -> Result<bool> {
        self.inner.has_pending_changes().await
    }

    async fn set_pending_changes(&self, pending: bool) -> Result<()> {
        self.inner.set_pending_changes(pending).await
    }

    async fn guest_mode(&self) -> Result<bool> {
        self.inner.guest_mode().await
    }

    async fn set_guest_mode(&self, _enabled: bool) -> Result<()> {
        Err(Error::internal("guest flag is read-only"))
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }
}

pub fn ali_input() -> ProfileInput {
    ProfileInput::new("Ali", "07901234567", BloodType::OPositive, "بغداد", "الكرخ")
}

/// A profile as the directory would hand it back.
pub fn remote_profile(id: &str, phone: &str) -> Profile {
    let mut profile = Profile::local_from_input(ProfileInput::new(
        "Sara",
        phone,
        BloodType::ANegative,
        "البصرة",
        "الزبير",
    ));
    profile.id = id.to_string();
    profile
}
