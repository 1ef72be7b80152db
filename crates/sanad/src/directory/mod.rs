//! Remote profile directory.
//!
//! The directory is the remote table of donor profiles. Every call returns a
//! [`DirectoryError`] that says whether the remote was unreachable or
//! reachable but said no, so callers can pick a fallback without inspecting
//! transport details.

pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{BloodType, Profile, ProfileInput, ProfileUpdate};

pub use rest::RestDirectory;

/// Maximum number of donors returned by a search.
pub const SEARCH_LIMIT: usize = 50;

/// Failure of a directory call.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The remote could not be reached or did not answer.
    #[error("profile directory unreachable: {0}")]
    Unavailable(String),

    /// The phone number is already registered remotely.
    #[error("phone number {0} already registered")]
    DuplicatePhone(String),

    /// No remote profile has this identifier.
    #[error("profile {0} not found")]
    NotFound(String),

    /// The remote answered and refused the request.
    #[error("profile directory rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Backend error code, when one was provided.
        code: Option<String>,
        /// Backend error message.
        message: String,
    },
}

/// Result type for directory calls.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

impl DirectoryError {
    /// Whether the failure happened below the application layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Filters for donor search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorFilters {
    /// Only donors with this blood type.
    pub blood_type: Option<BloodType>,
    /// Only donors in this governorate.
    pub governorate: Option<String>,
    /// Only donors in this city.
    pub city: Option<String>,
    /// Leave this profile out of the results.
    pub exclude_id: Option<String>,
}

/// Donor counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorStats {
    /// All registered donors.
    pub total_donors: u64,
    /// Donors marked available.
    pub available_donors: u64,
}

/// Remote store of donor profiles.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Look up a profile by exact phone number (whitespace trimmed).
    async fn find_by_phone(&self, phone: &str) -> DirectoryResult<Option<Profile>>;

    /// Insert a new profile.
    ///
    /// The remote unique constraint on phone is authoritative; a violation is
    /// reported as [`DirectoryError::DuplicatePhone`].
    async fn insert(&self, input: &ProfileInput) -> DirectoryResult<Profile>;

    /// Apply a partial update. Only fields present in `update` are sent.
    async fn update(&self, id: &str, update: &ProfileUpdate) -> DirectoryResult<Profile>;

    /// Delete a profile. Deleting a missing profile is not an error.
    async fn delete(&self, id: &str) -> DirectoryResult<()>;

    /// Active donors matching `filters`, newest first, at most [`SEARCH_LIMIT`].
    async fn search(&self, filters: &DonorFilters) -> DirectoryResult<Vec<Profile>>;

    /// Total and available donor counts.
    async fn stats(&self) -> DirectoryResult<DonorStats>;
}
