//! `sanad` - Offline-tolerant identity layer for a blood donor registry.
//!
//! A donor signs in with a phone number, registers a profile and keeps it
//! current. When the remote directory cannot be reached, registration and
//! updates fall back to a profile kept on the device, which can be synced
//! later.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod directory;
pub mod error;
pub mod logging;
pub mod profile;
pub mod resolver;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use directory::{DirectoryError, DonorFilters, DonorStats, ProfileDirectory, RestDirectory};
pub use error::{AuthError, AuthResult, Error, Result};
pub use logging::init_logging;
pub use profile::{BloodType, ContactPreference, Profile, ProfileInput, ProfileUpdate};
pub use resolver::{AuthOutcome, IdentityResolver, SyncOutcome};
pub use session::{Session, SessionContext, SessionError};
pub use store::{IdentityStore, SqliteIdentityStore};
