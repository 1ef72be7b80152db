//! Local identity store.
//!
//! Holds the single "current profile" record and the guest-mode flag in a
//! small `SQLite` key-value table. Every operation runs under one connection
//! lock, so a reader never sees a half-written profile.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::profile::Profile;

/// Key holding the serialized current profile.
pub const CURRENT_USER_KEY: &str = "@sanad_current_user";

/// Key holding the guest-mode flag.
pub const GUEST_MODE_KEY: &str = "@sanad_guest_mode";

/// Key flagging edits to a remote profile that the directory has not seen.
pub const PENDING_CHANGES_KEY: &str = "@sanad_pending_changes";

/// Key fragments left behind by older app versions.
pub const LEGACY_KEY_FRAGMENTS: &[&str] = &["userSession", "userData", "donors", "oldProfile"];

/// Durable storage for the device's identity.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Read the current profile, if any.
    async fn get_profile(&self) -> Result<Option<Profile>>;

    /// Replace the current profile.
    async fn set_profile(&self, profile: &Profile) -> Result<()>;

    /// Remove the current profile and its pending-changes flag. Removing an
    /// absent profile is not an error.
    async fn clear_profile(&self) -> Result<()>;

    /// Whether the current profile carries edits not yet sent to the
    /// directory.
    async fn has_pending_changes(&self) -> Result<bool>;

    /// Mark or clear unsent edits on the current profile.
    async fn set_pending_changes(&self, pending: bool) -> Result<()>;

    /// Whether guest mode is persisted as on.
    async fn guest_mode(&self) -> Result<bool>;

    /// Persist guest mode on or off.
    async fn set_guest_mode(&self, enabled: bool) -> Result<()>;

    /// Remove every stored key.
    async fn reset(&self) -> Result<()>;
}

/// `SQLite`-backed [`IdentityStore`].
#[derive(Debug)]
pub struct SqliteIdentityStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl SqliteIdentityStore {
    /// Open or create an identity database at the given path.
    ///
    /// Creates parent directories as needed, initializes the schema and
    /// removes keys left by older app versions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening identity store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        let store = Self {
            path,
            conn: Mutex::new(conn),
        };
        store.purge_legacy_keys()?;

        info!("Identity store opened at {}", store.path.display());
        Ok(store)
    }

    /// Create an in-memory store, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("identity store lock poisoned"))
    }

    /// Read a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .lock()?
            .query_row("SELECT value FROM identity WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a raw value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_value(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO identity (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove a raw value. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_value(&self, key: &str) -> Result<bool> {
        let affected = self
            .lock()?
            .execute("DELETE FROM identity WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// List every stored key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM identity ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Remove keys written by older app versions.
    ///
    /// Returns the number of keys removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn purge_legacy_keys(&self) -> Result<usize> {
        let conn = self.lock()?;
        let mut removed = 0;
        for fragment in LEGACY_KEY_FRAGMENTS {
            removed += conn.execute(
                "DELETE FROM identity WHERE instr(key, ?1) > 0",
                [fragment],
            )?;
        }
        if removed > 0 {
            info!("Removed {} legacy identity keys", removed);
        }
        Ok(removed)
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn get_profile(&self) -> Result<Option<Profile>> {
        match self.get_value(CURRENT_USER_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_profile(&self, profile: &Profile) -> Result<()> {
        let json = serde_json::to_string(profile)?;
        self.put_value(CURRENT_USER_KEY, &json)?;
        debug!(profile_id = %profile.id, "Stored current profile");
        Ok(())
    }

    async fn clear_profile(&self) -> Result<()> {
        self.remove_value(PENDING_CHANGES_KEY)?;
        if self.remove_value(CURRENT_USER_KEY)? {
            debug!("Cleared current profile");
        }
        Ok(())
    }

    async fn has_pending_changes(&self) -> Result<bool> {
        Ok(self.get_value(PENDING_CHANGES_KEY)?.as_deref() == Some("true"))
    }

    async fn set_pending_changes(&self, pending: bool) -> Result<()> {
        if pending {
            self.put_value(PENDING_CHANGES_KEY, "true")
        } else {
            self.remove_value(PENDING_CHANGES_KEY).map(|_| ())
        }
    }

    async fn guest_mode(&self) -> Result<bool> {
        Ok(self.get_value(GUEST_MODE_KEY)?.as_deref() == Some("true"))
    }

    async fn set_guest_mode(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.put_value(GUEST_MODE_KEY, "true")
        } else {
            self.remove_value(GUEST_MODE_KEY).map(|_| ())
        }
    }

    async fn reset(&self) -> Result<()> {
        let affected = self.lock()?.execute("DELETE FROM identity", [])?;
        info!("Cleared {} identity keys", affected);
        Ok(())
    }
}
