//! Error types for sanad.
//!
//! `Error` covers host-level failures (database, configuration, I/O). The
//! identity layer's own taxonomy lives in [`AuthError`]; it is what the
//! resolver and session context hand back to callers.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for host-level sanad operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Remote Errors ===
    /// The HTTP client for the profile directory could not be built.
    #[error("failed to build directory client: {0}")]
    HttpClient(#[from] reqwest::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for host-level sanad operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }
}

/// Failures surfaced by the identity resolver.
///
/// This is the complete set of outcomes a caller can observe besides success.
/// Raw transport errors never cross the resolver boundary.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Connectivity is unavailable, or the remote failed during sign-in.
    #[error("no connectivity")]
    NoConnectivity,

    /// Sign-in found no remote profile for the phone number.
    #[error("phone number {phone} is not registered")]
    NotRegistered {
        /// The trimmed phone number that was looked up.
        phone: String,
    },

    /// Registration hit an existing phone number.
    #[error("phone number {phone} is already registered")]
    DuplicatePhone {
        /// The conflicting phone number.
        phone: String,
    },

    /// An update targeted a remote profile that no longer exists.
    #[error("profile {id} not found")]
    NotFound {
        /// The identifier that was not found.
        id: String,
    },

    /// The local persistence primitive failed.
    #[error("local storage failed: {0}")]
    Storage(#[source] Error),
}

/// Result type returned by the identity resolver.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

impl From<Error> for AuthError {
    fn from(err: Error) -> Self {
        Self::Storage(err)
    }
}

impl AuthError {
    /// Localized message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoConnectivity => "لا يوجد اتصال بالإنترنت. يرجى المحاولة لاحقاً",
            Self::NotRegistered { .. } => "رقم الهاتف غير مسجل. يرجى التسجيل أولاً",
            Self::DuplicatePhone { .. } => "رقم الهاتف مسجل مسبقاً",
            Self::NotFound { .. } => "لم يتم العثور على بيانات المستخدم",
            Self::Storage(_) => "حدث خطأ في التخزين المحلي",
        }
    }

    /// Whether retrying the same call later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoConnectivity)
    }

    /// Whether the caller should route the user to registration.
    #[must_use]
    pub fn needs_registration(&self) -> bool {
        matches!(self, Self::NotRegistered { .. })
    }
}
