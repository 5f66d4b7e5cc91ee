//! Error types for the secret store

use std::path::PathBuf;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The import link is not an `otpauth://totp/` URI we understand
    #[error("malformed otpauth link: {0}")]
    MalformedUri(String),

    /// The secret is present but is not valid base32
    #[error("invalid OTP secret (base32)")]
    InvalidSecret,

    /// The batch export payload or portable file content cannot be decoded
    #[error("malformed import payload: {0}")]
    MalformedPayload(String),

    /// A portable export file with a version we do not read
    #[error("unsupported store version {0}")]
    UnsupportedVersion(i32),

    /// Ciphertext cannot be decrypted with the current protection key
    #[error("cannot decrypt secret: {0}")]
    Decrypt(String),

    /// Encryption failed
    #[error("cannot protect secret: {0}")]
    Protect(String),

    /// Store file exists but does not parse
    #[error("store file {} is corrupt: {source}", path.display())]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// OS keyring access failed
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// No entry with the given identity
    #[error("entry not found")]
    EntryNotFound,

    /// Entry names must not be empty
    #[error("entry name cannot be empty")]
    EmptyName,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timestamp formatting error
    #[error("time format error: {0}")]
    Timestamp(#[from] time::error::Format),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
