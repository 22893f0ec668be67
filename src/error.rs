//! Error types for nimpkgdir.

use thiserror::Error;

/// Main error type for nimpkgdir.
#[derive(Error, Debug)]
pub enum DirError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    NetworkMessage(String),

    #[error("Package '{0}' not found")]
    PackageNotFound(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Package name collision: '{new}' clashes with existing package '{existing}'")]
    NameCollision { new: String, existing: String },

    #[error("Update signature verification failed")]
    InvalidSignature,

    #[error("Public key error: {0}")]
    PublicKey(String),

    #[error("No install root found for package '{0}'")]
    InstallRootNotFound(String),

    #[error("Invalid doc path: {0}")]
    InvalidDocPath(String),
}

/// Result type alias for nimpkgdir operations.
pub type Result<T> = std::result::Result<T, DirError>;
