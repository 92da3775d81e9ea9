//! Error types for the auth module

use std::path::PathBuf;
use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type for token cache persistence
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while acquiring credentials
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token has expired and could not be renewed silently
    #[error("Token has expired")]
    TokenExpired,

    /// Cached token carries no refresh token
    #[error("No refresh token available")]
    NoRefreshToken,

    /// OAuth2 authorization failed
    #[error("OAuth2 authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Token exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Failed to start local callback server
    #[error("Failed to start callback server: {0}")]
    CallbackServerFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by the durable token cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache file exists but could not be read
    #[error("Failed to read token cache {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache file could not be written
    #[error("Failed to write token cache {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cross-process lock file could not be acquired
    #[error("Failed to lock token cache {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache contents could not be encoded
    #[error("Failed to encode token cache: {0}")]
    Encode(#[from] serde_json::Error),
}
