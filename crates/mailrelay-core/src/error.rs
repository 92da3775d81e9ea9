//! Error types for the core module

use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that end a dispatch
///
/// Token cache failures never show up here: a cache that cannot be read is
/// a miss and one that cannot be written is only logged.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The identity provider did not issue a token
    #[error("Credential acquisition failed: {0}")]
    CredentialAcquisition(#[from] mailrelay_auth::AuthError),

    /// The transport did not accept the message
    #[error("Transport error: {0}")]
    Transport(#[from] mailrelay_smtp::SmtpError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Problems with environment or command line settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is not set
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    /// A setting could not be parsed
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
