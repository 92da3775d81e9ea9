//! Error types for mail transports

use thiserror::Error;

/// Result type for send operations
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Errors that can occur while composing or sending a message
#[derive(Debug, Error)]
pub enum SmtpError {
    /// Connection failed
    #[error("Failed to connect to SMTP server: {0}")]
    ConnectionFailed(String),

    /// Failed to send message
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// The mail API rejected the request
    #[error("Graph API returned {status}: {body}")]
    ApiError { status: u16, body: String },

    /// Invalid email address
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message has nobody to deliver to
    #[error("Message has no recipients")]
    NoRecipients,

    /// Message building error
    #[error("Failed to build message: {0}")]
    MessageBuildError(String),

    /// Attachment could not be read
    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
