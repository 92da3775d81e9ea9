//! Mail transports for MailRelay
//!
//! Sends a composed message either over SMTP, authenticating with XOAUTH2,
//! or through the Microsoft Graph `sendMail` endpoint.

mod client;
mod error;
mod message;
pub mod msgraph;
mod transport;

pub use client::SmtpClient;
pub use error::{SmtpError, SmtpResult};
pub use message::{build_lettre_message, OutgoingAttachment, OutgoingMessage};
pub use msgraph::GraphClient;
pub use transport::MailTransport;
