//! Core orchestration for MailRelay
//!
//! Ties the token cache, the identity provider and a mail transport into a
//! single send operation, configured from the environment.

mod config;
mod dispatch;
mod error;

pub use config::{vars, FlowKind, RelayConfig, TransportKind};
pub use dispatch::{AcquiredToken, DispatchReport, EmailDispatchFlow, TokenSource};
pub use error::{ConfigError, CoreError, CoreResult};
