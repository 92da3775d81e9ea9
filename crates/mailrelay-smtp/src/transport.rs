//! Transport abstraction

use crate::{OutgoingMessage, SmtpResult};
use async_trait::async_trait;
use mailrelay_auth::XOAuth2Token;

/// Delivers a composed message using a bearer credential
///
/// One call is one attempt. Implementations do not retry.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name for logs and reports
    fn name(&self) -> &str;

    async fn send(&self, message: &OutgoingMessage, credential: &XOAuth2Token) -> SmtpResult<()>;
}
