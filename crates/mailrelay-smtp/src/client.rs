//! SMTP client implementation

use crate::{build_lettre_message, MailTransport, OutgoingMessage, SmtpError, SmtpResult};
use async_trait::async_trait;
use lettre::{
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use mailrelay_auth::{gmail, microsoft, XOAuth2Token};
use tracing::{debug, info};

/// SMTP submission client authenticating with XOAUTH2
#[derive(Debug, Clone)]
pub struct SmtpClient {
    host: String,
    port: u16,
    implicit_tls: bool,
}

impl SmtpClient {
    /// STARTTLS submission on `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            // 465 is the SMTPS port, everything else negotiates STARTTLS
            implicit_tls: port == 465,
        }
    }

    /// Exchange Online submission endpoint
    pub fn office365() -> Self {
        Self::new(microsoft::SMTP_HOST, microsoft::SMTP_PORT)
    }

    /// Gmail submission endpoint
    pub fn gmail() -> Self {
        Self::new(gmail::SMTP_HOST, gmail::SMTP_PORT)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn transport(
        &self,
        credential: &XOAuth2Token,
    ) -> SmtpResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
        }
        .map_err(|e| SmtpError::ConnectionFailed(e.to_string()))?;

        // lettre's Xoauth2 mechanism takes the bare access token and builds
        // the SASL string itself
        Ok(builder
            .port(self.port)
            .credentials(Credentials::new(
                credential.email().to_string(),
                credential.access_token().to_string(),
            ))
            .authentication(vec![Mechanism::Xoauth2])
            .build())
    }
}

#[async_trait]
impl MailTransport for SmtpClient {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, message: &OutgoingMessage, credential: &XOAuth2Token) -> SmtpResult<()> {
        let lettre_message = build_lettre_message(message)?;
        let transport = self.transport(credential)?;

        info!(
            "Sending email via SMTP {}:{} as {}",
            self.host,
            self.port,
            credential.email()
        );

        let response = transport
            .send(lettre_message)
            .await
            .map_err(|e| SmtpError::SendFailed(e.to_string()))?;

        debug!("SMTP server replied {}", response.code());
        info!("Email sent successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let client = SmtpClient::office365();
        assert_eq!(client.host(), "smtp.office365.com");
        assert_eq!(client.port(), 587);
        assert!(!client.implicit_tls);

        assert_eq!(SmtpClient::gmail().host(), "smtp.gmail.com");
        assert!(SmtpClient::new("mail.example.com", 465).implicit_tls);
    }

    #[tokio::test]
    async fn test_invalid_message_fails_before_connecting() {
        let client = SmtpClient::new("smtp.invalid", 587);
        let credential = XOAuth2Token::new("sender@contoso.com", "token");
        let message = OutgoingMessage::new("sender@contoso.com", "No recipients");

        let result = client.send(&message, &credential).await;
        assert!(matches!(result, Err(SmtpError::NoRecipients)));
    }
}
