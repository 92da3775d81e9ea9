//! XOAUTH2 SASL credential
//!
//! The bearer credential handed to mail transports. SMTP sends it as the
//! XOAUTH2 initial response, Graph only needs the access token.
//! Format reference: https://developers.google.com/workspace/gmail/imap/xoauth2-protocol

use crate::TokenPair;
use base64::prelude::*;
use std::fmt;

/// Mailbox address paired with the access token that authorizes it
#[derive(Clone, PartialEq, Eq)]
pub struct XOAuth2Token {
    email: String,
    access_token: String,
}

impl XOAuth2Token {
    pub fn new(email: &str, access_token: &str) -> Self {
        Self {
            email: email.to_string(),
            access_token: access_token.to_string(),
        }
    }

    /// Bind an acquired token to the mailbox it will send as
    pub fn for_mailbox(email: &str, token: &TokenPair) -> Self {
        Self::new(email, &token.access_token)
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Raw SASL string: `user={email}\x01auth=Bearer {token}\x01\x01`
    pub fn auth_string(&self) -> String {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.email, self.access_token
        )
    }

    /// Base64 form, as sent in `AUTH XOAUTH2 <response>`
    pub fn auth_string_base64(&self) -> String {
        BASE64_STANDARD.encode(self.auth_string())
    }
}

// Keeps access tokens out of logs
impl fmt::Debug for XOAuth2Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XOAuth2Token")
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
