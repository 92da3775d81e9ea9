//! Authentication module for MailRelay
//!
//! Acquires OAuth2 bearer tokens in one of two ways:
//! 1. Client credentials - a confidential app sending as a mailbox it was granted
//! 2. Authorization code with PKCE - a user signs in through the browser
//!
//! Acquired tokens are kept in a file-backed cache so repeated runs reuse
//! them until they expire.

pub mod cache;
mod acquirer;
mod error;
mod oauth2;
mod token_cache;
mod xoauth2;

pub use acquirer::{ClientCredentialsAcquirer, InteractiveAcquirer, TokenAcquirer};
pub use cache::{CredentialBlob, CredentialCache, PersistPolicy, StoreOutcome};
pub use error::{AuthError, AuthResult, CacheError, CacheResult};
pub use self::oauth2::{OAuth2Config, OAuth2Flow, TokenPair};
pub use token_cache::{CacheKey, TokenCache};
pub use xoauth2::XOAuth2Token;

/// Default loopback port for the interactive redirect
pub const DEFAULT_REDIRECT_PORT: u16 = 8855;

/// Microsoft identity platform (Entra ID) configuration
pub mod microsoft {
    use super::{OAuth2Config, DEFAULT_REDIRECT_PORT};

    /// App-only scope for SMTP AUTH against Exchange Online
    pub const SMTP_APP_SCOPE: &str = "https://outlook.office365.com/.default";

    /// App-only scope for Graph
    pub const GRAPH_APP_SCOPE: &str = "https://graph.microsoft.com/.default";

    /// Delegated scope for SMTP AUTH
    pub const SMTP_SEND_SCOPE: &str = "https://outlook.office.com/SMTP.Send";

    /// Delegated scope for Graph sendMail
    pub const GRAPH_SEND_SCOPE: &str = "https://graph.microsoft.com/Mail.Send";

    /// Needed for the provider to issue a refresh token
    pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

    /// Exchange Online SMTP submission endpoint
    pub const SMTP_HOST: &str = "smtp.office365.com";
    pub const SMTP_PORT: u16 = 587;

    /// Authority base URL for a tenant (`common` for multi-tenant apps)
    pub fn authority(tenant: &str) -> String {
        format!("https://login.microsoftonline.com/{}/oauth2/v2.0", tenant)
    }

    /// Create an Entra ID OAuth2 configuration
    ///
    /// A client secret makes this a confidential client, usable with the
    /// client credentials grant. Scopes are chosen per request.
    pub fn oauth2_config(
        tenant: &str,
        client_id: &str,
        client_secret: Option<String>,
    ) -> OAuth2Config {
        let authority = authority(tenant);
        OAuth2Config {
            client_id: client_id.to_string(),
            client_secret,
            auth_url: format!("{}/authorize", authority),
            token_url: format!("{}/token", authority),
            scopes: Vec::new(),
            redirect_port: DEFAULT_REDIRECT_PORT,
        }
    }
}

/// Gmail OAuth2 configuration
pub mod gmail {
    use super::{OAuth2Config, DEFAULT_REDIRECT_PORT};

    /// Gmail OAuth2 scope for full mail access
    pub const MAIL_SCOPE: &str = "https://mail.google.com/";

    /// Gmail SMTP server
    pub const SMTP_HOST: &str = "smtp.gmail.com";
    pub const SMTP_PORT: u16 = 587;

    /// Create Gmail OAuth2 configuration
    ///
    /// Register the client at https://console.cloud.google.com/. Desktop
    /// clients use PKCE and may omit the secret.
    pub fn oauth2_config(client_id: &str, client_secret: Option<String>) -> OAuth2Config {
        OAuth2Config {
            client_id: client_id.to_string(),
            client_secret,
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec![MAIL_SCOPE.to_string()],
            redirect_port: DEFAULT_REDIRECT_PORT,
        }
    }
}
