//! Token acquisition strategies

use crate::oauth2::{OAuth2Config, OAuth2Flow, TokenPair};
use crate::token_cache::CacheKey;
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// Obtains bearer tokens from the identity provider
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    /// Cache slot for tokens this acquirer issues for `scopes`
    fn cache_key(&self, scopes: &[String]) -> CacheKey;

    /// Run the full grant against the provider
    async fn acquire(&self, scopes: &[String]) -> AuthResult<TokenPair>;

    /// Renew an expired cached token without user interaction
    async fn acquire_silent(&self, cached: &TokenPair) -> AuthResult<TokenPair> {
        let _ = cached;
        Err(AuthError::TokenExpired)
    }
}

/// Confidential client using the client credentials grant
pub struct ClientCredentialsAcquirer {
    flow: OAuth2Flow,
}

impl ClientCredentialsAcquirer {
    pub fn new(config: OAuth2Config) -> AuthResult<Self> {
        if config.client_secret.as_deref().map_or(true, str::is_empty) {
            return Err(AuthError::InvalidConfig(
                "Client credentials flow needs a client secret".to_string(),
            ));
        }
        Ok(Self {
            flow: OAuth2Flow::new(config)?,
        })
    }
}

#[async_trait]
impl TokenAcquirer for ClientCredentialsAcquirer {
    fn cache_key(&self, scopes: &[String]) -> CacheKey {
        let config = self.flow.config();
        CacheKey::new(&config.token_url, &config.client_id, scopes)
    }

    async fn acquire(&self, scopes: &[String]) -> AuthResult<TokenPair> {
        debug!("Requesting client credentials token for {:?}", scopes);
        self.flow.client_credentials(scopes).await
    }

    // App tokens carry no refresh token, the next acquire is just as cheap
}

type Prompt = Box<dyn Fn(&str) + Send + Sync>;

/// Public client signing the user in through the browser
pub struct InteractiveAcquirer {
    config: OAuth2Config,
    prompt: Prompt,
}

impl InteractiveAcquirer {
    pub fn new(config: OAuth2Config) -> AuthResult<Self> {
        // Validate URLs up front rather than on first use
        OAuth2Flow::new(config.clone())?;
        Ok(Self {
            config,
            prompt: Box::new(|url| {
                eprintln!("Open this URL in your browser to sign in:\n\n{}\n", url);
            }),
        })
    }

    /// Replace how the authorization URL is shown to the user
    pub fn with_prompt(mut self, prompt: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    fn flow_for(&self, scopes: &[String]) -> AuthResult<OAuth2Flow> {
        OAuth2Flow::new(OAuth2Config {
            scopes: scopes.to_vec(),
            ..self.config.clone()
        })
    }
}

#[async_trait]
impl TokenAcquirer for InteractiveAcquirer {
    fn cache_key(&self, scopes: &[String]) -> CacheKey {
        CacheKey::new(&self.config.token_url, &self.config.client_id, scopes)
    }

    async fn acquire(&self, scopes: &[String]) -> AuthResult<TokenPair> {
        let mut flow = self.flow_for(scopes)?;
        let listener = flow.bind_callback().await?;
        let url = flow.get_auth_url();
        info!("Waiting for interactive sign-in");
        (self.prompt)(&url);
        let token = flow.wait_for_callback(listener).await?;
        Ok(with_requested_scopes(token, scopes))
    }

    async fn acquire_silent(&self, cached: &TokenPair) -> AuthResult<TokenPair> {
        let refresh_token = cached
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NoRefreshToken)?;
        info!("Refreshing cached access token");
        let token = self
            .flow_for(&cached.scopes)?
            .refresh_token(refresh_token)
            .await?;
        Ok(with_requested_scopes(token, &cached.scopes))
    }
}

/// Remember what was asked for when the provider does not echo scopes back,
/// so a later refresh can ask again
fn with_requested_scopes(mut token: TokenPair, scopes: &[String]) -> TokenPair {
    if token.scopes.is_empty() {
        token.scopes = scopes.to_vec();
    }
    token
}
