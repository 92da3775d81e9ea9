//! Acquire a token, then send
//!
//! One dispatch is strictly sequential: consult the token cache, go to the
//! identity provider only when the cache has nothing usable, then make a
//! single send attempt. Neither step is retried.

use crate::{CoreError, CoreResult};
use mailrelay_auth::{CacheKey, TokenAcquirer, TokenCache, TokenPair, XOAuth2Token};
use mailrelay_smtp::{MailTransport, OutgoingMessage};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Where the token used for a dispatch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// Unexpired token from the cache
    Cache,
    /// Expired cached token renewed without user interaction
    Refreshed,
    /// Fresh grant against the identity provider
    Acquired,
}

/// A token ready for use
#[derive(Debug, Clone)]
pub struct AcquiredToken {
    pub token: TokenPair,
    pub source: TokenSource,
    /// Set when the token could not be written back to the cache
    pub cache_error: Option<String>,
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub transport: String,
    pub token_source: TokenSource,
    pub recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_error: Option<String>,
}

/// Sends messages as one mailbox with tokens from one acquirer
pub struct EmailDispatchFlow {
    acquirer: Box<dyn TokenAcquirer>,
    transport: Box<dyn MailTransport>,
    cache: TokenCache,
    scopes: Vec<String>,
}

impl EmailDispatchFlow {
    pub fn new(
        acquirer: Box<dyn TokenAcquirer>,
        transport: Box<dyn MailTransport>,
        cache: TokenCache,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            acquirer,
            transport,
            cache,
            scopes,
        }
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    fn cache_key(&self) -> CacheKey {
        self.acquirer.cache_key(&self.scopes)
    }

    /// Get a usable token, from the cache when possible
    pub async fn token(&self) -> CoreResult<AcquiredToken> {
        let key = self.cache_key();

        if let Some(cached) = self.cache.lookup(&key) {
            if !cached.is_expired() {
                info!("Using cached token");
                return Ok(AcquiredToken {
                    token: cached,
                    source: TokenSource::Cache,
                    cache_error: None,
                });
            }

            match self.acquirer.acquire_silent(&cached).await {
                Ok(token) => {
                    info!("Renewed expired token");
                    let cache_error = self.persist(&key, &token);
                    return Ok(AcquiredToken {
                        token,
                        source: TokenSource::Refreshed,
                        cache_error,
                    });
                }
                Err(e) => debug!("Silent renewal unavailable: {}", e),
            }
        }

        let token = self
            .acquirer
            .acquire(&self.scopes)
            .await
            .map_err(CoreError::CredentialAcquisition)?;
        info!("Acquired new token");
        let cache_error = self.persist(&key, &token);

        Ok(AcquiredToken {
            token,
            source: TokenSource::Acquired,
            cache_error,
        })
    }

    /// Send `message` as its From address
    pub async fn dispatch(&self, message: &OutgoingMessage) -> CoreResult<DispatchReport> {
        // Reject a malformed message before anyone is asked to sign in
        message.validate()?;

        let acquired = self.token().await?;
        let credential = XOAuth2Token::for_mailbox(&message.from, &acquired.token);

        self.transport.send(message, &credential).await?;

        Ok(DispatchReport {
            transport: self.transport.name().to_string(),
            token_source: acquired.source,
            recipients: message.recipients().count(),
            cache_error: acquired.cache_error,
        })
    }

    /// Forget the cached token for this flow
    pub fn clear_cached_token(&self) -> bool {
        match self.cache.remove(&self.cache_key()) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Failed to update token cache: {}", e);
                false
            }
        }
    }

    /// Write a token back to the cache; failure does not stop the dispatch
    fn persist(&self, key: &CacheKey, token: &TokenPair) -> Option<String> {
        match self.cache.save(key, token) {
            Ok(outcome) => {
                debug!("Token cache save: {:?}", outcome);
                None
            }
            Err(e) => {
                warn!("Failed to persist token cache: {}", e);
                Some(e.to_string())
            }
        }
    }
}
