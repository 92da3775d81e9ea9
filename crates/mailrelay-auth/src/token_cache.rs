//! Token cache serialization
//!
//! `TokenCache` is the only code that knows what the cache blob contains: a
//! versioned JSON map from cache key to `TokenPair`. A blob that does not
//! decode is treated as an empty cache and gets overwritten on the next save.

use crate::cache::{CredentialBlob, CredentialCache, StoreOutcome};
use crate::{CacheResult, TokenPair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

const CACHE_VERSION: u32 = 1;

/// Identifies which token a cache entry holds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    authority: String,
    client_id: String,
    scopes: Vec<String>,
}

impl CacheKey {
    /// Scopes are sorted and deduplicated so ordering does not matter
    pub fn new(authority: &str, client_id: &str, scopes: &[String]) -> Self {
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        Self {
            authority: authority.to_string(),
            client_id: client_id.to_string(),
            scopes,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.authority,
            self.client_id,
            self.scopes.join(" ")
        )
    }
}

/// Serialized form of the whole cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TokenCacheState {
    version: u32,
    /// BTreeMap keeps the encoding stable, so unchanged state compares equal
    entries: BTreeMap<String, TokenPair>,
}

impl TokenCacheState {
    fn decode(blob: &CredentialBlob) -> Option<Self> {
        if blob.is_empty() {
            return None;
        }
        match serde_json::from_slice::<Self>(blob.as_bytes()) {
            Ok(state) if state.version == CACHE_VERSION => Some(state),
            Ok(state) => {
                warn!(
                    "Ignoring token cache with unsupported version {}",
                    state.version
                );
                None
            }
            Err(e) => {
                warn!("Token cache is corrupt, ignoring it: {}", e);
                None
            }
        }
    }

    fn encode(&self) -> CacheResult<CredentialBlob> {
        Ok(CredentialBlob::new(serde_json::to_vec(self)?))
    }
}

/// Typed view over a `CredentialCache`
#[derive(Debug)]
pub struct TokenCache {
    store: CredentialCache,
}

impl TokenCache {
    pub fn new(store: CredentialCache) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CredentialCache {
        &self.store
    }

    /// Cached token for `key`, expired or not
    pub fn lookup(&self, key: &CacheKey) -> Option<TokenPair> {
        let token = self.current_state().entries.remove(&key.to_string());
        debug!("Token cache {} for {}", hit_or_miss(&token), key);
        token
    }

    /// Add or replace the entry for `key` and persist the cache
    pub fn save(&self, key: &CacheKey, token: &TokenPair) -> CacheResult<StoreOutcome> {
        let mut state = self.current_state();
        let changed = state.entries.get(&key.to_string()) != Some(token);
        state.entries.insert(key.to_string(), token.clone());
        self.store.store(&state.encode()?, changed)
    }

    /// Drop the entry for `key`, returning whether one existed
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut state = self.current_state();
        if state.entries.remove(&key.to_string()).is_none() {
            return Ok(false);
        }
        self.store.store(&state.encode()?, true)?;
        Ok(true)
    }

    fn current_state(&self) -> TokenCacheState {
        self.store
            .load()
            .and_then(|blob| TokenCacheState::decode(&blob))
            .unwrap_or_else(|| TokenCacheState {
                version: CACHE_VERSION,
                entries: BTreeMap::new(),
            })
    }
}

fn hit_or_miss(token: &Option<TokenPair>) -> &'static str {
    if token.is_some() {
        "hit"
    } else {
        "miss"
    }
}
