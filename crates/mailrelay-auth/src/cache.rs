//! Durable storage for the serialized token cache
//!
//! The cache file holds an opaque blob produced by the token layer. This
//! module only round-trips bytes: it never looks inside them.
//!
//! Every load and store is serialized through a lock shared by all
//! `CredentialCache` instances pointing at the same file, plus an advisory
//! lock on a sidecar `.lock` file so separate processes do not race.
//! Writes go through a temporary file that is renamed over the target, so
//! readers see either the old or the new blob in full.

use crate::{CacheError, CacheResult};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

/// Default file name of the token cache
pub const DEFAULT_CACHE_FILE: &str = "token_cache.bin";

/// Serialized credential state, opaque to this module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialBlob(Vec<u8>);

impl CredentialBlob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for CredentialBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// When a `store` call is allowed to touch the disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistPolicy {
    /// Write when the caller reports a change or the bytes differ from
    /// the last persisted blob. The change signal can under-report, so the
    /// byte comparison backs it up.
    #[default]
    CompareBytes,
    /// Write only when the caller reports a change
    TrustHint,
}

/// Result of a `store` call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The blob was written to disk
    Written,
    /// Nothing changed, the disk was left alone
    Unchanged,
}

/// Persists a credential blob to a single file
#[derive(Debug)]
pub struct CredentialCache {
    path: PathBuf,
    policy: PersistPolicy,
    lock: Arc<Mutex<()>>,
    /// Last blob known to match the file contents
    baseline: Mutex<Option<Vec<u8>>>,
    writes: AtomicU64,
}

impl CredentialCache {
    /// Create a cache backed by `path` using the byte comparison policy
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_policy(path, PersistPolicy::default())
    }

    /// Create a cache backed by `path` with an explicit persist policy
    pub fn with_policy(path: impl Into<PathBuf>, policy: PersistPolicy) -> Self {
        let path = path.into();
        let lock = path_lock(&path);
        Self {
            path,
            policy,
            lock,
            baseline: Mutex::new(None),
            writes: AtomicU64::new(0),
        }
    }

    /// Platform cache location, e.g. `~/.cache/mailrelay/token_cache.bin`
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailrelay")
            .join(DEFAULT_CACHE_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times this instance has written the file
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Read the persisted blob
    ///
    /// A missing file is an empty cache. Read failures are logged and also
    /// reported as an empty cache; they never reach the caller.
    pub fn load(&self) -> Option<CredentialBlob> {
        let _guard = self.acquire();

        if !self.path.exists() {
            debug!("No token cache at {}", self.path.display());
            return None;
        }

        let _file_lock = self.read_lock();

        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!(
                    "Loaded {} bytes of token cache from {}",
                    bytes.len(),
                    self.path.display()
                );
                *self.baseline() = Some(bytes.clone());
                Some(CredentialBlob(bytes))
            }
            Err(source) => {
                let e = CacheError::Read {
                    path: self.path.clone(),
                    source,
                };
                warn!("{}, treating as empty", e);
                None
            }
        }
    }

    /// Persist `blob` if the policy says it needs persisting
    ///
    /// On error the previous baseline is kept, so a later call retries the
    /// write.
    pub fn store(&self, blob: &CredentialBlob, changed_hint: bool) -> CacheResult<StoreOutcome> {
        let _guard = self.acquire();
        let mut baseline = self.baseline();

        let differs = baseline.as_deref() != Some(blob.as_bytes());
        let must_write = match self.policy {
            PersistPolicy::CompareBytes => changed_hint || differs,
            PersistPolicy::TrustHint => changed_hint,
        };

        if !must_write {
            debug!("Token cache unchanged, skipping write");
            return Ok(StoreOutcome::Unchanged);
        }

        self.ensure_parent_dir()?;
        let _file_lock = self.lock_file()?;
        self.write_atomic(blob.as_bytes())?;

        *baseline = Some(blob.as_bytes().to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        info!(
            "Persisted {} bytes of token cache to {}",
            blob.len(),
            self.path.display()
        );
        Ok(StoreOutcome::Written)
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn baseline(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.baseline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn ensure_parent_dir(&self) -> CacheResult<()> {
        fs::create_dir_all(self.parent_dir()).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Shared lock for reading, if the sidecar can be opened at all
    ///
    /// A read-only cache directory still allows loading; the rename-based
    /// writes keep an unlocked read from seeing a partial blob.
    fn read_lock(&self) -> Option<FileLock> {
        let lock_path = lock_path_for(&self.path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .or_else(|_| File::open(&lock_path));

        match file.and_then(|file| {
            FileExt::lock_shared(&file)?;
            Ok(file)
        }) {
            Ok(file) => Some(FileLock(file)),
            Err(e) => {
                debug!(
                    "Reading {} without a file lock: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    fn lock_file(&self) -> CacheResult<FileLock> {
        let lock_path = lock_path_for(&self.path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .and_then(|file| {
                FileExt::lock_exclusive(&file)?;
                Ok(file)
            })
            .map_err(|source| CacheError::Lock {
                path: lock_path,
                source,
            })?;
        Ok(FileLock(file))
    }

    fn write_atomic(&self, bytes: &[u8]) -> CacheResult<()> {
        let to_cache_error = |source| CacheError::Write {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(self.parent_dir()).map_err(to_cache_error)?;
        tmp.write_all(bytes).map_err(to_cache_error)?;
        tmp.as_file().sync_all().map_err(to_cache_error)?;
        tmp.persist(&self.path).map_err(|e| to_cache_error(e.error))?;
        Ok(())
    }
}

/// Advisory lock held on the sidecar file, released on drop
struct FileLock(File);

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| DEFAULT_CACHE_FILE.into());
    name.push(".lock");
    path.with_file_name(name)
}

/// One mutex per store path, shared by every cache in the process
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    locks.entry(key).or_default().clone()
}
