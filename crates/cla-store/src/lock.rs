//! Serialization lock port.
//!
//! A path-keyed mutual exclusion capability, injected into the signing flow.
//! `LocalLockProvider` serves single-process deployments and tests; the
//! Postgres adapter provides a cross-process implementation on advisory
//! locks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SigningConfig;
use crate::types::OrgRepo;

#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was held elsewhere past the provider's wait policy.
    #[error("lock contention on {0}")]
    Contention(String),

    #[error("lock provider: {0}")]
    Provider(#[from] anyhow::Error),
}

/// Canonical lock path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// `cla/<platform>/<org>/<repo>`, with `_` standing for an org-wide scope.
    pub fn for_org_repo(org_repo: &OrgRepo) -> Self {
        let repo = if org_repo.is_org_wide() {
            "_"
        } else {
            org_repo.repo_id.as_str()
        };
        Self(format!(
            "cla/{}/{}/{}",
            org_repo.platform, org_repo.org_id, repo
        ))
    }

    pub fn path(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A held lock. Dropping the guard releases it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: LockKey,
    held: Option<Box<dyn Send>>,
}

impl LockGuard {
    /// Wrap whatever value keeps the lock held; dropping it must release.
    pub fn new(key: LockKey, held: impl Send + 'static) -> Self {
        Self {
            key,
            held: Some(Box::new(held)),
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn release(mut self) {
        self.held.take();
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.held.take().is_some() {
            debug!(key = %self.key, "released lock");
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("held", &self.held.is_some())
            .finish()
    }
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquire the lock for `key`, waiting according to the provider's
    /// policy.
    async fn acquire(&self, key: &LockKey) -> Result<LockGuard, LockError>;
}

type LockTable = Arc<Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>>;

/// In-process provider: one async mutex per key. A key's entry is dropped
/// when its last holder releases with nobody waiting.
#[derive(Debug, Default)]
pub struct LocalLockProvider {
    locks: LockTable,
    timeout: Option<Duration>,
}

impl LocalLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`LockError::Contention`] after waiting `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: LockTable::default(),
            timeout: Some(timeout),
        }
    }

    /// Wait policy from [`SigningConfig::lock_timeout`].
    pub fn from_config(config: &SigningConfig) -> Self {
        match config.lock_timeout {
            Some(timeout) => Self::with_timeout(timeout),
            None => Self::new(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn slot(&self, key: &LockKey) -> Result<Arc<tokio::sync::Mutex<()>>, LockError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| LockError::Provider(anyhow!("lock table poisoned")))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Holds a local lock; evicts the table entry on release when unused.
struct LocalHeld {
    key: LockKey,
    table: LockTable,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for LocalHeld {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let Ok(mut locks) = self.table.lock() else {
            return;
        };
        // Table entry plus this guard: no waiter holds a clone. New
        // acquirers clone under the table lock, so the count is stable here.
        if Arc::strong_count(tokio::sync::OwnedMutexGuard::mutex(&guard)) == 2 {
            locks.remove(&self.key);
        }
        drop(guard);
    }
}

#[async_trait]
impl LockProvider for LocalLockProvider {
    async fn acquire(&self, key: &LockKey) -> Result<LockGuard, LockError> {
        let slot = self.slot(key)?;
        let guard = match self.timeout {
            None => slot.lock_owned().await,
            Some(limit) => match tokio::time::timeout(limit, slot.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(key = %key, ?limit, "lock wait timed out");
                    return Err(LockError::Contention(key.to_string()));
                }
            },
        };
        debug!(key = %key, "acquired lock");
        let held = LocalHeld {
            key: key.clone(),
            table: self.locks.clone(),
            guard: Some(guard),
        };
        Ok(LockGuard::new(key.clone(), held))
    }
}
