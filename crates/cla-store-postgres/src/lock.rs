//! Cross-process serialization lock on Postgres advisory locks.
//!
//! Each acquisition opens a transaction and takes
//! `pg_advisory_xact_lock(key)` inside it. The guard owns the transaction;
//! dropping it rolls back, which releases the lock.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, warn};

use cla_store::config::SigningConfig;
use cla_store::lock::{LockError, LockGuard, LockKey, LockProvider};

/// SQLSTATE raised when `statement_timeout` cancels the lock wait.
const QUERY_CANCELED: &str = "57014";

/// Advisory lock id of a lock path: the first eight bytes of its sha256.
pub fn lock_key(path: &str) -> i64 {
    let digest = Sha256::digest(path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[derive(Debug, Clone)]
pub struct PgAdvisoryLock {
    pool: PgPool,
    timeout: Option<Duration>,
}

impl PgAdvisoryLock {
    /// Waits for the lock indefinitely.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: None,
        }
    }

    /// Fails with [`LockError::Contention`] once `timeout` passes.
    pub fn with_timeout(pool: PgPool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout: Some(timeout),
        }
    }

    /// Wait policy from [`SigningConfig::lock_timeout`].
    pub fn from_config(pool: PgPool, config: &SigningConfig) -> Self {
        Self {
            pool,
            timeout: config.lock_timeout,
        }
    }
}

#[async_trait]
impl LockProvider for PgAdvisoryLock {
    async fn acquire(&self, key: &LockKey) -> Result<LockGuard, LockError> {
        let id = lock_key(key.path());
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        // SET LOCAL scopes the timeout to this transaction only.
        if let Some(timeout) = self.timeout {
            sqlx::query(&format!(
                "SET LOCAL statement_timeout = {}",
                timeout.as_millis().max(1)
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }

        match sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(id)
            .execute(&mut *tx)
            .await
        {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(QUERY_CANCELED) => {
                warn!(key = %key, timeout = ?self.timeout, "advisory lock wait timed out");
                return Err(LockError::Contention(key.to_string()));
            }
            Err(e) => return Err(LockError::Provider(anyhow!(e))),
        }

        if self.timeout.is_some() {
            sqlx::query("RESET statement_timeout")
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!(e))?;
        }

        debug!(key = %key, lock_id = id, "acquired advisory lock");
        Ok(LockGuard::new(key.clone(), tx))
    }
}
