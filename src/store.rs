//! The connection pool plus the two primitives every DAO builds on: `serializable`
//! (a retried SERIALIZABLE transaction) and `conn` (a plain pooled operation). See
//! spec §4.2.

use std::future::Future;
use std::time::Duration;

use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, warn};

use crate::notify::NotifyBus;

/// Postgres SQLSTATE for "could not serialize access due to concurrent update".
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// Postgres SQLSTATE for "deadlock detected".
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

/// Backoff shape mirrors the sibling relayer's `RetryConfig`, but capped much lower:
/// serializable conflicts on a single-row ledger posting resolve in milliseconds, not
/// the multi-second chain-confirmation backoff that pattern was built for.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    Retryable,
    Fatal,
}

fn classify(error: &sqlx::Error) -> ErrorClass {
    if let sqlx::Error::Database(db_err) = error {
        if let Some(code) = db_err.code() {
            if code == SQLSTATE_SERIALIZATION_FAILURE || code == SQLSTATE_DEADLOCK_DETECTED {
                return ErrorClass::Retryable;
            }
        }
    }
    ErrorClass::Fatal
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    retry: RetryConfig,
    pub notify: NotifyBus,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .wrap_err("failed to connect to database")?;
        Ok(Self {
            pool,
            retry: RetryConfig::default(),
            notify: NotifyBus::new(),
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .wrap_err("failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `op` inside a SERIALIZABLE transaction, retrying on serialization
    /// failure/deadlock with exponential backoff up to `max_retries` attempts.
    /// Any other error propagates immediately without a retry.
    pub async fn serializable<T, F, Fut>(&self, mut op: F) -> Result<T, sqlx::Error>
    where
        F: FnMut(&mut Transaction<'_, Postgres>) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            let mut txn = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *txn)
                .await?;

            match op(&mut txn).await {
                Ok(value) => match txn.commit().await {
                    Ok(()) => return Ok(value),
                    Err(e) => {
                        if classify(&e) == ErrorClass::Retryable && attempt < self.retry.max_retries
                        {
                            warn!(attempt, "serializable commit conflict, retrying");
                            tokio::time::sleep(self.retry.backoff_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(e);
                    }
                },
                Err(e) => {
                    let _ = txn.rollback().await;
                    if classify(&e) == ErrorClass::Retryable && attempt < self.retry.max_retries {
                        debug!(attempt, "serializable operation conflict, retrying");
                        tokio::time::sleep(self.retry.backoff_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Runs a plain pooled operation (reads, GC scans) with no isolation escalation.
    pub async fn conn<T, F, Fut>(&self, op: F) -> Result<T, sqlx::Error>
    where
        F: FnOnce(&PgPool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        op(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.backoff_for_attempt(0), Duration::from_millis(5));
        assert_eq!(cfg.backoff_for_attempt(1), Duration::from_millis(10));
        assert_eq!(cfg.backoff_for_attempt(2), Duration::from_millis(20));
        assert_eq!(cfg.backoff_for_attempt(10), Duration::from_millis(200));
    }
}
