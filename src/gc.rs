//! C12: garbage collection sweep loop (spec §4.12). Runs as a background
//! `tokio::spawn`ed loop on a fixed interval, grounded on the sibling operator's
//! `WatcherManager`/`WriterManager` "run on an interval until a shutdown signal"
//! shape (`packages/operator/src/main.rs`).

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use crate::config::GcConfig;
use crate::store::Store;

pub struct Gc {
    store: Store,
    config: GcConfig,
}

impl Gc {
    pub fn new(store: Store, config: GcConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> eyre::Result<()> {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once(Utc::now()).await {
                        tracing::error!(%error, "GC sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("GC loop observed shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    async fn sweep_once(&self, now: DateTime<Utc>) -> eyre::Result<()> {
        let abort_after = now - Duration::seconds(self.config.abort_after_secs as i64);
        let clean_after = now - Duration::seconds(self.config.clean_after_secs as i64);
        let delete_after = now - Duration::seconds(self.config.delete_after_secs as i64);

        let aborted_withdrawals = abort_stale_withdrawals(&self.store, abort_after).await?;
        let aborted_cashouts = abort_stale_cashouts(&self.store, abort_after).await?;
        let expired_challenges = abort_stale_challenges(&self.store, abort_after).await?;

        let deleted_tokens = clean_expired_tokens(&self.store, clean_after).await?;
        let deleted_terminal_challenges = clean_terminal_challenges(&self.store, clean_after).await?;
        let deleted_terminal_withdrawals = clean_terminal_withdrawals(&self.store, clean_after).await?;
        let deleted_terminal_cashouts = clean_terminal_cashouts(&self.store, clean_after).await?;

        let deleted_accounts = delete_zero_balance_accounts(&self.store, delete_after).await?;

        crate::metrics::record_gc_sweep("withdrawals", aborted_withdrawals + deleted_terminal_withdrawals);
        crate::metrics::record_gc_sweep("cashouts", aborted_cashouts + deleted_terminal_cashouts);
        crate::metrics::record_gc_sweep("challenges", expired_challenges + deleted_terminal_challenges);
        crate::metrics::record_gc_sweep("tokens", deleted_tokens);
        crate::metrics::record_gc_sweep("accounts", deleted_accounts);

        tracing::info!(
            aborted_withdrawals,
            aborted_cashouts,
            expired_challenges,
            deleted_tokens,
            deleted_terminal_challenges,
            deleted_terminal_withdrawals,
            deleted_terminal_cashouts,
            deleted_accounts,
            "GC sweep complete"
        );
        Ok(())
    }
}

/// Hard-deletes withdrawal rows stuck in a non-terminal state past `abort_after`.
async fn abort_stale_withdrawals(store: &Store, abort_after: DateTime<Utc>) -> eyre::Result<i64> {
    let result = sqlx::query(
        "DELETE FROM withdrawals WHERE status IN ('pending', 'selected') AND created_at < $1",
    )
    .bind(abort_after)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected() as i64)
}

async fn abort_stale_cashouts(store: &Store, abort_after: DateTime<Utc>) -> eyre::Result<i64> {
    let result = sqlx::query(
        "DELETE FROM cashouts WHERE confirmed_at IS NULL AND aborted = FALSE AND created_at < $1",
    )
    .bind(abort_after)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected() as i64)
}

async fn abort_stale_challenges(store: &Store, abort_after: DateTime<Utc>) -> eyre::Result<i64> {
    let result = sqlx::query(
        "DELETE FROM challenges WHERE confirmed_at IS NULL AND created_at < $1",
    )
    .bind(abort_after)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected() as i64)
}

/// Deletes tokens and terminal TAN challenges older than `clean_after`.
async fn clean_expired_tokens(store: &Store, clean_after: DateTime<Utc>) -> eyre::Result<i64> {
    let result = sqlx::query("DELETE FROM bearer_tokens WHERE expires_at < $1")
        .bind(clean_after)
        .execute(store.pool())
        .await?;
    Ok(result.rows_affected() as i64)
}

async fn clean_terminal_challenges(store: &Store, clean_after: DateTime<Utc>) -> eyre::Result<i64> {
    let result = sqlx::query(
        "DELETE FROM challenges WHERE confirmed_at IS NOT NULL AND confirmed_at < $1",
    )
    .bind(clean_after)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected() as i64)
}

/// Deletes confirmed/aborted withdrawal rows older than `clean_after` (spec §4.12
/// point 2 "rows in terminal non-ledger tables").
async fn clean_terminal_withdrawals(store: &Store, clean_after: DateTime<Utc>) -> eyre::Result<i64> {
    let result = sqlx::query(
        "DELETE FROM withdrawals WHERE status IN ('confirmed', 'aborted') AND created_at < $1",
    )
    .bind(clean_after)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected() as i64)
}

/// Deletes confirmed/aborted cashout rows older than `clean_after`.
async fn clean_terminal_cashouts(store: &Store, clean_after: DateTime<Utc>) -> eyre::Result<i64> {
    let result = sqlx::query(
        "DELETE FROM cashouts WHERE (confirmed_at IS NOT NULL OR aborted = TRUE) AND created_at < $1",
    )
    .bind(clean_after)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected() as i64)
}

/// Removes soft-deleted accounts and their ledger history older than `delete_after`,
/// enforcing `balance == 0`. Exchange-incoming/outgoing indexes cover `reserve_pub`/
/// `wtid`, which are dropped along with the row, so no separate rebuild step is
/// needed beyond the ordinary index maintenance Postgres performs on `DELETE`.
/// Withdrawals/cashouts are cleared before challenges since both hold a plain
/// (non-cascading) foreign key into `challenges.id`.
async fn delete_zero_balance_accounts(store: &Store, delete_after: DateTime<Utc>) -> eyre::Result<i64> {
    let candidates: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM accounts WHERE is_deleted = TRUE AND deleted_at < $1
            AND balance_value = 0 AND balance_frac = 0",
    )
    .bind(delete_after)
    .fetch_all(store.pool())
    .await?;

    let mut deleted = 0i64;
    for (account_id,) in candidates {
        sqlx::query("DELETE FROM transactions WHERE account_id = $1")
            .bind(account_id)
            .execute(store.pool())
            .await?;
        sqlx::query("DELETE FROM withdrawals WHERE account_id = $1")
            .bind(account_id)
            .execute(store.pool())
            .await?;
        sqlx::query("DELETE FROM cashouts WHERE account_id = $1")
            .bind(account_id)
            .execute(store.pool())
            .await?;
        sqlx::query("DELETE FROM bearer_tokens WHERE account_id = $1")
            .bind(account_id)
            .execute(store.pool())
            .await?;
        sqlx::query("DELETE FROM challenges WHERE account_id = $1")
            .bind(account_id)
            .execute(store.pool())
            .await?;
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(account_id)
            .execute(store.pool())
            .await?;
        deleted += result.rows_affected() as i64;
    }
    Ok(deleted)
}
