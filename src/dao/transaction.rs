//! C6: Transaction DAO (spec §4.6) — the core ledger posting. Runs inside a single
//! `Store::serializable` transaction: currency/self-transfer/admin-creditor checks,
//! debit-cap enforcement, two-row posting, balance updates, notification publish.
//!
//! Business errors raised inside the serializable closure are smuggled back out
//! through a side channel since the closure itself is constrained to
//! `Result<T, sqlx::Error>` by `Store::serializable`; `run_serializable` below is the
//! one place that plumbing lives so every DAO built on top of it stays readable.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::amount::Amount;
use crate::dao::account;
use crate::error::BankError;
use crate::models::TransactionRow;
use crate::store::Store;

/// Runs `op` inside `store.serializable`, letting `op` return `BankError` directly.
/// A `BankError::Internal` still carries its `eyre::Report` through unchanged; any
/// other domain error is stashed and restored once the transaction unwinds.
pub async fn run_serializable<T, F, Fut>(store: &Store, op: F) -> Result<T, BankError>
where
    F: FnMut(&mut Transaction<'_, Postgres>) -> Fut,
    Fut: std::future::Future<Output = Result<T, BankError>>,
{
    let stashed: Arc<Mutex<Option<BankError>>> = Arc::new(Mutex::new(None));
    let stashed_inner = stashed.clone();
    let mut op = op;

    let result = store
        .serializable(move |txn| {
            let stashed_inner = stashed_inner.clone();
            let fut = op(txn);
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(BankError::Internal(report)) => {
                        Err(sqlx::Error::Protocol(report.to_string()))
                    }
                    Err(other) => {
                        *stashed_inner.lock().unwrap() = Some(other);
                        Err(sqlx::Error::Protocol("business rule violation".to_string()))
                    }
                }
            }
        })
        .await;

    match result {
        Ok(value) => Ok(value),
        Err(sqlx_err) => match stashed.lock().unwrap().take() {
            Some(business_error) => Err(business_error),
            None => Err(BankError::from(sqlx_err)),
        },
    }
}

pub struct NewTransaction {
    pub debtor_login: String,
    pub creditor_login: String,
    pub subject: String,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    pub tan_ok: bool,
    pub request_uid: Option<String>,
}

pub enum CreateOutcome {
    Posted { debtor_row_id: i64, creditor_row_id: i64 },
    AlreadyPosted { row_id: i64 },
}

/// Reserve-pub subject: a single base32-crockford token that decodes to exactly 32
/// bytes (spec §4.6 "Incoming to exchange").
fn parse_reserve_pub(subject: &str) -> Option<String> {
    let token = subject.trim();
    if token.is_empty() || token.contains(' ') {
        return None;
    }
    let decoded = base32::decode(base32::Alphabet::Crockford, token)?;
    if decoded.len() == 32 {
        Some(token.to_string())
    } else {
        None
    }
}

/// Outgoing-from-exchange subject: `"<short-hash> <url>"` (spec §4.6 "Outgoing from
/// exchange").
fn parse_wtid_subject(subject: &str) -> Option<(String, String)> {
    let (wtid, url) = subject.trim().split_once(' ')?;
    if wtid.is_empty() || url.is_empty() || !url.contains("://") {
        return None;
    }
    Some((wtid.to_string(), url.to_string()))
}

pub async fn create(store: &Store, req: NewTransaction) -> Result<CreateOutcome, BankError> {
    if req.debtor_login == req.creditor_login {
        return Err(BankError::SameAccount);
    }

    let pool = store.pool().clone();
    let debtor = account::require_by_login(&pool, &req.debtor_login).await?;
    let creditor = account::require_by_login(&pool, &req.creditor_login).await?;

    if creditor.login == "admin" && debtor.login != "admin" {
        return Err(BankError::AdminCreditor);
    }
    if debtor.currency != req.amount.currency || creditor.currency != req.amount.currency {
        return Err(BankError::CurrencyMismatch);
    }
    if debtor.tan_channel != "none" && !req.tan_ok {
        let challenge_id = crate::dao::challenge::create(
            &pool,
            debtor.id,
            "transaction",
            req.timestamp,
            chrono::Duration::minutes(10),
            3,
        )
        .await?;
        return Err(BankError::ChallengeRequired { challenge_id });
    }

    if let Some(ref request_uid) = req.request_uid {
        if let Some(existing) = find_by_request_uid(&pool, debtor.id, request_uid).await? {
            let same_payload = existing.counterpart_payto == creditor.internal_payto
                && existing.subject == req.subject
                && existing.amount_value == req.amount.value as i64
                && existing.amount_frac == req.amount.frac as i32;
            if same_payload {
                return Ok(CreateOutcome::AlreadyPosted {
                    row_id: existing.row_id,
                });
            }
            return Err(BankError::RequestUidReused);
        }
    }

    let debtor_login = req.debtor_login.clone();
    let creditor_login = req.creditor_login.clone();
    let started = std::time::Instant::now();
    let outcome = run_serializable(store, move |txn| {
        let req_amount = req.amount.clone();
        let debtor_login = debtor_login.clone();
        let creditor_login = creditor_login.clone();
        let subject = req.subject.clone();
        let request_uid = req.request_uid.clone();
        let timestamp = req.timestamp;
        Box::pin(async move {
            post_within_txn(
                txn,
                &debtor_login,
                &creditor_login,
                &subject,
                &req_amount,
                timestamp,
                request_uid.as_deref(),
            )
            .await
        })
    })
    .await?;

    if let CreateOutcome::Posted {
        debtor_row_id,
        creditor_row_id,
    } = outcome
    {
        store.notify.publish(format!("account:{}", debtor.id), debtor_row_id);
        store
            .notify
            .publish(format!("account:{}", creditor.id), creditor_row_id);
        crate::metrics::record_transaction_posted("posted", started.elapsed().as_secs_f64());
    }

    Ok(outcome)
}

async fn post_within_txn(
    txn: &mut Transaction<'_, Postgres>,
    debtor_login: &str,
    creditor_login: &str,
    subject: &str,
    amount: &Amount,
    timestamp: DateTime<Utc>,
    request_uid: Option<&str>,
) -> Result<CreateOutcome, BankError> {
    let debtor_row = sqlx::query("SELECT id FROM accounts WHERE login = $1 FOR UPDATE")
        .bind(debtor_login)
        .fetch_one(&mut **txn)
        .await?;
    let debtor_id: i64 = debtor_row.try_get("id")?;
    let creditor_row = sqlx::query("SELECT id FROM accounts WHERE login = $1 FOR UPDATE")
        .bind(creditor_login)
        .fetch_one(&mut **txn)
        .await?;
    let creditor_id: i64 = creditor_row.try_get("id")?;

    let debtor = account::lock_for_update(txn, debtor_id).await?;
    let creditor = account::lock_for_update(txn, creditor_id).await?;

    let debtor_balance = debtor.balance();
    let new_debtor_balance_ok = crate::amount::is_balance_enough(
        &debtor_balance,
        amount,
        debtor.has_debit,
        &debtor.max_debit(),
    )
    .map_err(BankError::from)?;
    if !new_debtor_balance_ok {
        return Err(BankError::UnallowedDebit);
    }

    let (new_debtor_value, new_debtor_frac, new_debtor_has_debit) =
        apply_signed_delta(&debtor_balance, amount, debtor.has_debit, false)?;
    let (new_creditor_value, new_creditor_frac, new_creditor_has_debit) =
        apply_signed_delta(&creditor.balance(), amount, creditor.has_debit, true)?;

    account::apply_balance_delta(
        txn,
        debtor.id,
        &Amount::new(new_debtor_value, new_debtor_frac, debtor.currency.clone())
            .map_err(BankError::from)?,
        new_debtor_has_debit,
    )
    .await?;
    account::apply_balance_delta(
        txn,
        creditor.id,
        &Amount::new(
            new_creditor_value,
            new_creditor_frac,
            creditor.currency.clone(),
        )
        .map_err(BankError::from)?,
        new_creditor_has_debit,
    )
    .await?;

    let reserve_pub = if creditor.is_taler_exchange {
        parse_reserve_pub(subject)
    } else {
        None
    };
    if let Some(ref rp) = reserve_pub {
        let reused = sqlx::query("SELECT 1 FROM transactions WHERE reserve_pub = $1")
            .bind(rp)
            .fetch_optional(&mut **txn)
            .await?
            .is_some();
        if reused {
            // Bounced: record only the debit leg tagged for audit; the credit side
            // never touches the exchange's incoming history.
            tracing::warn!(reserve_pub = %rp, "reserve_pub reused, bouncing posting");
            return bounce(txn, &debtor, &creditor, amount, subject, timestamp).await;
        }
    }

    let wtid_subject = if debtor.is_taler_exchange {
        parse_wtid_subject(subject)
    } else {
        None
    };
    if let Some((ref wtid, _)) = wtid_subject {
        let reused = sqlx::query("SELECT 1 FROM transactions WHERE wtid = $1")
            .bind(wtid)
            .fetch_optional(&mut **txn)
            .await?
            .is_some();
        if reused {
            tracing::warn!(wtid = %wtid, "wtid reused, posting as common transfer");
        }
    }
    let (wtid, exchange_url) = match wtid_subject {
        Some((w, u)) => (Some(w), Some(u)),
        None => (None, None),
    };

    let debtor_row_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp, reserve_pub, wtid, exchange_url, request_uid)
         VALUES ($1, $2, $3, $4, $5, $6, 'debit', $7, NULL, $8, $9, $10)
         RETURNING row_id",
    )
    .bind(debtor.id)
    .bind(&creditor.internal_payto)
    .bind(subject)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(timestamp)
    .bind(&wtid)
    .bind(&exchange_url)
    .bind(request_uid)
    .fetch_one(&mut **txn)
    .await?;

    let creditor_row_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp, reserve_pub, wtid, exchange_url, request_uid)
         VALUES ($1, $2, $3, $4, $5, $6, 'credit', $7, $8, NULL, NULL, NULL)
         RETURNING row_id",
    )
    .bind(creditor.id)
    .bind(&debtor.internal_payto)
    .bind(subject)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(timestamp)
    .bind(&reserve_pub)
    .fetch_one(&mut **txn)
    .await?;

    if reserve_pub.is_some() {
        crate::stats::record_all_frames(
            txn,
            timestamp,
            crate::stats::Metric::TalerIn,
            amount,
            None,
        )
        .await?;
    } else if wtid.is_some() {
        crate::stats::record_all_frames(
            txn,
            timestamp,
            crate::stats::Metric::TalerOut,
            amount,
            None,
        )
        .await?;
    }

    Ok(CreateOutcome::Posted {
        debtor_row_id,
        creditor_row_id,
    })
}

async fn bounce(
    txn: &mut Transaction<'_, Postgres>,
    debtor: &crate::models::Account,
    creditor: &crate::models::Account,
    amount: &Amount,
    original_subject: &str,
    timestamp: DateTime<Utc>,
) -> Result<CreateOutcome, BankError> {
    let refund_subject = format!("refund: reserve_pub reused ({original_subject})");

    account::apply_balance_delta(txn, debtor.id, &debtor.balance(), debtor.has_debit).await?;
    account::apply_balance_delta(txn, creditor.id, &creditor.balance(), creditor.has_debit)
        .await?;

    let creditor_row_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6, 'debit', $7)
         RETURNING row_id",
    )
    .bind(creditor.id)
    .bind(&debtor.internal_payto)
    .bind(&refund_subject)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(timestamp)
    .fetch_one(&mut **txn)
    .await?;

    let debtor_row_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6, 'credit', $7)
         RETURNING row_id",
    )
    .bind(debtor.id)
    .bind(&creditor.internal_payto)
    .bind(&refund_subject)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(timestamp)
    .fetch_one(&mut **txn)
    .await?;

    Ok(CreateOutcome::Posted {
        debtor_row_id,
        creditor_row_id,
    })
}

pub(crate) fn apply_signed_delta(
    balance: &Amount,
    delta: &Amount,
    has_debit: bool,
    is_credit: bool,
) -> Result<(u64, u32, bool), BankError> {
    if is_credit {
        let new_balance = if has_debit {
            // Existing debt is reduced first.
            if delta >= balance {
                (
                    delta.checked_sub(balance).map_err(BankError::from)?,
                    false,
                )
            } else {
                (balance.checked_sub(delta).map_err(BankError::from)?, true)
            }
        } else {
            (balance.checked_add(delta).map_err(BankError::from)?, false)
        };
        Ok((new_balance.0.value, new_balance.0.frac, new_balance.1))
    } else {
        let new_balance = if has_debit {
            (balance.checked_add(delta).map_err(BankError::from)?, true)
        } else if balance >= delta {
            (balance.checked_sub(delta).map_err(BankError::from)?, false)
        } else {
            (delta.checked_sub(balance).map_err(BankError::from)?, true)
        };
        Ok((new_balance.0.value, new_balance.0.frac, new_balance.1))
    }
}

pub async fn find_by_request_uid(
    pool: &PgPool,
    account_id: i64,
    request_uid: &str,
) -> Result<Option<TransactionRow>, BankError> {
    let row = sqlx::query_as::<_, TransactionRow>(
        "SELECT * FROM transactions WHERE account_id = $1 AND request_uid = $2 AND direction = 'debit'",
    )
    .bind(account_id)
    .bind(request_uid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// History cursor (spec §4.6): `delta > 0` returns ascending rows after `start`,
/// `delta < 0` returns descending rows at or before `start`. Long-polls on the
/// notification bus if fewer rows than requested are available and `long_poll_ms > 0`.
pub async fn history(
    store: &Store,
    account_id: i64,
    delta: i64,
    start: i64,
    long_poll_ms: u64,
) -> Result<Vec<TransactionRow>, BankError> {
    let rows = fetch_page(store.pool(), account_id, delta, start).await?;
    let want = delta.unsigned_abs() as usize;

    if rows.len() >= want || long_poll_ms == 0 {
        return Ok(rows);
    }

    let topic = format!("account:{account_id}");
    store
        .notify
        .wait_for(
            &topic,
            std::time::Duration::from_millis(long_poll_ms),
            |row_id| if delta > 0 { row_id > start } else { row_id <= start },
        )
        .await;

    fetch_page(store.pool(), account_id, delta, start).await
}

async fn fetch_page(
    pool: &PgPool,
    account_id: i64,
    delta: i64,
    start: i64,
) -> Result<Vec<TransactionRow>, BankError> {
    let want = delta.unsigned_abs() as i64;
    let rows = if delta > 0 {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE account_id = $1 AND row_id > $2
             ORDER BY row_id ASC LIMIT $3",
        )
        .bind(account_id)
        .bind(start)
        .bind(want)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE account_id = $1 AND row_id <= $2
             ORDER BY row_id DESC LIMIT $3",
        )
        .bind(account_id)
        .bind(start)
        .bind(want)
        .fetch_all(pool)
        .await?
    };
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_pub_subject_requires_32_decoded_bytes() {
        let content = [7u8; 32];
        let encoded = base32::encode(base32::Alphabet::Crockford, &content);
        assert!(parse_reserve_pub(&encoded).is_some());
        assert!(parse_reserve_pub("not base32!!").is_none());
        assert!(parse_reserve_pub("short").is_none());
    }

    #[test]
    fn wtid_subject_requires_hash_and_url() {
        assert_eq!(
            parse_wtid_subject("abc123 https://exchange.example/"),
            Some(("abc123".to_string(), "https://exchange.example/".to_string()))
        );
        assert!(parse_wtid_subject("no-url-here").is_none());
        assert!(parse_wtid_subject("abc123 not-a-url").is_none());
    }
}
