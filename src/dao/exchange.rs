//! C8: Exchange DAO (spec §4.8) — two narrow operations restricted to accounts with
//! `is_taler_exchange = true`: recording an incoming reserve deposit, and recording
//! an outgoing wire transfer.

use sqlx::{Postgres, Transaction};

use crate::amount::Amount;
use crate::dao::account;
use crate::dao::transaction::{apply_signed_delta, run_serializable};
use crate::error::BankError;
use crate::models::TransactionRow;
use crate::store::Store;

pub enum AddIncomingOutcome {
    Posted { row_id: i64 },
}

/// `reserve_pub` must be globally unique across history; reuse is a hard conflict
/// (unlike the bounce-on-reuse behavior of an ordinary transaction subject, since
/// this entry point is the exchange's own authenticated API, not a customer wire).
pub async fn add_incoming(
    store: &Store,
    exchange_login: &str,
    debtor_login: &str,
    reserve_pub: &str,
    amount: &Amount,
) -> Result<AddIncomingOutcome, BankError> {
    let exchange = account::require_by_login(store.pool(), exchange_login).await?;
    if !exchange.is_taler_exchange {
        return Err(BankError::AccountIsNotExchange);
    }
    let debtor = account::require_by_login(store.pool(), debtor_login).await?;
    if debtor.is_taler_exchange {
        return Err(BankError::AccountIsExchange);
    }

    let reused = sqlx::query("SELECT 1 FROM transactions WHERE reserve_pub = $1")
        .bind(reserve_pub)
        .fetch_optional(store.pool())
        .await?
        .is_some();
    if reused {
        return Err(BankError::DuplicateReservePubSubject);
    }

    let enough = crate::amount::is_balance_enough(
        &debtor.balance(),
        amount,
        debtor.has_debit,
        &debtor.max_debit(),
    )?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let reserve_pub_owned = reserve_pub.to_string();
    let amount_owned = amount.clone();
    let debtor_id = debtor.id;
    let exchange_id = exchange.id;
    let debtor_payto = debtor.internal_payto.clone();
    let exchange_payto = exchange.internal_payto.clone();

    let row_id = run_serializable(store, move |txn| {
        let reserve_pub = reserve_pub_owned.clone();
        let amount = amount_owned.clone();
        let debtor_payto = debtor_payto.clone();
        let exchange_payto = exchange_payto.clone();
        Box::pin(add_incoming_within_txn(
            txn,
            debtor_id,
            exchange_id,
            debtor_payto,
            exchange_payto,
            reserve_pub,
            amount,
        ))
    })
    .await?;

    store.notify.publish(format!("account:{debtor_id}"), row_id);
    store.notify.publish(format!("account:{exchange_id}"), row_id);
    Ok(AddIncomingOutcome::Posted { row_id })
}

async fn add_incoming_within_txn(
    txn: &mut Transaction<'_, Postgres>,
    debtor_id: i64,
    exchange_id: i64,
    debtor_payto: String,
    exchange_payto: String,
    reserve_pub: String,
    amount: Amount,
) -> Result<i64, BankError> {
    let debtor = account::lock_for_update(txn, debtor_id).await?;
    let exchange = account::lock_for_update(txn, exchange_id).await?;

    let enough = crate::amount::is_balance_enough(
        &debtor.balance(),
        &amount,
        debtor.has_debit,
        &debtor.max_debit(),
    )?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let reused = sqlx::query("SELECT 1 FROM transactions WHERE reserve_pub = $1")
        .bind(&reserve_pub)
        .fetch_optional(&mut **txn)
        .await?
        .is_some();
    if reused {
        return Err(BankError::DuplicateReservePubSubject);
    }

    let (debit_value, debit_frac, debit_has_debit) =
        apply_signed_delta(&debtor.balance(), &amount, debtor.has_debit, false)?;
    account::apply_balance_delta(
        txn,
        debtor.id,
        &Amount::new(debit_value, debit_frac, debtor.currency.clone())?,
        debit_has_debit,
    )
    .await?;

    let (credit_value, credit_frac, credit_has_debit) =
        apply_signed_delta(&exchange.balance(), &amount, exchange.has_debit, true)?;
    account::apply_balance_delta(
        txn,
        exchange.id,
        &Amount::new(credit_value, credit_frac, exchange.currency.clone())?,
        credit_has_debit,
    )
    .await?;

    sqlx::query(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp, reserve_pub)
         VALUES ($1, $2, $3, $4, $5, $6, 'debit', now(), NULL)",
    )
    .bind(debtor.id)
    .bind(&exchange_payto)
    .bind(&reserve_pub)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .execute(&mut **txn)
    .await?;

    let row_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp, reserve_pub)
         VALUES ($1, $2, $3, $4, $5, $6, 'credit', now(), $7)
         RETURNING row_id",
    )
    .bind(exchange.id)
    .bind(&debtor_payto)
    .bind(&reserve_pub)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(&reserve_pub)
    .fetch_one(&mut **txn)
    .await?;

    crate::stats::record_all_frames(
        txn,
        chrono::Utc::now(),
        crate::stats::Metric::TalerIn,
        &amount,
        None,
    )
    .await?;

    Ok(row_id)
}

pub enum TransferOutcome {
    Posted { row_id: i64 },
    AlreadyPosted { row_id: i64 },
}

/// `request_uid` idempotency is payload-sensitive: identical `(wtid, url, amount,
/// creditor)` under the same UID returns the original row; a differing payload is a
/// conflict (spec §4.8).
pub async fn transfer(
    store: &Store,
    exchange_login: &str,
    creditor_login: &str,
    request_uid: &str,
    wtid: &str,
    url: &str,
    amount: &Amount,
) -> Result<TransferOutcome, BankError> {
    let exchange = account::require_by_login(store.pool(), exchange_login).await?;
    if !exchange.is_taler_exchange {
        return Err(BankError::AccountIsNotExchange);
    }
    let creditor = account::require_by_login(store.pool(), creditor_login).await?;
    if creditor.is_taler_exchange {
        return Err(BankError::AccountIsExchange);
    }

    if let Some(existing) = find_by_exchange_request_uid(store, exchange.id, request_uid).await? {
        let same_payload = existing.wtid.as_deref() == Some(wtid)
            && existing.exchange_url.as_deref() == Some(url)
            && existing.amount_value == amount.value as i64
            && existing.amount_frac == amount.frac as i32
            && existing.counterpart_payto == creditor.internal_payto;
        if same_payload {
            return Ok(TransferOutcome::AlreadyPosted {
                row_id: existing.row_id,
            });
        }
        return Err(BankError::TransferRequestUidReused);
    }

    let enough = crate::amount::is_balance_enough(
        &exchange.balance(),
        amount,
        exchange.has_debit,
        &exchange.max_debit(),
    )?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let exchange_id = exchange.id;
    let creditor_id = creditor.id;
    let exchange_payto = exchange.internal_payto.clone();
    let creditor_payto = creditor.internal_payto.clone();
    let wtid_owned = wtid.to_string();
    let url_owned = url.to_string();
    let request_uid_owned = request_uid.to_string();
    let amount_owned = amount.clone();

    let row_id = run_serializable(store, move |txn| {
        Box::pin(transfer_within_txn(
            txn,
            exchange_id,
            creditor_id,
            exchange_payto.clone(),
            creditor_payto.clone(),
            wtid_owned.clone(),
            url_owned.clone(),
            request_uid_owned.clone(),
            amount_owned.clone(),
        ))
    })
    .await?;

    store.notify.publish(format!("account:{exchange_id}"), row_id);
    store.notify.publish(format!("account:{creditor_id}"), row_id);
    Ok(TransferOutcome::Posted { row_id })
}

#[allow(clippy::too_many_arguments)]
async fn transfer_within_txn(
    txn: &mut Transaction<'_, Postgres>,
    exchange_id: i64,
    creditor_id: i64,
    exchange_payto: String,
    creditor_payto: String,
    wtid: String,
    url: String,
    request_uid: String,
    amount: Amount,
) -> Result<i64, BankError> {
    let exchange = account::lock_for_update(txn, exchange_id).await?;
    let creditor = account::lock_for_update(txn, creditor_id).await?;

    let enough = crate::amount::is_balance_enough(
        &exchange.balance(),
        &amount,
        exchange.has_debit,
        &exchange.max_debit(),
    )?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let (debit_value, debit_frac, debit_has_debit) =
        apply_signed_delta(&exchange.balance(), &amount, exchange.has_debit, false)?;
    account::apply_balance_delta(
        txn,
        exchange.id,
        &Amount::new(debit_value, debit_frac, exchange.currency.clone())?,
        debit_has_debit,
    )
    .await?;

    let (credit_value, credit_frac, credit_has_debit) =
        apply_signed_delta(&creditor.balance(), &amount, creditor.has_debit, true)?;
    account::apply_balance_delta(
        txn,
        creditor.id,
        &Amount::new(credit_value, credit_frac, creditor.currency.clone())?,
        credit_has_debit,
    )
    .await?;

    let row_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp, wtid, exchange_url, request_uid)
         VALUES ($1, $2, $3, $4, $5, $6, 'debit', now(), $7, $8, $9)
         RETURNING row_id",
    )
    .bind(exchange.id)
    .bind(&creditor_payto)
    .bind(format!("{wtid} {url}"))
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(&wtid)
    .bind(&url)
    .bind(&request_uid)
    .fetch_one(&mut **txn)
    .await?;

    sqlx::query(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6, 'credit', now())",
    )
    .bind(creditor.id)
    .bind(&exchange_payto)
    .bind(format!("{wtid} {url}"))
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .execute(&mut **txn)
    .await?;

    crate::stats::record_all_frames(
        txn,
        chrono::Utc::now(),
        crate::stats::Metric::TalerOut,
        &amount,
        None,
    )
    .await?;

    Ok(row_id)
}

/// Taler wire-gateway `history/incoming`: credit-side postings carrying a `reserve_pub`.
pub async fn history_incoming(
    store: &Store,
    exchange_account_id: i64,
    delta: i64,
    start: i64,
) -> Result<Vec<TransactionRow>, BankError> {
    let want = delta.unsigned_abs() as i64;
    let rows = if delta > 0 {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE account_id = $1 AND direction = 'credit'
                AND reserve_pub IS NOT NULL AND row_id > $2
             ORDER BY row_id ASC LIMIT $3",
        )
        .bind(exchange_account_id)
        .bind(start)
        .bind(want)
        .fetch_all(store.pool())
        .await?
    } else {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE account_id = $1 AND direction = 'credit'
                AND reserve_pub IS NOT NULL AND row_id <= $2
             ORDER BY row_id DESC LIMIT $3",
        )
        .bind(exchange_account_id)
        .bind(start)
        .bind(want)
        .fetch_all(store.pool())
        .await?
    };
    Ok(rows)
}

/// Taler wire-gateway `history/outgoing`: debit-side postings carrying a `wtid`.
pub async fn history_outgoing(
    store: &Store,
    exchange_account_id: i64,
    delta: i64,
    start: i64,
) -> Result<Vec<TransactionRow>, BankError> {
    let want = delta.unsigned_abs() as i64;
    let rows = if delta > 0 {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE account_id = $1 AND direction = 'debit'
                AND wtid IS NOT NULL AND row_id > $2
             ORDER BY row_id ASC LIMIT $3",
        )
        .bind(exchange_account_id)
        .bind(start)
        .bind(want)
        .fetch_all(store.pool())
        .await?
    } else {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE account_id = $1 AND direction = 'debit'
                AND wtid IS NOT NULL AND row_id <= $2
             ORDER BY row_id DESC LIMIT $3",
        )
        .bind(exchange_account_id)
        .bind(start)
        .bind(want)
        .fetch_all(store.pool())
        .await?
    };
    Ok(rows)
}

async fn find_by_exchange_request_uid(
    store: &Store,
    exchange_account_id: i64,
    request_uid: &str,
) -> Result<Option<TransactionRow>, BankError> {
    let row = sqlx::query_as::<_, TransactionRow>(
        "SELECT * FROM transactions WHERE account_id = $1 AND request_uid = $2 AND direction = 'debit'",
    )
    .bind(exchange_account_id)
    .bind(request_uid)
    .fetch_optional(store.pool())
    .await?;
    Ok(row)
}
