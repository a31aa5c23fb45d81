//! C9: Cashout DAO + FSM (spec §4.9). The debit posting is deferred until the TAN
//! challenge attached at create time is confirmed; confirmation and posting are
//! atomic. A failed TAN leaves the cashout pending; expiry aborts it (GC sweeps
//! expired-and-unconfirmed rows, see `gc.rs`).

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use crate::amount::{is_balance_enough, Amount};
use crate::conversion::{convert_cashout, ConversionConfig};
use crate::dao::account;
use crate::dao::transaction::{apply_signed_delta, run_serializable};
use crate::error::BankError;
use crate::models::Cashout;
use crate::store::Store;

pub async fn create(
    store: &Store,
    account_login: &str,
    request_uid: &str,
    amount_debit: &Amount,
    amount_credit: &Amount,
    conversion: &ConversionConfig,
    fiat_currency: &str,
    tan_ok: bool,
    now: DateTime<Utc>,
) -> Result<Cashout, BankError> {
    let account = account::require_by_login(store.pool(), account_login).await?;
    if account.is_taler_exchange {
        return Err(BankError::AccountIsExchange);
    }
    if account.tan_channel == "none" || account.cashout_payto.is_none() {
        return Err(BankError::MissingTanInfo);
    }

    if let Some(existing) = find_by_request_uid(store, account.id, request_uid).await? {
        let same_payload = existing.amount_debit_value == amount_debit.value as i64
            && existing.amount_debit_frac == amount_debit.frac as i32
            && existing.amount_credit_value == amount_credit.value as i64
            && existing.amount_credit_frac == amount_credit.frac as i32;
        if same_payload {
            return Ok(existing);
        }
        return Err(BankError::RequestUidReused);
    }

    let expected_credit = convert_cashout(conversion, amount_debit, fiat_currency)?;
    if &expected_credit != amount_credit {
        return Err(BankError::BadConversion);
    }

    let enough = is_balance_enough(&account.balance(), amount_debit, account.has_debit, &account.max_debit())?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let challenge_id = if tan_ok {
        None
    } else {
        Some(
            crate::dao::challenge::create(
                store.pool(),
                account.id,
                "cashout",
                now,
                chrono::Duration::minutes(10),
                3,
            )
            .await?,
        )
    };

    let row = sqlx::query_as::<_, Cashout>(
        "INSERT INTO cashouts (request_uid, account_id, amount_debit_value, amount_debit_frac,
            debit_currency, amount_credit_value, amount_credit_frac, credit_currency,
            created_at, tan_challenge_id, confirmed_at, aborted)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL, FALSE)
         RETURNING *",
    )
    .bind(request_uid)
    .bind(account.id)
    .bind(amount_debit.value as i64)
    .bind(amount_debit.frac as i32)
    .bind(&amount_debit.currency)
    .bind(amount_credit.value as i64)
    .bind(amount_credit.frac as i32)
    .bind(&amount_credit.currency)
    .bind(now)
    .bind(challenge_id)
    .fetch_one(store.pool())
    .await?;

    if let Some(challenge_id) = challenge_id {
        return Err(BankError::ChallengeRequired { challenge_id });
    }

    confirm(store, row.id, tan_ok).await
}

pub async fn get(store: &Store, id: i64) -> Result<Option<Cashout>, BankError> {
    let row = sqlx::query_as::<_, Cashout>("SELECT * FROM cashouts WHERE id = $1")
        .bind(id)
        .fetch_optional(store.pool())
        .await?;
    Ok(row)
}

pub async fn list_for_account(store: &Store, account_id: i64) -> Result<Vec<Cashout>, BankError> {
    let rows = sqlx::query_as::<_, Cashout>(
        "SELECT * FROM cashouts WHERE account_id = $1 ORDER BY id DESC",
    )
    .bind(account_id)
    .fetch_all(store.pool())
    .await?;
    Ok(rows)
}

async fn find_by_request_uid(
    store: &Store,
    account_id: i64,
    request_uid: &str,
) -> Result<Option<Cashout>, BankError> {
    let row = sqlx::query_as::<_, Cashout>(
        "SELECT * FROM cashouts WHERE account_id = $1 AND request_uid = $2",
    )
    .bind(account_id)
    .bind(request_uid)
    .fetch_optional(store.pool())
    .await?;
    Ok(row)
}

/// Confirms a pending cashout's TAN challenge, posting the deferred debit atomically
/// with the status transition.
pub async fn confirm(store: &Store, id: i64, tan_ok: bool) -> Result<Cashout, BankError> {
    let cashout = get(store, id).await?.ok_or(BankError::TransactionNotFound)?;
    if cashout.aborted {
        return Err(BankError::AbortConfirmConflict);
    }
    if cashout.confirmed_at.is_some() {
        return Ok(cashout);
    }
    if !tan_ok {
        return Err(BankError::ChallengeRequired {
            challenge_id: cashout.tan_challenge_id.unwrap_or_default(),
        });
    }

    let account = account::find_by_id(store.pool(), cashout.account_id)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    let cashout_payto = account
        .cashout_payto
        .clone()
        .ok_or(BankError::MissingTanInfo)?;

    let debit = Amount {
        value: cashout.amount_debit_value as u64,
        frac: cashout.amount_debit_frac as u32,
        currency: cashout.debit_currency.clone(),
    };
    let credit = Amount {
        value: cashout.amount_credit_value as u64,
        frac: cashout.amount_credit_frac as u32,
        currency: cashout.credit_currency.clone(),
    };

    let account_id = account.id;
    run_serializable(store, move |txn| {
        let debit = debit.clone();
        let credit = credit.clone();
        let cashout_payto = cashout_payto.clone();
        Box::pin(confirm_within_txn(txn, id, account_id, debit, credit, cashout_payto))
    })
    .await?;

    store.notify.publish(format!("cashout:{id}"), account_id);
    crate::metrics::record_cashout_transition("confirmed");
    get(store, id).await?.ok_or(BankError::TransactionNotFound)
}

async fn confirm_within_txn(
    txn: &mut Transaction<'_, Postgres>,
    cashout_id: i64,
    account_id: i64,
    debit: Amount,
    credit: Amount,
    cashout_payto: String,
) -> Result<(), BankError> {
    let updated = sqlx::query(
        "UPDATE cashouts SET confirmed_at = now() WHERE id = $1 AND confirmed_at IS NULL AND aborted = FALSE",
    )
    .bind(cashout_id)
    .execute(&mut **txn)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(BankError::AbortConfirmConflict);
    }

    let account = account::lock_for_update(txn, account_id).await?;
    let enough = is_balance_enough(&account.balance(), &debit, account.has_debit, &account.max_debit())?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let (value, frac, has_debit) = apply_signed_delta(&account.balance(), &debit, account.has_debit, false)?;
    account::apply_balance_delta(
        txn,
        account.id,
        &Amount::new(value, frac, account.currency.clone())?,
        has_debit,
    )
    .await?;

    sqlx::query(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6, 'debit', now())",
    )
    .bind(account.id)
    .bind(&cashout_payto)
    .bind(format!("cashout #{cashout_id}"))
    .bind(debit.value as i64)
    .bind(debit.frac as i32)
    .bind(&debit.currency)
    .execute(&mut **txn)
    .await?;

    crate::stats::record_all_frames(
        txn,
        Utc::now(),
        crate::stats::Metric::Cashout,
        &debit,
        Some(&credit),
    )
    .await?;

    Ok(())
}

/// Marks a pending or TAN-expired cashout as aborted; the debit was never posted so
/// no balance reversal is needed.
pub async fn abort(store: &Store, id: i64) -> Result<Cashout, BankError> {
    let cashout = get(store, id).await?.ok_or(BankError::TransactionNotFound)?;
    if cashout.confirmed_at.is_some() {
        return Err(BankError::ConfirmAbortConflict);
    }
    if cashout.aborted {
        return Ok(cashout);
    }

    let row = sqlx::query_as::<_, Cashout>(
        "UPDATE cashouts SET aborted = TRUE WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(store.pool())
    .await?;

    store.notify.publish(format!("cashout:{id}"), row.account_id);
    crate::metrics::record_cashout_transition("aborted");
    Ok(row)
}
