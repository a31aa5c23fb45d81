//! C7: Withdrawal DAO + FSM (spec §4.7). States: pending -> selected -> confirmed,
//! or pending|selected -> aborted. Built on `Store::serializable` the same way the
//! transaction DAO is; see `dao::transaction::run_serializable`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::amount::{is_balance_enough, Amount};
use crate::dao::account;
use crate::dao::transaction::run_serializable;
use crate::error::BankError;
use crate::models::{Withdrawal, WithdrawalStatus};
use crate::store::Store;

pub async fn create(
    store: &Store,
    account_login: &str,
    uuid: Uuid,
    amount: &Amount,
    now: DateTime<Utc>,
) -> Result<Withdrawal, BankError> {
    let account = account::require_by_login(store.pool(), account_login).await?;
    if account.is_taler_exchange {
        return Err(BankError::AccountIsExchange);
    }
    let enough = is_balance_enough(&account.balance(), amount, account.has_debit, &account.max_debit())?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let row = sqlx::query_as::<_, Withdrawal>(
        "INSERT INTO withdrawals (uuid, account_id, amount_value, amount_frac, currency,
            status, selection_done, confirmed, created_at)
         VALUES ($1, $2, $3, $4, $5, 'pending', FALSE, FALSE, $6)
         RETURNING *",
    )
    .bind(uuid)
    .bind(account.id)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(now)
    .fetch_one(store.pool())
    .await?;

    crate::metrics::record_withdrawal_transition("pending");
    Ok(row)
}

pub async fn get(pool: &PgPool, uuid: Uuid) -> Result<Option<Withdrawal>, BankError> {
    let row = sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE uuid = $1")
        .bind(uuid)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Long-polling read: returns immediately if the current status differs from
/// `old_state`, otherwise waits up to `long_poll_ms`.
pub async fn get_long_poll(
    store: &Store,
    uuid: Uuid,
    old_state: Option<WithdrawalStatus>,
    long_poll_ms: u64,
) -> Result<Option<Withdrawal>, BankError> {
    let current = get(store.pool(), uuid).await?;
    let current_status = current
        .as_ref()
        .and_then(|w| WithdrawalStatus::from_str_opt(&w.status));

    if current.is_none() || current_status != old_state || long_poll_ms == 0 {
        return Ok(current);
    }

    store
        .notify
        .wait_for(
            &format!("withdrawal:{uuid}"),
            std::time::Duration::from_millis(long_poll_ms),
            |_| true,
        )
        .await;

    get(store.pool(), uuid).await
}

/// Transitions pending -> selected. Idempotent on identical `(exchange_payto,
/// reserve_pub)`; a differing `reserve_pub` is `RESERVE_SELECTION_CONFLICT`.
pub async fn set_details(
    store: &Store,
    uuid: Uuid,
    exchange_payto: &str,
    reserve_pub: &str,
) -> Result<Withdrawal, BankError> {
    let exchange = account::find_by_payto(store.pool(), exchange_payto)
        .await?
        .ok_or_else(|| BankError::UnknownAccount(exchange_payto.to_string()))?;
    if !exchange.is_taler_exchange {
        return Err(BankError::AccountIsNotExchange);
    }

    let withdrawal = get(store.pool(), uuid)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    let status = WithdrawalStatus::from_str_opt(&withdrawal.status)
        .ok_or_else(|| BankError::Internal(eyre::eyre!("corrupt withdrawal status")))?;

    match status {
        WithdrawalStatus::Selected => {
            if withdrawal.selected_exchange_payto.as_deref() == Some(exchange_payto)
                && withdrawal.reserve_pub.as_deref() == Some(reserve_pub)
            {
                return Ok(withdrawal);
            }
            Err(BankError::ReserveSelectionConflict)
        }
        WithdrawalStatus::Pending => {
            let row = sqlx::query_as::<_, Withdrawal>(
                "UPDATE withdrawals SET status = 'selected', selected_exchange_payto = $1,
                    reserve_pub = $2, selection_done = TRUE
                 WHERE uuid = $3 AND status = 'pending'
                 RETURNING *",
            )
            .bind(exchange_payto)
            .bind(reserve_pub)
            .bind(uuid)
            .fetch_optional(store.pool())
            .await?
            .ok_or(BankError::ReserveSelectionConflict)?;

            store.notify.publish(format!("withdrawal:{uuid}"), withdrawal.account_id);
            crate::metrics::record_withdrawal_transition("selected");
            Ok(row)
        }
        WithdrawalStatus::Aborted => Err(BankError::AbortConfirmConflict),
        WithdrawalStatus::Confirmed => Err(BankError::ConfirmAbortConflict),
    }
}

/// Transitions selected -> confirmed. Re-checks debit capacity at confirmation time
/// and posts the exchange-incoming ledger entry atomically with the transition.
pub async fn confirm(
    store: &Store,
    uuid: Uuid,
    now: DateTime<Utc>,
    tan_ok: bool,
) -> Result<Withdrawal, BankError> {
    let withdrawal = get(store.pool(), uuid)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    let status = WithdrawalStatus::from_str_opt(&withdrawal.status)
        .ok_or_else(|| BankError::Internal(eyre::eyre!("corrupt withdrawal status")))?;

    match status {
        WithdrawalStatus::Confirmed => return Ok(withdrawal),
        WithdrawalStatus::Aborted => return Err(BankError::AbortConfirmConflict),
        WithdrawalStatus::Pending => return Err(BankError::ConfirmIncomplete),
        WithdrawalStatus::Selected => {}
    }

    let account = account::find_by_id(store.pool(), withdrawal.account_id)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    if account.tan_channel != "none" && !tan_ok {
        let challenge_id = crate::dao::challenge::create(
            store.pool(),
            account.id,
            "withdrawal",
            now,
            chrono::Duration::minutes(10),
            3,
        )
        .await?;
        return Err(BankError::ChallengeRequired { challenge_id });
    }

    let reserve_pub = withdrawal
        .reserve_pub
        .clone()
        .ok_or(BankError::ConfirmIncomplete)?;
    let exchange_payto = withdrawal
        .selected_exchange_payto
        .clone()
        .ok_or(BankError::ConfirmIncomplete)?;
    let exchange = account::find_by_payto(store.pool(), &exchange_payto)
        .await?
        .ok_or(BankError::ConfirmIncomplete)?;

    let amount = withdrawal.amount(&account.currency);

    run_serializable(store, move |txn| {
        let reserve_pub = reserve_pub.clone();
        let amount = amount.clone();
        Box::pin(confirm_within_txn(
            txn,
            uuid,
            account.id,
            exchange.id,
            amount,
            reserve_pub,
        ))
    })
    .await?;

    store.notify.publish(format!("withdrawal:{uuid}"), account.id);
    crate::metrics::record_withdrawal_transition("confirmed");
    get(store.pool(), uuid)
        .await?
        .ok_or(BankError::TransactionNotFound)
}

async fn confirm_within_txn(
    txn: &mut Transaction<'_, Postgres>,
    uuid: Uuid,
    account_id: i64,
    exchange_id: i64,
    amount: Amount,
    reserve_pub: String,
) -> Result<(), BankError> {
    let updated = sqlx::query(
        "UPDATE withdrawals SET status = 'confirmed', confirmed = TRUE
         WHERE uuid = $1 AND status = 'selected'",
    )
    .bind(uuid)
    .execute(&mut **txn)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(BankError::AbortConfirmConflict);
    }

    let account = account::lock_for_update(txn, account_id).await?;
    let exchange = account::lock_for_update(txn, exchange_id).await?;

    let enough = is_balance_enough(&account.balance(), &amount, account.has_debit, &account.max_debit())?;
    if !enough {
        return Err(BankError::UnallowedDebit);
    }

    let (debit_value, debit_frac, debit_has_debit) =
        crate::dao::transaction::apply_signed_delta(&account.balance(), &amount, account.has_debit, false)?;
    account::apply_balance_delta(
        txn,
        account.id,
        &Amount::new(debit_value, debit_frac, account.currency.clone())?,
        debit_has_debit,
    )
    .await?;

    let (credit_value, credit_frac, credit_has_debit) =
        crate::dao::transaction::apply_signed_delta(&exchange.balance(), &amount, exchange.has_debit, true)?;
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
    .bind(account.id)
    .bind(&exchange.internal_payto)
    .bind(&reserve_pub)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .execute(&mut **txn)
    .await?;

    sqlx::query(
        "INSERT INTO transactions (account_id, counterpart_payto, subject, amount_value,
            amount_frac, currency, direction, timestamp, reserve_pub)
         VALUES ($1, $2, $3, $4, $5, $6, 'credit', now(), $7)",
    )
    .bind(exchange.id)
    .bind(&account.internal_payto)
    .bind(&reserve_pub)
    .bind(amount.value as i64)
    .bind(amount.frac as i32)
    .bind(&amount.currency)
    .bind(&reserve_pub)
    .execute(&mut **txn)
    .await?;

    crate::stats::record_all_frames(
        txn,
        Utc::now(),
        crate::stats::Metric::TalerIn,
        &amount,
        None,
    )
    .await?;

    Ok(())
}

/// Transitions pending|selected -> aborted.
pub async fn abort(store: &Store, uuid: Uuid) -> Result<Withdrawal, BankError> {
    let withdrawal = get(store.pool(), uuid)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    let status = WithdrawalStatus::from_str_opt(&withdrawal.status)
        .ok_or_else(|| BankError::Internal(eyre::eyre!("corrupt withdrawal status")))?;

    match status {
        WithdrawalStatus::Confirmed => return Err(BankError::ConfirmAbortConflict),
        WithdrawalStatus::Aborted => return Ok(withdrawal),
        WithdrawalStatus::Pending | WithdrawalStatus::Selected => {}
    }

    let row = sqlx::query_as::<_, Withdrawal>(
        "UPDATE withdrawals SET status = 'aborted' WHERE uuid = $1 RETURNING *",
    )
    .bind(uuid)
    .fetch_one(store.pool())
    .await?;

    store.notify.publish(format!("withdrawal:{uuid}"), row.account_id);
    crate::metrics::record_withdrawal_transition("aborted");
    Ok(row)
}

impl Withdrawal {
    fn amount(&self, currency: &str) -> Amount {
        Amount {
            value: self.amount_value as u64,
            frac: self.amount_frac as u32,
            currency: currency.to_string(),
        }
    }
}
