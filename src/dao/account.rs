//! C3: Account DAO. Idempotent creation, admin-gated field updates, balance-zero
//! deletion. Query shape grounded on `packages/operator/src/db/mod.rs`'s
//! `query`/`query_as` + positional-bind idiom.

use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::amount::Amount;
use crate::dao::is_reserved_login;
use crate::error::BankError;
use crate::models::{Account, NewAccount};

pub enum CreateOutcome {
    Created(Account),
    AlreadyExists(Account),
}

/// Creates an account, or returns the existing one if `(login, internal_payto, name,
/// is_public, is_taler_exchange)` matches exactly (spec §4.3 idempotent create).
pub async fn create(
    pool: &PgPool,
    new: NewAccount,
    regional_currency: &str,
) -> Result<CreateOutcome, BankError> {
    if is_reserved_login(&new.login) {
        return Err(BankError::ReservedUsernameConflict);
    }
    if new.login == "admin" && new.is_public {
        return Err(BankError::ParameterMalformed(
            "admin cannot be a public account".to_string(),
        ));
    }

    if let Some(existing) = find_by_login(pool, &new.login).await? {
        if existing.internal_payto == new.internal_payto
            && existing.name == new.name
            && existing.is_public == new.is_public
            && existing.is_taler_exchange == new.is_taler_exchange
        {
            return Ok(CreateOutcome::AlreadyExists(existing));
        }
        return Err(BankError::UsernameReuse);
    }

    if find_by_payto(pool, &new.internal_payto).await?.is_some() {
        return Err(BankError::PaytoReuse);
    }

    let row = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (login, password_hash, name, phone, email, cashout_payto,
            internal_payto, tan_channel, is_public, is_taler_exchange, currency)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(&new.login)
    .bind(&new.password_hash)
    .bind(&new.name)
    .bind(&new.phone)
    .bind(&new.email)
    .bind(&new.cashout_payto)
    .bind(&new.internal_payto)
    .bind(&new.tan_channel)
    .bind(new.is_public)
    .bind(new.is_taler_exchange)
    .bind(regional_currency)
    .fetch_one(pool)
    .await?;

    Ok(CreateOutcome::Created(row))
}

pub async fn find_by_login(pool: &PgPool, login: &str) -> Result<Option<Account>, BankError> {
    let row = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE login = $1")
        .bind(login)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_payto(pool: &PgPool, payto: &str) -> Result<Option<Account>, BankError> {
    let row = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE internal_payto = $1")
        .bind(payto)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Account>, BankError> {
    let row = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn require_by_login(pool: &PgPool, login: &str) -> Result<Account, BankError> {
    find_by_login(pool, login)
        .await?
        .ok_or_else(|| BankError::UnknownAccount(login.to_string()))
}

/// Sets the admin-only debit threshold. Callers must already have verified the
/// caller is an admin (spec §4.3 "Admin-only fields").
pub async fn set_debit_threshold(
    pool: &PgPool,
    account_id: i64,
    max_debit: &Amount,
) -> Result<(), BankError> {
    sqlx::query(
        "UPDATE accounts SET has_debit = TRUE, max_debit_value = $1, max_debit_frac = $2 WHERE id = $3",
    )
    .bind(max_debit.value as i64)
    .bind(max_debit.frac as i32)
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_tan_channel(
    pool: &PgPool,
    account_id: i64,
    channel: &str,
) -> Result<(), BankError> {
    sqlx::query("UPDATE accounts SET tan_channel = $1 WHERE id = $2")
        .bind(channel)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_password_hash(
    pool: &PgPool,
    account_id: i64,
    password_hash: &str,
) -> Result<(), BankError> {
    sqlx::query("UPDATE accounts SET password_hash = $1 WHERE id = $2")
        .bind(password_hash)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_cashout_payto(
    pool: &PgPool,
    account_id: i64,
    payto: Option<&str>,
) -> Result<(), BankError> {
    sqlx::query("UPDATE accounts SET cashout_payto = $1 WHERE id = $2")
        .bind(payto)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Soft-deletes the account. Requires zero balance; callers enforce the 2FA
/// precondition for non-admins before calling.
pub async fn delete(pool: &PgPool, login: &str) -> Result<(), BankError> {
    if is_reserved_login(login) {
        return Err(BankError::ReservedUsernameConflict);
    }
    let account = require_by_login(pool, login).await?;
    if account.balance_value != 0 || account.balance_frac != 0 {
        return Err(BankError::BalanceNotZero);
    }
    sqlx::query("UPDATE accounts SET is_deleted = TRUE, deleted_at = now() WHERE id = $1")
        .bind(account.id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Applies a signed balance delta inside an open transaction; used by the ledger DAO
/// while holding the serializable transaction (spec §4.6). Returns the resulting
/// Amount/has_debit pair so the caller can check the debit cap before committing.
pub async fn apply_balance_delta(
    txn: &mut Transaction<'_, Postgres>,
    account_id: i64,
    new_balance: &Amount,
    new_has_debit: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE accounts SET balance_value = $1, balance_frac = $2, has_debit = $3 WHERE id = $4",
    )
    .bind(new_balance.value as i64)
    .bind(new_balance.frac as i32)
    .bind(new_has_debit)
    .bind(account_id)
    .execute(&mut **txn)
    .await?;
    Ok(())
}

pub async fn lock_for_update(
    txn: &mut Transaction<'_, Postgres>,
    account_id: i64,
) -> Result<Account, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
        .bind(account_id)
        .fetch_one(&mut **txn)
        .await?;
    Ok(Account {
        id: row.try_get("id")?,
        login: row.try_get("login")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        cashout_payto: row.try_get("cashout_payto")?,
        internal_payto: row.try_get("internal_payto")?,
        tan_channel: row.try_get("tan_channel")?,
        is_public: row.try_get("is_public")?,
        is_taler_exchange: row.try_get("is_taler_exchange")?,
        is_deleted: row.try_get("is_deleted")?,
        balance_value: row.try_get("balance_value")?,
        balance_frac: row.try_get("balance_frac")?,
        has_debit: row.try_get("has_debit")?,
        max_debit_value: row.try_get("max_debit_value")?,
        max_debit_frac: row.try_get("max_debit_frac")?,
        currency: row.try_get("currency")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Account {
    pub fn balance(&self) -> Amount {
        Amount {
            value: self.balance_value as u64,
            frac: self.balance_frac as u32,
            currency: self.currency.clone(),
        }
    }

    pub fn max_debit(&self) -> Amount {
        Amount {
            value: self.max_debit_value as u64,
            frac: self.max_debit_frac as u32,
            currency: self.currency.clone(),
        }
    }
}
