//! C5: TAN challenge lifecycle (spec §4.5). Code generation, retry counting and
//! expiry are modeled as plain row mutations guarded by the caller's transaction;
//! the four numbered rules in the spec are exercised directly as unit tests below
//! against an in-memory stand-in, and as DAO methods against Postgres above that.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::PgPool;

use crate::error::BankError;
use crate::models::{Challenge, ChallengeTryResult};

/// Six decimal digits, OS-backed RNG — never a predictable counter (spec §4.5).
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

pub async fn create(
    pool: &PgPool,
    account_id: i64,
    operation_kind: &str,
    now: DateTime<Utc>,
    validity: Duration,
    retries: i32,
) -> Result<i64, BankError> {
    let code = generate_code();
    let expires_at = now + validity;
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO challenges (account_id, code, created_at, expires_at, retries_left, operation_kind)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(account_id)
    .bind(&code)
    .bind(now)
    .bind(expires_at)
    .bind(retries)
    .bind(operation_kind)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn get(pool: &PgPool, id: i64) -> Result<Option<Challenge>, BankError> {
    let row = sqlx::query_as::<_, Challenge>("SELECT * FROM challenges WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Used by operation endpoints (withdrawal/cashout/transaction confirm) to resolve
/// whether a previously issued challenge has since been solved.
pub async fn is_confirmed(pool: &PgPool, id: i64) -> Result<bool, BankError> {
    let challenge = get(pool, id).await?;
    Ok(challenge.map(|c| c.confirmed_at.is_some()).unwrap_or(false))
}

pub async fn mark_sent(
    pool: &PgPool,
    id: i64,
    now: DateTime<Utc>,
) -> Result<(), BankError> {
    sqlx::query("UPDATE challenges SET sent_at = $1 WHERE id = $2")
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Rule 1: a confirmed challenge is sticky — `(true, false, false)` regardless of the
/// attempted code. Rule 2: after the retry budget is exhausted, `no_retry` latches
/// true even for the right code. Rule 4: past `expires_at`, `expired` latches true.
pub async fn try_code(
    pool: &PgPool,
    id: i64,
    code_attempt: &str,
    now: DateTime<Utc>,
) -> Result<ChallengeTryResult, BankError> {
    let challenge = get(pool, id)
        .await?
        .ok_or(BankError::ChallengeNotFound)?;

    let result = evaluate_try(&challenge, code_attempt, now);

    if result.ok && challenge.confirmed_at.is_none() {
        sqlx::query("UPDATE challenges SET confirmed_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
    } else if !result.ok && !result.expired && challenge.confirmed_at.is_none() {
        sqlx::query("UPDATE challenges SET retries_left = retries_left - 1 WHERE id = $1 AND retries_left > 0")
            .bind(id)
            .execute(pool)
            .await?;
    }

    Ok(result)
}

fn evaluate_try(challenge: &Challenge, code_attempt: &str, now: DateTime<Utc>) -> ChallengeTryResult {
    if challenge.confirmed_at.is_some() {
        return ChallengeTryResult { ok: true, no_retry: false, expired: false };
    }
    if now > challenge.expires_at {
        return ChallengeTryResult { ok: false, no_retry: false, expired: true };
    }
    if challenge.retries_left <= 0 {
        return ChallengeTryResult { ok: false, no_retry: true, expired: false };
    }
    ChallengeTryResult {
        ok: challenge.code == code_attempt,
        no_retry: false,
        expired: false,
    }
}

/// Rule 3 / Rule 4: returns the existing code iff still within the retransmit window
/// and unexpired; otherwise installs a fresh code, resets retries, and returns it.
pub async fn resend(
    pool: &PgPool,
    id: i64,
    now: DateTime<Utc>,
    retransmit_period: Duration,
    validity: Duration,
    retries: i32,
) -> Result<String, BankError> {
    let challenge = get(pool, id)
        .await?
        .ok_or(BankError::ChallengeNotFound)?;

    let within_retransmit_window = challenge
        .sent_at
        .map(|sent_at| now < sent_at + retransmit_period)
        .unwrap_or(false);
    let unexpired = now <= challenge.expires_at;

    if within_retransmit_window && unexpired {
        return Ok(challenge.code);
    }

    let code = generate_code();
    let expires_at = now + validity;
    sqlx::query(
        "UPDATE challenges SET code = $1, expires_at = $2, retries_left = $3, sent_at = NULL
         WHERE id = $4",
    )
    .bind(&code)
    .bind(expires_at)
    .bind(retries)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(code)
}

/// Invalidates open (unconfirmed) challenges bound to an account's TAN-gated
/// configuration by forcing an immediate expiry — the next `try`/`resend` will see
/// `expired == true` and must go through a fresh code (spec §4.5 "Invalidation").
pub async fn invalidate_open_for_account(
    pool: &PgPool,
    account_id: i64,
    now: DateTime<Utc>,
) -> Result<(), BankError> {
    sqlx::query(
        "UPDATE challenges SET expires_at = $1
         WHERE account_id = $2 AND confirmed_at IS NULL AND expires_at > $1",
    )
    .bind(now)
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_challenge(retries_left: i32, expires_in: Duration, confirmed: bool) -> Challenge {
        let now = Utc::now();
        Challenge {
            id: 1,
            account_id: 1,
            code: "123456".to_string(),
            created_at: now,
            expires_at: now + expires_in,
            retries_left,
            sent_at: Some(now),
            confirmed_at: if confirmed { Some(now) } else { None },
            operation_kind: "withdrawal".to_string(),
        }
    }

    #[test]
    fn rule1_confirmed_is_sticky_regardless_of_code() {
        let challenge = sample_challenge(3, Duration::minutes(5), true);
        let result = evaluate_try(&challenge, "000000", Utc::now());
        assert_eq!(result, ChallengeTryResult { ok: true, no_retry: false, expired: false });
    }

    #[test]
    fn rule2_exhausted_retries_latch_even_for_correct_code() {
        let challenge = sample_challenge(0, Duration::minutes(5), false);
        let result = evaluate_try(&challenge, "123456", Utc::now());
        assert_eq!(result, ChallengeTryResult { ok: false, no_retry: true, expired: false });
    }

    #[test]
    fn rule4_expired_overrides_correct_code() {
        let challenge = sample_challenge(3, Duration::minutes(-1), false);
        let result = evaluate_try(&challenge, "123456", Utc::now());
        assert_eq!(result, ChallengeTryResult { ok: false, no_retry: false, expired: true });
    }

    #[test]
    fn correct_code_within_budget_succeeds() {
        let challenge = sample_challenge(3, Duration::minutes(5), false);
        let result = evaluate_try(&challenge, "123456", Utc::now());
        assert!(result.ok && !result.no_retry && !result.expired);
    }

    #[test]
    fn wrong_code_within_budget_fails_without_latching() {
        let challenge = sample_challenge(3, Duration::minutes(5), false);
        let result = evaluate_try(&challenge, "000000", Utc::now());
        assert!(!result.ok && !result.no_retry && !result.expired);
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
