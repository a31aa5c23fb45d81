//! C4: Bearer token lifecycle. Content is 32 random bytes; wire format is
//! `Bearer secret-token:<base32crockford(content)>` (spec §3, §4.4).

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::PgPool;

use crate::error::BankError;
use crate::models::{BearerToken, TokenScope};

pub const TOKEN_LEN: usize = 32;

pub fn new_token_content() -> [u8; TOKEN_LEN] {
    let mut bytes = [0u8; TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub fn encode_token(content: &[u8]) -> String {
    format!(
        "secret-token:{}",
        base32::encode(base32::Alphabet::Crockford, content)
    )
}

pub fn decode_token(wire: &str) -> Result<Vec<u8>, BankError> {
    let encoded = wire
        .strip_prefix("secret-token:")
        .ok_or_else(|| BankError::HeadersMalformed("expected secret-token: prefix".to_string()))?;
    let decoded = base32::decode(base32::Alphabet::Crockford, encoded)
        .ok_or_else(|| BankError::HeadersMalformed("invalid base32 token".to_string()))?;
    if decoded.len() != TOKEN_LEN {
        return Err(BankError::HeadersMalformed(
            "token must decode to exactly 32 bytes".to_string(),
        ));
    }
    Ok(decoded)
}

/// `d_us <= 0` or non-finite is rejected by the caller before this is invoked; here
/// we only enforce the max-duration cap (spec §4.4).
pub fn clamp_expiry(
    now: DateTime<Utc>,
    requested: DateTime<Utc>,
    max_duration: Duration,
) -> Result<DateTime<Utc>, BankError> {
    if requested <= now {
        return Err(BankError::ParameterMalformed(
            "token expiry must be in the future".to_string(),
        ));
    }
    if requested - now > max_duration {
        return Err(BankError::ParameterMalformed(
            "token duration exceeds the maximum allowed".to_string(),
        ));
    }
    Ok(requested)
}

pub async fn create(
    pool: &PgPool,
    account_id: i64,
    content: &[u8],
    scope: TokenScope,
    refreshable: bool,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), BankError> {
    sqlx::query(
        "INSERT INTO bearer_tokens (content, account_id, scope, refreshable, created_at, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(content)
    .bind(account_id)
    .bind(scope.as_str())
    .bind(refreshable)
    .bind(now)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &PgPool, content: &[u8]) -> Result<Option<BearerToken>, BankError> {
    let row = sqlx::query_as::<_, BearerToken>(
        "SELECT * FROM bearer_tokens WHERE content = $1",
    )
    .bind(content)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete(pool: &PgPool, content: &[u8]) -> Result<(), BankError> {
    sqlx::query("DELETE FROM bearer_tokens WHERE content = $1")
        .bind(content)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_wire_encoding() {
        let content = new_token_content();
        let wire = encode_token(&content);
        let decoded = decode_token(&wire).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn decode_rejects_missing_prefix() {
        assert!(decode_token("not-a-token").is_err());
    }

    #[test]
    fn clamp_expiry_rejects_past_timestamps() {
        let now = Utc::now();
        let result = clamp_expiry(now, now - Duration::seconds(1), Duration::days(1));
        assert!(result.is_err());
    }

    #[test]
    fn clamp_expiry_rejects_beyond_max_duration() {
        let now = Utc::now();
        let result = clamp_expiry(now, now + Duration::days(400), Duration::days(365));
        assert!(result.is_err());
    }

    #[test]
    fn clamp_expiry_accepts_within_bounds() {
        let now = Utc::now();
        let requested = now + Duration::days(10);
        let result = clamp_expiry(now, requested, Duration::days(365)).unwrap();
        assert_eq!(result, requested);
    }
}
