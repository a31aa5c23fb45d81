//! C13: authentication (spec §4.13). Two authenticators — HTTP Basic against the
//! Argon2id password hash, and Bearer against the stored token content — plus the
//! admin/self-account gating used by per-account routes. The extractor shape is not
//! something the teacher's own code does (it never used axum extractors); enriched
//! from `packages/canceler/src/server.rs`'s `State<AppState>` idiom applied to a
//! request-scoped extractor instead of a top-level handler parameter.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::Engine;

use crate::dao::{account, token};
use crate::error::BankError;
use crate::http::AppState;
use crate::models::{Account, TokenScope};

#[derive(Debug, Clone)]
pub struct Identity {
    pub account: Account,
    /// `true` iff authentication was a Bearer token whose `refreshable` column is
    /// set; gates token rotation (spec §4.4 "authenticating via a refreshable token
    /// allows issuing a new token for the same customer").
    pub refreshable_token: bool,
    /// `true` for Basic auth (the password already proves full control of the
    /// account); for Bearer auth this is the token's own stored scope.
    pub scope: TokenScope,
    /// `true` iff authentication was HTTP Basic (password), as opposed to Bearer.
    pub via_password: bool,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.account.login == "admin"
    }

    /// Admin-or-self gate used by per-account routes (spec §4.13).
    pub fn authorize_for_account(&self, target_login: &str) -> Result<(), BankError> {
        if self.is_admin() || self.account.login == target_login {
            Ok(())
        } else {
            Err(BankError::Forbidden)
        }
    }

    /// Rejects a readonly-scoped bearer token on a mutating route (spec §3/§4.4).
    pub fn require_readwrite(&self) -> Result<(), BankError> {
        match self.scope {
            TokenScope::Readwrite => Ok(()),
            TokenScope::Readonly => Err(BankError::Forbidden),
        }
    }

    /// Issuing a new token is allowed via Basic auth, or via a refreshable Bearer
    /// token (spec §4.4 token rotation); a non-refreshable Bearer token cannot mint
    /// another token for itself.
    pub fn can_mint_token(&self) -> bool {
        self.via_password || self.refreshable_token
    }
}

impl FromRequestParts<AppState> for Identity {
    type Rejection = BankError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| BankError::ParameterMissing("Authorization".to_string()))?
            .to_str()
            .map_err(|_| BankError::HeadersMalformed("Authorization header is not UTF-8".to_string()))?;

        if let Some(basic) = header.strip_prefix("Basic ") {
            authenticate_basic(state, basic).await
        } else if let Some(bearer) = header.strip_prefix("Bearer ") {
            authenticate_bearer(state, bearer).await
        } else {
            Err(BankError::HeadersMalformed(
                "expected a Basic or Bearer Authorization header".to_string(),
            ))
        }
    }
}

async fn authenticate_basic(state: &AppState, encoded: &str) -> Result<Identity, BankError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| BankError::HeadersMalformed("invalid base64 in Basic credentials".to_string()))?;
    let text = String::from_utf8(decoded)
        .map_err(|_| BankError::HeadersMalformed("Basic credentials are not UTF-8".to_string()))?;
    let (login, password) = text
        .split_once(':')
        .ok_or_else(|| BankError::HeadersMalformed("malformed Basic credentials".to_string()))?;

    let account = account::require_by_login(state.store.pool(), login)
        .await
        .map_err(|_| BankError::Unauthorized)?;

    let hash = PasswordHash::new(&account.password_hash)
        .map_err(|_| BankError::Internal(eyre::eyre!("corrupt password hash")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .map_err(|_| BankError::Unauthorized)?;

    Ok(Identity {
        account,
        refreshable_token: false,
        scope: TokenScope::Readwrite,
        via_password: true,
    })
}

async fn authenticate_bearer(state: &AppState, wire: &str) -> Result<Identity, BankError> {
    let content = token::decode_token(wire)?;

    let bearer = token::get(state.store.pool(), &content)
        .await?
        .ok_or(BankError::Unauthorized)?;

    if bearer.expires_at < chrono::Utc::now() {
        return Err(BankError::Unauthorized);
    }

    let account = account::find_by_id(state.store.pool(), bearer.account_id)
        .await?
        .ok_or(BankError::Unauthorized)?;

    let scope = TokenScope::from_str_opt(&bearer.scope)
        .ok_or_else(|| BankError::Internal(eyre::eyre!("corrupt token scope")))?;

    Ok(Identity {
        account,
        refreshable_token: bearer.refreshable,
        scope,
        via_password: false,
    })
}

/// Hashes a plaintext password with Argon2id (spec §4.13, §1 "no cryptography
/// beyond password hashing").
pub fn hash_password(password: &str) -> Result<String, BankError> {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| BankError::Internal(eyre::eyre!(e.to_string()).wrap_err("password hashing failed")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<(), BankError> {
    let hash = PasswordHash::new(stored_hash)
        .map_err(|_| BankError::Internal(eyre::eyre!("corrupt password hash")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .map_err(|_| BankError::PatchBadOldPassword)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).is_ok());
        assert!(verify_password("wrong password", &hash).is_err());
    }
}
