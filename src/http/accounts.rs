//! `/accounts` resource (spec §4.3, §4.4, §4.13). Registration, self/admin lookup
//! and patch, deletion, and bearer token issuance/revocation.

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, verify_password, Identity};
use crate::dao::account::{self, CreateOutcome};
use crate::dao::{challenge, token};
use crate::error::{BankError, BankResult};
use crate::http::AppState;
use crate::models::{Account, NewAccount, TanChannel, TokenScope};

#[derive(Debug, Serialize)]
pub struct AccountView {
    pub login: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub cashout_payto: Option<String>,
    pub internal_payto: String,
    pub tan_channel: String,
    pub is_public: bool,
    pub is_taler_exchange: bool,
    pub balance: String,
    pub debit_threshold: String,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        let signed_balance = if a.has_debit { "-" } else { "" };
        Self {
            login: a.login.clone(),
            name: a.name.clone(),
            phone: a.phone.clone(),
            email: a.email.clone(),
            cashout_payto: a.cashout_payto.clone(),
            internal_payto: a.internal_payto.clone(),
            tan_channel: a.tan_channel.clone(),
            is_public: a.is_public,
            is_taler_exchange: a.is_taler_exchange,
            balance: format!("{signed_balance}{}", a.balance().to_wire_string()),
            debit_threshold: a.max_debit().to_wire_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_taler_exchange: bool,
    pub internal_payto: Option<String>,
    pub cashout_payto: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> BankResult<impl IntoResponse> {
    if !state.config.bank.allow_registration {
        return Err(BankError::Forbidden);
    }

    let password_hash = hash_password(&req.password)?;
    let internal_payto = req
        .internal_payto
        .unwrap_or_else(|| format!("payto://iban/SANDBOXX/{}", req.login));

    let new = NewAccount {
        login: req.login,
        password_hash,
        name: req.name,
        phone: req.phone,
        email: req.email,
        cashout_payto: req.cashout_payto,
        internal_payto,
        tan_channel: TanChannel::None.as_str().to_string(),
        is_public: req.is_public,
        is_taler_exchange: req.is_taler_exchange,
    };

    let outcome = account::create(state.store.pool(), new, &state.config.bank.regional_currency).await?;
    let account = match outcome {
        CreateOutcome::Created(a) => a,
        CreateOutcome::AlreadyExists(a) => a,
    };
    Ok((StatusCode::OK, Json(AccountView::from(&account))))
}

pub async fn get(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    let account = account::require_by_login(state.store.pool(), &login).await?;
    Ok(Json(AccountView::from(&account)))
}

#[derive(Debug, Deserialize)]
pub struct PatchRequest {
    pub cashout_payto: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
    /// Admin-only (spec §3 "Admin-only fields").
    pub debit_threshold: Option<String>,
    /// Admin-only.
    pub tan_channel: Option<String>,
}

pub async fn patch(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Json(req): Json<PatchRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let pool = state.store.pool();
    let account = account::require_by_login(pool, &login).await?;

    if req.debit_threshold.is_some() && !identity.is_admin() {
        return Err(BankError::NonAdminPatch("debit_threshold".to_string()));
    }
    if req.tan_channel.is_some() && !identity.is_admin() {
        return Err(BankError::NonAdminPatch("tan_channel".to_string()));
    }

    if let Some(ref payto) = req.cashout_payto {
        account::set_cashout_payto(pool, account.id, Some(payto)).await?;
    }
    if let Some(ref threshold) = req.debit_threshold {
        let amount = crate::amount::Amount::parse(threshold, crate::amount::FracDigits::Eight)?;
        account::set_debit_threshold(pool, account.id, &amount).await?;
    }
    if let Some(ref channel) = req.tan_channel {
        let parsed = TanChannel::from_str_opt(channel)
            .ok_or_else(|| BankError::ParameterMalformed("tan_channel".to_string()))?;
        account::set_tan_channel(pool, account.id, parsed.as_str()).await?;
    }
    if let (Some(old), Some(new)) = (req.old_password.as_deref(), req.new_password.as_deref()) {
        verify_password(old, &account.password_hash)?;
        let new_hash = hash_password(new)?;
        account::set_password_hash(pool, account.id, &new_hash).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub challenge_id: Option<i64>,
}

pub async fn delete(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Query(params): Query<DeleteParams>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let pool = state.store.pool();
    let account = account::require_by_login(pool, &login).await?;

    if !identity.is_admin() && account.tan_channel != "none" {
        let tan_ok = match params.challenge_id {
            Some(id) => challenge::is_confirmed(pool, id).await?,
            None => false,
        };
        if !tan_ok {
            let challenge_id = challenge::create(
                pool,
                account.id,
                "account_delete",
                Utc::now(),
                ChronoDuration::minutes(10),
                3,
            )
            .await?;
            return Err(BankError::ChallengeRequired { challenge_id });
        }
    }

    account::delete(pool, &login).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Either a bounded duration in seconds, or the literal `"forever"` (spec §4.4
/// `"forever"` maps to `Instant.MAX`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Seconds(i64),
    Named(String),
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<DurationSpec>,
    #[serde(default)]
    pub refreshable: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub access_token: String,
    pub expiration: chrono::DateTime<Utc>,
}

pub async fn create_token(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Json(req): Json<CreateTokenRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    if !identity.can_mint_token() {
        return Err(BankError::Forbidden);
    }
    let target = account::require_by_login(state.store.pool(), &login).await?;

    let scope = match req.scope.as_deref() {
        Some("readonly") | None => TokenScope::Readonly,
        Some("readwrite") => TokenScope::Readwrite,
        Some(_) => return Err(BankError::ParameterMalformed("scope".to_string())),
    };

    let now = Utc::now();
    let expires_at = match req.duration_secs {
        Some(DurationSpec::Named(ref s)) if s == "forever" => chrono::DateTime::<Utc>::MAX_UTC,
        Some(DurationSpec::Named(_)) => {
            return Err(BankError::ParameterMalformed("duration_secs".to_string()))
        }
        Some(DurationSpec::Seconds(secs)) => token::clamp_expiry(
            now,
            now + ChronoDuration::seconds(secs),
            ChronoDuration::seconds(state.config.tan.max_token_duration_secs),
        )?,
        None => token::clamp_expiry(
            now,
            now + ChronoDuration::seconds(24 * 60 * 60),
            ChronoDuration::seconds(state.config.tan.max_token_duration_secs),
        )?,
    };

    let content = token::new_token_content();
    token::create(
        state.store.pool(),
        target.id,
        &content,
        scope,
        req.refreshable,
        now,
        expires_at,
    )
    .await?;

    Ok(Json(CreateTokenResponse {
        access_token: token::encode_token(&content),
        expiration: expires_at,
    }))
}

pub async fn delete_token(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    headers: axum::http::HeaderMap,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BankError::ParameterMissing("Authorization".to_string()))?;
    let wire = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| BankError::HeadersMalformed("token deletion requires a Bearer token".to_string()))?;
    let content = token::decode_token(wire)?;

    token::delete(state.store.pool(), &content).await?;
    Ok(StatusCode::NO_CONTENT)
}
