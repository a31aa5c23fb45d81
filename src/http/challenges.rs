//! `/accounts/{login}/challenge/{id}` (send) and `.../confirm` (spec §4.5).

use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::dao::{account, challenge};
use crate::error::{BankError, BankResult};
use crate::http::AppState;
use crate::models::TanChannel;

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub sent: bool,
}

/// Dispatches (or re-dispatches, per resend Rule 3/4) the code over the account's
/// configured channel. A challenge already confirmed is a no-op success.
pub async fn send(
    State(state): State<AppState>,
    identity: Identity,
    Path((login, id)): Path<(String, i64)>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let target = account::require_by_login(state.store.pool(), &login).await?;

    let challenge_row = challenge::get(state.store.pool(), id)
        .await?
        .ok_or(BankError::ChallengeNotFound)?;
    if challenge_row.account_id != target.id {
        return Err(BankError::ChallengeNotFound);
    }
    if challenge_row.confirmed_at.is_some() {
        return Ok(Json(SendResponse { sent: true }));
    }

    let now = Utc::now();
    let code = challenge::resend(
        state.store.pool(),
        id,
        now,
        chrono::Duration::seconds(state.config.tan.retransmission_secs),
        chrono::Duration::seconds(state.config.tan.challenge_validity_secs),
        state.config.tan.max_retries as i32,
    )
    .await?;

    let channel = TanChannel::from_str_opt(&target.tan_channel).ok_or(BankError::TanChannelNotSupported)?;
    let (script, destination) = match channel {
        TanChannel::Sms => (
            state.config.tan.sms_script.as_deref(),
            target.phone.as_deref().ok_or(BankError::TanChannelNotSupported)?,
        ),
        TanChannel::Email => (
            state.config.tan.email_script.as_deref(),
            target.email.as_deref().ok_or(BankError::TanChannelNotSupported)?,
        ),
        TanChannel::None => return Err(BankError::TanChannelNotSupported),
    };

    crate::tan::dispatch(channel, script, destination, &code).await?;
    challenge::mark_sent(state.store.pool(), id, now).await?;

    Ok(Json(SendResponse { sent: true }))
}

pub async fn confirm(
    State(state): State<AppState>,
    identity: Identity,
    Path((login, id)): Path<(String, i64)>,
    Json(req): Json<ConfirmRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let target = account::require_by_login(state.store.pool(), &login).await?;

    let challenge_row = challenge::get(state.store.pool(), id)
        .await?
        .ok_or(BankError::ChallengeNotFound)?;
    if challenge_row.account_id != target.id {
        return Err(BankError::ChallengeNotFound);
    }

    let result = challenge::try_code(state.store.pool(), id, &req.code, Utc::now()).await?;

    if result.expired {
        crate::metrics::record_challenge_outcome("expired");
        return Err(BankError::TanChallengeExpired);
    }
    if result.no_retry {
        crate::metrics::record_challenge_outcome("exhausted");
        return Err(BankError::TanChallengeFailed);
    }
    if !result.ok {
        crate::metrics::record_challenge_outcome("wrong_code");
        return Err(BankError::TanChallengeFailed);
    }

    crate::metrics::record_challenge_outcome("confirmed");
    Ok(Json(ConfirmResponse { confirmed: true }))
}
