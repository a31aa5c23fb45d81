//! `/accounts/{login}/withdrawals` and `/withdrawals/{uuid}` (spec §4.7).

use axum::extract::{Json, Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::{Amount, FracDigits};
use crate::auth::Identity;
use crate::dao::{account, challenge, withdrawal};
use crate::error::{BankError, BankResult};
use crate::http::AppState;
use crate::models::{Withdrawal, WithdrawalStatus};

/// Resolves the withdrawal's owning account and checks `identity` against it,
/// mirroring `cashouts.rs::get_owned` (the withdrawal has no `login` path param, so
/// the account is looked up from the row instead of the other way around).
async fn authorize_for_withdrawal(
    state: &AppState,
    identity: &Identity,
    uuid: Uuid,
) -> BankResult<Withdrawal> {
    let row = withdrawal::get(state.store.pool(), uuid)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    let account = account::find_by_id(state.store.pool(), row.account_id)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    identity.authorize_for_account(&account.login)?;
    Ok(row)
}

#[derive(Debug, Serialize)]
pub struct WithdrawalView {
    pub withdrawal_id: Uuid,
    pub amount: String,
    pub status: String,
    pub selected_exchange_payto: Option<String>,
    pub reserve_pub: Option<String>,
}

impl From<&Withdrawal> for WithdrawalView {
    fn from(w: &Withdrawal) -> Self {
        let amount = Amount {
            value: w.amount_value as u64,
            frac: w.amount_frac as u32,
            currency: w.currency.clone(),
        };
        Self {
            withdrawal_id: w.uuid,
            amount: amount.to_wire_string(),
            status: w.status.clone(),
            selected_exchange_payto: w.selected_exchange_payto.clone(),
            reserve_pub: w.reserve_pub.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub amount: String,
}

pub async fn create(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Json(req): Json<CreateRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let amount = Amount::parse(&req.amount, FracDigits::Eight)?;
    let uuid = Uuid::new_v4();

    let row = withdrawal::create(&state.store, &login, uuid, &amount, Utc::now()).await?;
    Ok(Json(WithdrawalView::from(&row)))
}

#[derive(Debug, Deserialize)]
pub struct GetParams {
    pub old_state: Option<String>,
    #[serde(default)]
    pub long_poll_ms: u64,
}

pub async fn get(
    State(state): State<AppState>,
    identity: Identity,
    Path(uuid): Path<Uuid>,
    Query(params): Query<GetParams>,
) -> BankResult<impl IntoResponse> {
    authorize_for_withdrawal(&state, &identity, uuid).await?;
    let old_state = params.old_state.as_deref().and_then(WithdrawalStatus::from_str_opt);
    let row = withdrawal::get_long_poll(&state.store, uuid, old_state, params.long_poll_ms)
        .await?
        .ok_or(BankError::TransactionNotFound)?;
    Ok(Json(WithdrawalView::from(&row)))
}

pub async fn abort(
    State(state): State<AppState>,
    identity: Identity,
    Path(uuid): Path<Uuid>,
) -> BankResult<impl IntoResponse> {
    authorize_for_withdrawal(&state, &identity, uuid).await?;
    identity.require_readwrite()?;
    let row = withdrawal::abort(&state.store, uuid).await?;
    Ok(Json(WithdrawalView::from(&row)))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub challenge_id: Option<i64>,
}

pub async fn confirm(
    State(state): State<AppState>,
    identity: Identity,
    Path(uuid): Path<Uuid>,
    Json(req): Json<ConfirmRequest>,
) -> BankResult<impl IntoResponse> {
    authorize_for_withdrawal(&state, &identity, uuid).await?;
    identity.require_readwrite()?;
    let tan_ok = match req.challenge_id {
        Some(id) => challenge::is_confirmed(state.store.pool(), id).await?,
        None => false,
    };
    let row = withdrawal::confirm(&state.store, uuid, Utc::now(), tan_ok).await?;
    Ok(Json(WithdrawalView::from(&row)))
}
