//! `/taler-integration/withdrawal-operation/{uuid}` (spec §4.7, §6 "wallet-side FSM,
//! same FSM as `/withdrawals`, other actor"). The Taler wallet talks to this surface
//! directly (no account-scoped auth — the uuid itself is the capability), so these
//! handlers skip the `Identity` extractor that the `/accounts/{login}/...` siblings use.

use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::withdrawal;
use crate::error::BankResult;
use crate::http::AppState;
use crate::models::Withdrawal;

#[derive(Debug, Serialize)]
pub struct WithdrawalOperationView {
    pub withdrawal_id: Uuid,
    pub amount: String,
    pub aborted: bool,
    pub selection_done: bool,
    pub confirmation_done: bool,
    pub selected_exchange_account: Option<String>,
    pub selected_reserve_pub: Option<String>,
}

impl From<&Withdrawal> for WithdrawalOperationView {
    fn from(w: &Withdrawal) -> Self {
        let amount = crate::amount::Amount {
            value: w.amount_value as u64,
            frac: w.amount_frac as u32,
            currency: w.currency.clone(),
        };
        Self {
            withdrawal_id: w.uuid,
            amount: amount.to_wire_string(),
            aborted: w.status == "aborted",
            selection_done: w.selection_done,
            confirmation_done: w.confirmed,
            selected_exchange_account: w.selected_exchange_payto.clone(),
            selected_reserve_pub: w.reserve_pub.clone(),
        }
    }
}

pub async fn get(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> BankResult<impl IntoResponse> {
    let row = withdrawal::get(state.store.pool(), uuid)
        .await?
        .ok_or(crate::error::BankError::TransactionNotFound)?;
    Ok(Json(WithdrawalOperationView::from(&row)))
}

#[derive(Debug, Deserialize)]
pub struct SetDetailsRequest {
    pub selected_exchange: String,
    pub reserve_pub: String,
}

pub async fn set_details(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<SetDetailsRequest>,
) -> BankResult<impl IntoResponse> {
    let row = withdrawal::set_details(&state.store, uuid, &req.selected_exchange, &req.reserve_pub).await?;
    Ok(Json(WithdrawalOperationView::from(&row)))
}

pub async fn abort(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> BankResult<impl IntoResponse> {
    let row = withdrawal::abort(&state.store, uuid).await?;
    Ok(Json(WithdrawalOperationView::from(&row)))
}
