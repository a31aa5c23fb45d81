//! `/accounts/{login}/taler-wire-gateway/*` (spec §4.8). Exchange-only operations:
//! recording an incoming reserve deposit, and issuing an outgoing wire transfer.

use axum::extract::{Json, Path, Query, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, FracDigits};
use crate::auth::Identity;
use crate::dao::account;
use crate::dao::exchange::{self, AddIncomingOutcome, TransferOutcome};
use crate::error::BankResult;
use crate::http::AppState;
use crate::models::TransactionRow;

#[derive(Debug, Serialize)]
pub struct IncomingEntry {
    pub row_id: i64,
    pub debit_account: String,
    pub reserve_pub: String,
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct OutgoingEntry {
    pub row_id: i64,
    pub credit_account: String,
    pub wtid: String,
    pub exchange_url: Option<String>,
    pub amount: String,
}

fn amount_of(row: &TransactionRow) -> String {
    Amount {
        value: row.amount_value as u64,
        frac: row.amount_frac as u32,
        currency: row.currency.clone(),
    }
    .to_wire_string()
}

#[derive(Debug, Deserialize)]
pub struct AddIncomingRequest {
    pub debit_account: String,
    pub reserve_pub: String,
    pub amount: String,
}

pub async fn add_incoming(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Json(req): Json<AddIncomingRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let amount = Amount::parse(&req.amount, FracDigits::Eight)?;

    let outcome = exchange::add_incoming(&state.store, &login, &req.debit_account, &req.reserve_pub, &amount).await?;
    let AddIncomingOutcome::Posted { row_id } = outcome;

    #[derive(Serialize)]
    struct Response {
        row_id: i64,
    }
    Ok(Json(Response { row_id }))
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub request_uid: String,
    pub credit_account: String,
    pub wtid: String,
    pub exchange_base_url: String,
    pub amount: String,
}

pub async fn transfer(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Json(req): Json<TransferRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let amount = Amount::parse(&req.amount, FracDigits::Eight)?;

    let outcome = exchange::transfer(
        &state.store,
        &login,
        &req.credit_account,
        &req.request_uid,
        &req.wtid,
        &req.exchange_base_url,
        &amount,
    )
    .await?;

    let row_id = match outcome {
        TransferOutcome::Posted { row_id } | TransferOutcome::AlreadyPosted { row_id } => row_id,
    };

    #[derive(Serialize)]
    struct Response {
        row_id: i64,
    }
    Ok(Json(Response { row_id }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_delta")]
    pub delta: i64,
    #[serde(default)]
    pub start: i64,
}

fn default_delta() -> i64 {
    20
}

pub async fn history_incoming(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Query(params): Query<HistoryParams>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    let account = account::require_by_login(state.store.pool(), &login).await?;

    let rows = exchange::history_incoming(&state.store, account.id, params.delta, params.start).await?;
    let views: Vec<IncomingEntry> = rows
        .iter()
        .map(|row| IncomingEntry {
            row_id: row.row_id,
            debit_account: row.counterpart_payto.clone(),
            reserve_pub: row.reserve_pub.clone().unwrap_or_default(),
            amount: amount_of(row),
        })
        .collect();
    Ok(Json(views))
}

pub async fn history_outgoing(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Query(params): Query<HistoryParams>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    let account = account::require_by_login(state.store.pool(), &login).await?;

    let rows = exchange::history_outgoing(&state.store, account.id, params.delta, params.start).await?;
    let views: Vec<OutgoingEntry> = rows
        .iter()
        .map(|row| OutgoingEntry {
            row_id: row.row_id,
            credit_account: row.counterpart_payto.clone(),
            wtid: row.wtid.clone().unwrap_or_default(),
            exchange_url: row.exchange_url.clone(),
            amount: amount_of(row),
        })
        .collect();
    Ok(Json(views))
}
