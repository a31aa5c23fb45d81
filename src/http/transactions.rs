//! `/accounts/{login}/transactions` resource (spec §4.6).

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, FracDigits};
use crate::auth::Identity;
use crate::dao::account;
use crate::dao::challenge;
use crate::dao::transaction::{self, CreateOutcome, NewTransaction};
use crate::error::BankResult;
use crate::http::AppState;
use crate::models::TransactionRow;

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub row_id: i64,
    pub counterpart_payto: String,
    pub subject: String,
    pub amount: String,
    pub direction: String,
    pub timestamp: chrono::DateTime<Utc>,
}

impl From<&TransactionRow> for TransactionView {
    fn from(row: &TransactionRow) -> Self {
        let amount = Amount {
            value: row.amount_value as u64,
            frac: row.amount_frac as u32,
            currency: row.currency.clone(),
        };
        Self {
            row_id: row.row_id,
            counterpart_payto: row.counterpart_payto.clone(),
            subject: row.subject.clone(),
            amount: amount.to_wire_string(),
            direction: row.direction.clone(),
            timestamp: row.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_delta")]
    pub delta: i64,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub long_poll_ms: u64,
}

fn default_delta() -> i64 {
    20
}

pub async fn history(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Query(params): Query<HistoryParams>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    let account = account::require_by_login(state.store.pool(), &login).await?;

    let rows = transaction::history(&state.store, account.id, params.delta, params.start, params.long_poll_ms).await?;
    if rows.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let views: Vec<TransactionView> = rows.iter().map(TransactionView::from).collect();
    Ok(Json(views).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub creditor_login: String,
    pub amount: String,
    pub subject: String,
    pub request_uid: Option<String>,
    /// A previously issued TAN challenge for this operation, if the caller already
    /// has one solved (spec §4.5 "operation requires a solved TAN challenge").
    pub challenge_id: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Json(req): Json<CreateTransactionRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let amount = Amount::parse(&req.amount, FracDigits::Eight)?;
    let tan_ok = match req.challenge_id {
        Some(id) => challenge::is_confirmed(state.store.pool(), id).await?,
        None => false,
    };

    let outcome = transaction::create(
        &state.store,
        NewTransaction {
            debtor_login: login,
            creditor_login: req.creditor_login,
            subject: req.subject,
            amount,
            timestamp: Utc::now(),
            tan_ok,
            request_uid: req.request_uid,
        },
    )
    .await?;

    let row_id = match outcome {
        CreateOutcome::Posted { debtor_row_id, .. } => debtor_row_id,
        CreateOutcome::AlreadyPosted { row_id } => row_id,
    };

    #[derive(Serialize)]
    struct Response {
        row_id: i64,
    }
    Ok((StatusCode::OK, Json(Response { row_id })))
}
