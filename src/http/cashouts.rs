//! `/accounts/{login}/cashouts` (spec §4.9).

use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, FracDigits};
use crate::auth::Identity;
use crate::dao::account;
use crate::dao::cashout;
use crate::dao::challenge;
use crate::error::{BankError, BankResult};
use crate::http::AppState;
use crate::models::Cashout;

#[derive(Debug, Serialize)]
pub struct CashoutView {
    pub id: i64,
    pub amount_debit: String,
    pub amount_credit: String,
    pub confirmed: bool,
    pub aborted: bool,
}

impl From<&Cashout> for CashoutView {
    fn from(c: &Cashout) -> Self {
        let debit = Amount {
            value: c.amount_debit_value as u64,
            frac: c.amount_debit_frac as u32,
            currency: c.debit_currency.clone(),
        };
        let credit = Amount {
            value: c.amount_credit_value as u64,
            frac: c.amount_credit_frac as u32,
            currency: c.credit_currency.clone(),
        };
        Self {
            id: c.id,
            amount_debit: debit.to_wire_string(),
            amount_credit: credit.to_wire_string(),
            confirmed: c.confirmed_at.is_some(),
            aborted: c.aborted,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub request_uid: String,
    pub amount_debit: String,
    pub amount_credit: String,
    pub challenge_id: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
    Json(req): Json<CreateRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    let conversion = state.conversion.as_ref().ok_or(BankError::ConversionNotImplemented)?;

    let amount_debit = Amount::parse(&req.amount_debit, FracDigits::Eight)?;
    let amount_credit = Amount::parse(&req.amount_credit, FracDigits::Eight)?;
    let tan_ok = match req.challenge_id {
        Some(id) => challenge::is_confirmed(state.store.pool(), id).await?,
        None => false,
    };

    let row = cashout::create(
        &state.store,
        &login,
        &req.request_uid,
        &amount_debit,
        &amount_credit,
        conversion,
        &state.config.bank.fiat_currency,
        tan_ok,
        Utc::now(),
    )
    .await?;

    Ok(Json(CashoutView::from(&row)))
}

pub async fn list(
    State(state): State<AppState>,
    identity: Identity,
    Path(login): Path<String>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    let account = account::require_by_login(state.store.pool(), &login).await?;
    let rows = cashout::list_for_account(&state.store, account.id).await?;
    let views: Vec<CashoutView> = rows.iter().map(CashoutView::from).collect();
    Ok(Json(views))
}

/// Looks up a cashout and verifies it belongs to `login`'s account, collapsing a
/// cross-account lookup into the same 404 a nonexistent id would give (DESIGN.md
/// Open Questions #1).
async fn get_owned(state: &AppState, login: &str, id: i64) -> BankResult<Cashout> {
    let account = account::require_by_login(state.store.pool(), login).await?;
    let row = cashout::get(&state.store, id).await?.ok_or(BankError::TransactionNotFound)?;
    if row.account_id != account.id {
        return Err(BankError::TransactionNotFound);
    }
    Ok(row)
}

pub async fn get(
    State(state): State<AppState>,
    identity: Identity,
    Path((login, id)): Path<(String, i64)>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    let row = get_owned(&state, &login, id).await?;
    Ok(Json(CashoutView::from(&row)))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub challenge_id: Option<i64>,
}

pub async fn confirm(
    State(state): State<AppState>,
    identity: Identity,
    Path((login, id)): Path<(String, i64)>,
    Json(req): Json<ConfirmRequest>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    get_owned(&state, &login, id).await?;
    let tan_ok = match req.challenge_id {
        Some(id) => challenge::is_confirmed(state.store.pool(), id).await?,
        None => false,
    };
    let row = cashout::confirm(&state.store, id, tan_ok).await?;
    Ok(Json(CashoutView::from(&row)))
}

pub async fn abort(
    State(state): State<AppState>,
    identity: Identity,
    Path((login, id)): Path<(String, i64)>,
) -> BankResult<impl IntoResponse> {
    identity.authorize_for_account(&login)?;
    identity.require_readwrite()?;
    get_owned(&state, &login, id).await?;
    let row = cashout::abort(&state.store, id).await?;
    Ok(Json(CashoutView::from(&row)))
}
