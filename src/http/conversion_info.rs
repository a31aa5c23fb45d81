//! `/conversion-info/*` (spec §4.10). Answers `501 NOT_IMPLEMENTED` when no rate
//! table is configured, per `ConversionConfig::load_from_env`.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, FracDigits};
use crate::conversion::{self, ConversionSide, RoundingMode};
use crate::error::{BankError, BankResult};
use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct ConversionSideView {
    pub ratio_num: u64,
    pub ratio_den: u64,
    pub fee: String,
    pub tiny_amount: String,
    pub rounding_mode: &'static str,
    pub min_amount: String,
}

impl From<&ConversionSide> for ConversionSideView {
    fn from(s: &ConversionSide) -> Self {
        Self {
            ratio_num: s.ratio_num,
            ratio_den: s.ratio_den,
            fee: s.fee.to_wire_string(),
            tiny_amount: s.tiny_amount.to_wire_string(),
            rounding_mode: match s.rounding_mode {
                RoundingMode::Zero => "zero",
                RoundingMode::Nearest => "nearest",
                RoundingMode::Up => "up",
            },
            min_amount: s.min_amount.to_wire_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversionConfigView {
    pub cashin: ConversionSideView,
    pub cashout: ConversionSideView,
}

pub async fn config(State(state): State<AppState>) -> BankResult<impl IntoResponse> {
    let conversion = state.conversion.as_ref().ok_or(BankError::ConversionNotImplemented)?;
    Ok(Json(ConversionConfigView {
        cashin: ConversionSideView::from(&conversion.cashin),
        cashout: ConversionSideView::from(&conversion.cashout),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    pub amount_debit: Option<String>,
    pub amount_credit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    pub amount_debit: String,
    pub amount_credit: String,
}

pub async fn cashin_rate(
    State(state): State<AppState>,
    Query(query): Query<RateQuery>,
) -> BankResult<impl IntoResponse> {
    let conv = state.conversion.as_ref().ok_or(BankError::ConversionNotImplemented)?;
    let regional = &state.config.bank.regional_currency;
    let fiat = &state.config.bank.fiat_currency;

    if let Some(ref debit_str) = query.amount_debit {
        let debit = Amount::parse(debit_str, FracDigits::Eight)?;
        let credit = conversion::convert_cashin(conv, &debit, regional)?;
        return Ok(Json(RateResponse {
            amount_debit: debit.to_wire_string(),
            amount_credit: credit.to_wire_string(),
        }));
    }
    let credit_str = query.amount_credit.ok_or_else(|| {
        BankError::ParameterMissing("amount_debit or amount_credit".to_string())
    })?;
    let credit = Amount::parse(&credit_str, FracDigits::Eight)?;
    let (debit, credit) = conversion::inverse_cashin(conv, &credit, fiat, regional)?;
    Ok(Json(RateResponse {
        amount_debit: debit.to_wire_string(),
        amount_credit: credit.to_wire_string(),
    }))
}

pub async fn cashout_rate(
    State(state): State<AppState>,
    Query(query): Query<RateQuery>,
) -> BankResult<impl IntoResponse> {
    let conv = state.conversion.as_ref().ok_or(BankError::ConversionNotImplemented)?;
    let regional = &state.config.bank.regional_currency;
    let fiat = &state.config.bank.fiat_currency;

    if let Some(ref debit_str) = query.amount_debit {
        let debit = Amount::parse(debit_str, FracDigits::Eight)?;
        let credit = conversion::convert_cashout(conv, &debit, fiat)?;
        return Ok(Json(RateResponse {
            amount_debit: debit.to_wire_string(),
            amount_credit: credit.to_wire_string(),
        }));
    }
    let credit_str = query.amount_credit.ok_or_else(|| {
        BankError::ParameterMissing("amount_debit or amount_credit".to_string())
    })?;
    let credit = Amount::parse(&credit_str, FracDigits::Eight)?;
    let (debit, credit) = conversion::inverse_cashout(conv, &credit, regional, fiat)?;
    Ok(Json(RateResponse {
        amount_debit: debit.to_wire_string(),
        amount_credit: credit.to_wire_string(),
    }))
}
