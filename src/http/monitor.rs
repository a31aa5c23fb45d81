//! `/monitor` (spec §4.11). Admin-only read access to the stats counters.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::Identity;
use crate::error::{BankError, BankResult};
use crate::http::AppState;
use crate::stats::{self, Frame};

#[derive(Debug, Deserialize)]
pub struct MonitorQuery {
    pub timeframe: String,
    pub which: Option<i64>,
}

fn parse_frame(raw: &str) -> Result<Frame, BankError> {
    match raw {
        "hour" => Ok(Frame::Hour),
        "day" => Ok(Frame::Day),
        "month" => Ok(Frame::Month),
        "year" => Ok(Frame::Year),
        other => Err(BankError::ParameterMalformed(format!("unknown timeframe '{other}'"))),
    }
}

pub async fn monitor(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<MonitorQuery>,
) -> BankResult<impl IntoResponse> {
    if !identity.is_admin() {
        return Err(BankError::Forbidden);
    }

    let frame = parse_frame(&query.timeframe)?;
    let now = Utc::now();

    let rows = match query.which {
        Some(which) => {
            let slot = stats::resolve_which(frame, now, which)
                .ok_or_else(|| BankError::ParameterMalformed("which is out of range for timeframe".to_string()))?;
            stats::read_slot(state.store.pool(), frame, slot).await?
        }
        None => stats::read_current(state.store.pool(), frame, now).await?,
    };

    Ok(axum::Json(rows))
}
