//! C11: Stats counters (spec §4.11). Per-`(frame, slot, metric)` counters, written
//! inside the same serializable transaction as the business posting they describe —
//! grounded on `packages/canceler/src/server.rs`'s `CancelerStats`/`Metrics` split,
//! business counters kept separate from the Prometheus registration in `metrics.rs`.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use sqlx::{Postgres, Transaction};

use crate::amount::Amount;
use crate::error::BankError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Hour,
    Day,
    Month,
    Year,
}

impl Frame {
    pub fn as_str(self) -> &'static str {
        match self {
            Frame::Hour => "hour",
            Frame::Day => "day",
            Frame::Month => "month",
            Frame::Year => "year",
        }
    }

    /// Truncates `timestamp` to the start of this frame.
    pub fn truncate(self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frame::Hour => Utc
                .with_ymd_and_hms(
                    timestamp.year(),
                    timestamp.month(),
                    timestamp.day(),
                    timestamp.hour(),
                    0,
                    0,
                )
                .unwrap(),
            Frame::Day => Utc
                .with_ymd_and_hms(timestamp.year(), timestamp.month(), timestamp.day(), 0, 0, 0)
                .unwrap(),
            Frame::Month => Utc
                .with_ymd_and_hms(timestamp.year(), timestamp.month(), 1, 0, 0, 0)
                .unwrap(),
            Frame::Year => Utc.with_ymd_and_hms(timestamp.year(), 1, 1, 0, 0, 0).unwrap(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    TalerIn,
    TalerOut,
    Cashin,
    Cashout,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::TalerIn => "taler_in",
            Metric::TalerOut => "taler_out",
            Metric::Cashin => "cashin",
            Metric::Cashout => "cashout",
        }
    }
}

/// Increments the counter for `(frame, slot containing timestamp, metric)` within an
/// already-open transaction. Called from the business DAOs right before commit.
pub async fn record(
    txn: &mut Transaction<'_, Postgres>,
    frame: Frame,
    timestamp: DateTime<Utc>,
    metric: Metric,
    volume_regional: &Amount,
    volume_fiat: Option<&Amount>,
) -> Result<(), BankError> {
    let slot = frame.truncate(timestamp);
    sqlx::query(
        "INSERT INTO stats_counters (frame, slot, metric, count, volume_regional_value,
            volume_regional_frac, volume_fiat_value, volume_fiat_frac)
         VALUES ($1, $2, $3, 1, $4, $5, $6, $7)
         ON CONFLICT (frame, slot, metric) DO UPDATE SET
            count = stats_counters.count + 1,
            volume_regional_value = stats_counters.volume_regional_value + EXCLUDED.volume_regional_value,
            volume_regional_frac = stats_counters.volume_regional_frac + EXCLUDED.volume_regional_frac,
            volume_fiat_value = COALESCE(stats_counters.volume_fiat_value, 0) + COALESCE(EXCLUDED.volume_fiat_value, 0),
            volume_fiat_frac = COALESCE(stats_counters.volume_fiat_frac, 0) + COALESCE(EXCLUDED.volume_fiat_frac, 0)",
    )
    .bind(frame.as_str())
    .bind(slot)
    .bind(metric.as_str())
    .bind(volume_regional.value as i64)
    .bind(volume_regional.frac as i32)
    .bind(volume_fiat.map(|a| a.value as i64))
    .bind(volume_fiat.map(|a| a.frac as i32))
    .execute(&mut **txn)
    .await?;
    Ok(())
}

/// Increments every frame's counter for `timestamp` in one call, since a single
/// posting belongs to an hour, a day, a month, and a year slot simultaneously.
pub async fn record_all_frames(
    txn: &mut Transaction<'_, Postgres>,
    timestamp: DateTime<Utc>,
    metric: Metric,
    volume_regional: &Amount,
    volume_fiat: Option<&Amount>,
) -> Result<(), BankError> {
    for frame in [Frame::Hour, Frame::Day, Frame::Month, Frame::Year] {
        record(txn, frame, timestamp, metric, volume_regional, volume_fiat).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct StatsRow {
    pub frame: String,
    pub slot: DateTime<Utc>,
    pub metric: String,
    pub count: i64,
    pub volume_regional_value: i64,
    pub volume_regional_frac: i32,
    pub volume_fiat_value: Option<i64>,
    pub volume_fiat_frac: Option<i32>,
}

/// Reads the counters for the current frame (truncated from `now`), or for an
/// explicitly selected slot when `which` names a past hour/day-of-month/month/year.
pub async fn read_current(
    pool: &sqlx::PgPool,
    frame: Frame,
    now: DateTime<Utc>,
) -> Result<Vec<StatsRow>, BankError> {
    let slot = frame.truncate(now);
    read_slot(pool, frame, slot).await
}

pub async fn read_slot(
    pool: &sqlx::PgPool,
    frame: Frame,
    slot: DateTime<Utc>,
) -> Result<Vec<StatsRow>, BankError> {
    let rows = sqlx::query_as::<_, StatsRow>(
        "SELECT * FROM stats_counters WHERE frame = $1 AND slot = $2 ORDER BY metric",
    )
    .bind(frame.as_str())
    .bind(slot)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Resolves a `which=<hour|day-of-month|month|year>` explicit slot selector against
/// the given reference time, matching the frame's own truncation granularity.
pub fn resolve_which(frame: Frame, now: DateTime<Utc>, which: i64) -> Option<DateTime<Utc>> {
    match frame {
        Frame::Hour => {
            let hour = u32::try_from(which).ok()?;
            if hour > 23 {
                return None;
            }
            Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), hour, 0, 0)
                .single()
        }
        Frame::Day => {
            let day = u32::try_from(which).ok()?;
            if !(1..=31).contains(&day) {
                return None;
            }
            Utc.with_ymd_and_hms(now.year(), now.month(), day, 0, 0, 0)
                .single()
        }
        Frame::Month => {
            let month = u32::try_from(which).ok()?;
            if !(1..=12).contains(&month) {
                return None;
            }
            Utc.with_ymd_and_hms(now.year(), month, 1, 0, 0, 0).single()
        }
        Frame::Year => {
            let year = i32::try_from(which).ok()?;
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_hour_drops_minutes_and_seconds() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 27, 14, 37, 52).unwrap();
        assert_eq!(Frame::Hour.truncate(ts), Utc.with_ymd_and_hms(2026, 7, 27, 14, 0, 0).unwrap());
    }

    #[test]
    fn truncate_month_drops_to_first_of_month() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 27, 14, 37, 52).unwrap();
        assert_eq!(Frame::Month.truncate(ts), Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn truncate_year_drops_to_january_first() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 27, 14, 37, 52).unwrap();
        assert_eq!(Frame::Year.truncate(ts), Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn resolve_which_rejects_out_of_range_hour() {
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 14, 0, 0).unwrap();
        assert!(resolve_which(Frame::Hour, now, 24).is_none());
        assert!(resolve_which(Frame::Hour, now, 5).is_some());
    }
}
