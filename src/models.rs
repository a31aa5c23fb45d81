//! Row types shared across DAOs, mirroring the teacher's `db::models` split between
//! `FromRow` read models and plain `New*` insert models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum TanChannel {
    Sms,
    Email,
    None,
}

impl TanChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            TanChannel::Sms => "sms",
            TanChannel::Email => "email",
            TanChannel::None => "none",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "sms" => Some(TanChannel::Sms),
            "email" => Some(TanChannel::Email),
            "none" => Some(TanChannel::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: i64,
    pub login: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub cashout_payto: Option<String>,
    pub internal_payto: String,
    pub tan_channel: String,
    pub is_public: bool,
    pub is_taler_exchange: bool,
    pub is_deleted: bool,
    pub balance_value: i64,
    pub balance_frac: i32,
    pub has_debit: bool,
    pub max_debit_value: i64,
    pub max_debit_frac: i32,
    pub currency: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct NewAccount {
    pub login: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub cashout_payto: Option<String>,
    pub internal_payto: String,
    pub tan_channel: String,
    pub is_public: bool,
    pub is_taler_exchange: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct BearerToken {
    pub content: Vec<u8>,
    pub account_id: i64,
    pub scope: String,
    pub refreshable: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    Readonly,
    Readwrite,
}

impl TokenScope {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenScope::Readonly => "readonly",
            TokenScope::Readwrite => "readwrite",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "readonly" => Some(TokenScope::Readonly),
            "readwrite" => Some(TokenScope::Readwrite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Challenge {
    pub id: i64,
    pub account_id: i64,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retries_left: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub operation_kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeTryResult {
    pub ok: bool,
    pub no_retry: bool,
    pub expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxDirection {
    Credit,
    Debit,
}

impl TxDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TxDirection::Credit => "credit",
            TxDirection::Debit => "debit",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransactionRow {
    pub row_id: i64,
    pub account_id: i64,
    pub counterpart_payto: String,
    pub subject: String,
    pub amount_value: i64,
    pub amount_frac: i32,
    pub currency: String,
    pub direction: String,
    pub timestamp: DateTime<Utc>,
    pub reserve_pub: Option<String>,
    pub wtid: Option<String>,
    pub exchange_url: Option<String>,
    pub request_uid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum WithdrawalStatus {
    Pending,
    Selected,
    Aborted,
    Confirmed,
}

impl WithdrawalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Selected => "selected",
            WithdrawalStatus::Aborted => "aborted",
            WithdrawalStatus::Confirmed => "confirmed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "selected" => Some(Self::Selected),
            "aborted" => Some(Self::Aborted),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Withdrawal {
    pub uuid: uuid::Uuid,
    pub account_id: i64,
    pub amount_value: i64,
    pub amount_frac: i32,
    pub currency: String,
    pub status: String,
    pub reserve_pub: Option<String>,
    pub selected_exchange_payto: Option<String>,
    pub selection_done: bool,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Cashout {
    pub id: i64,
    pub request_uid: String,
    pub account_id: i64,
    pub amount_debit_value: i64,
    pub amount_debit_frac: i32,
    pub debit_currency: String,
    pub amount_credit_value: i64,
    pub amount_credit_frac: i32,
    pub credit_currency: String,
    pub created_at: DateTime<Utc>,
    pub tan_challenge_id: Option<i64>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub aborted: bool,
}
