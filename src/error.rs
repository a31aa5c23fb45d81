//! Error taxonomy (spec §7) and its mapping onto the HTTP surface.
//!
//! Domain errors carry their own `{http_status, taler_error_code}` pair so handlers
//! can return `Result<T, BankError>` directly; anything unexpected is wrapped as
//! `BankError::Internal` and never leaks details to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

use crate::amount::AmountError;

#[derive(Debug, Error)]
pub enum BankError {
    // --- request-shape errors ---
    #[error("missing parameter: {0}")]
    ParameterMissing(String),
    #[error("malformed parameter: {0}")]
    ParameterMalformed(String),
    #[error("malformed headers: {0}")]
    HeadersMalformed(String),
    #[error("currency mismatch")]
    CurrencyMismatch,
    #[error("unsupported content encoding")]
    CompressionInvalid,
    #[error("request body exceeds the size limit")]
    BodyTooLarge,

    // --- account errors ---
    #[error("account would exceed its debit threshold")]
    UnallowedDebit,
    #[error("debtor and creditor are the same account")]
    SameAccount,
    #[error("admin cannot be used as a creditor")]
    AdminCreditor,
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("unknown debtor: {0}")]
    UnknownDebtor(String),
    #[error("unknown creditor: {0}")]
    UnknownCreditor(String),
    #[error("login already registered with a different payto/name")]
    UsernameReuse,
    #[error("payto already registered under a different login")]
    PaytoReuse,
    #[error("reserved login, operation refused")]
    ReservedUsernameConflict,
    #[error("operation requires a non-exchange account")]
    AccountIsExchange,
    #[error("operation requires an exchange account")]
    AccountIsNotExchange,
    #[error("account balance must be zero before this operation")]
    BalanceNotZero,
    #[error("old password did not match")]
    PatchBadOldPassword,
    #[error("field may only be set by an admin: {0}")]
    NonAdminPatch(String),

    // --- withdrawal / exchange errors ---
    #[error("withdrawal selection conflicts with a previous reserve_pub")]
    ReserveSelectionConflict,
    #[error("reserve_pub already used in an incoming posting")]
    DuplicateReservePubSubject,
    #[error("withdrawal already aborted")]
    AbortConfirmConflict,
    #[error("withdrawal already confirmed")]
    ConfirmAbortConflict,
    #[error("withdrawal confirmation missing a prerequisite")]
    ConfirmIncomplete,
    #[error("transfer request_uid reused with a different payload")]
    TransferRequestUidReused,

    // --- cashout / conversion errors ---
    #[error("conversion rejected the requested amounts")]
    BadConversion,
    #[error("conversion is not configured")]
    ConversionNotImplemented,
    #[error("account is missing TAN info required for cashout")]
    MissingTanInfo,

    // --- TAN / challenge errors ---
    #[error("TAN channel is not supported for this account")]
    TanChannelNotSupported,
    #[error("TAN delivery script failed")]
    TanChannelScriptFailed,
    #[error("TAN challenge failed")]
    TanChallengeFailed,
    #[error("TAN challenge expired")]
    TanChallengeExpired,
    #[error("challenge not found")]
    ChallengeNotFound,
    #[error("operation requires a solved TAN challenge")]
    ChallengeRequired { challenge_id: i64 },

    // --- ledger lookup errors ---
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("request_uid reused with a different payload")]
    RequestUidReused,

    // --- auth errors ---
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,

    // --- internal ---
    #[error(transparent)]
    Internal(#[from] eyre::Report),
}

impl From<AmountError> for BankError {
    fn from(e: AmountError) -> Self {
        match e {
            AmountError::CurrencyMismatch { .. } => BankError::CurrencyMismatch,
            other => BankError::ParameterMalformed(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BankError {
    fn from(e: sqlx::Error) -> Self {
        BankError::Internal(eyre::eyre!(e).wrap_err("database error"))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: i64,
    hint: String,
}

impl BankError {
    /// `(http_status, taler_error_code)` per spec §7.
    fn status_and_code(&self) -> (StatusCode, i64) {
        use BankError::*;
        match self {
            ParameterMissing(_) => (StatusCode::BAD_REQUEST, 1),
            ParameterMalformed(_) => (StatusCode::BAD_REQUEST, 2),
            HeadersMalformed(_) => (StatusCode::BAD_REQUEST, 3),
            CurrencyMismatch => (StatusCode::BAD_REQUEST, 4),
            CompressionInvalid => (StatusCode::UNSUPPORTED_MEDIA_TYPE, 5),
            BodyTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, 6),

            UnallowedDebit => (StatusCode::PAYMENT_REQUIRED, 100),
            SameAccount => (StatusCode::CONFLICT, 101),
            AdminCreditor => (StatusCode::CONFLICT, 102),
            UnknownAccount(_) => (StatusCode::NOT_FOUND, 103),
            UnknownDebtor(_) => (StatusCode::NOT_FOUND, 104),
            UnknownCreditor(_) => (StatusCode::NOT_FOUND, 105),
            UsernameReuse => (StatusCode::CONFLICT, 106),
            PaytoReuse => (StatusCode::CONFLICT, 107),
            ReservedUsernameConflict => (StatusCode::CONFLICT, 108),
            AccountIsExchange => (StatusCode::CONFLICT, 109),
            AccountIsNotExchange => (StatusCode::CONFLICT, 110),
            BalanceNotZero => (StatusCode::CONFLICT, 111),
            PatchBadOldPassword => (StatusCode::FORBIDDEN, 112),
            NonAdminPatch(_) => (StatusCode::FORBIDDEN, 113),

            ReserveSelectionConflict => (StatusCode::CONFLICT, 200),
            DuplicateReservePubSubject => (StatusCode::CONFLICT, 201),
            AbortConfirmConflict => (StatusCode::CONFLICT, 202),
            ConfirmAbortConflict => (StatusCode::CONFLICT, 203),
            ConfirmIncomplete => (StatusCode::CONFLICT, 204),
            TransferRequestUidReused => (StatusCode::CONFLICT, 205),

            BadConversion => (StatusCode::CONFLICT, 300),
            ConversionNotImplemented => (StatusCode::NOT_IMPLEMENTED, 301),
            MissingTanInfo => (StatusCode::CONFLICT, 302),

            TanChannelNotSupported => (StatusCode::CONFLICT, 400),
            TanChannelScriptFailed => (StatusCode::BAD_GATEWAY, 401),
            TanChallengeFailed => (StatusCode::FORBIDDEN, 402),
            TanChallengeExpired => (StatusCode::GONE, 403),
            ChallengeNotFound => (StatusCode::NOT_FOUND, 404),
            ChallengeRequired { .. } => (StatusCode::ACCEPTED, 405),

            TransactionNotFound => (StatusCode::NOT_FOUND, 500),
            RequestUidReused => (StatusCode::CONFLICT, 501),

            Unauthorized => (StatusCode::UNAUTHORIZED, 600),
            Forbidden => (StatusCode::FORBIDDEN, 601),

            Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, 999),
        }
    }
}

impl IntoResponse for BankError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if let BankError::Internal(ref report) = self {
            tracing::error!(error = %report, "internal error");
        }

        let hint = if matches!(self, BankError::Internal(_)) {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        if let BankError::ChallengeRequired { challenge_id } = self {
            #[derive(Serialize)]
            struct ChallengeBody {
                challenge_id: i64,
            }
            return (status, Json(ChallengeBody { challenge_id })).into_response();
        }

        (status, Json(ErrorBody { error: ErrorDetail { code, hint } })).into_response()
    }
}

pub type BankResult<T> = Result<T, BankError>;
