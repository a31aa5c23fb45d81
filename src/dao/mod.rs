pub mod account;
pub mod cashout;
pub mod challenge;
pub mod exchange;
pub mod token;
pub mod transaction;
pub mod withdrawal;

/// Reserved logins that cannot be created, renamed, or deleted by non-admin callers
/// (spec §3 "Customer / Account").
pub const RESERVED_LOGINS: &[&str] = &["admin", "bank"];

pub fn is_reserved_login(login: &str) -> bool {
    RESERVED_LOGINS.contains(&login)
}
