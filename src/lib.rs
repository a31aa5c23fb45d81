//! LibEuFin-Bank: a double-entry ledger and HTTP service implementing the Taler
//! bank-integration API. Module layout follows `packages/operator`'s flat
//! `mod a; mod b; ...` style (see DESIGN.md).

pub mod amount;
pub mod auth;
pub mod config;
pub mod conversion;
pub mod dao;
pub mod error;
pub mod gc;
pub mod http;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod stats;
pub mod store;
pub mod tan;
