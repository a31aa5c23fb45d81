#![allow(dead_code)]

use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;

/// Top-level bank configuration, loaded once at startup.
#[derive(Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub bank: BankConfig,
    pub tan: TanConfig,
    pub gc: GcConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("server", &self.server)
            .field("bank", &self.bank)
            .field("tan", &self.tan)
            .field("gc", &self.gc)
            .finish()
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BankConfig {
    pub base_url: String,
    pub regional_currency: String,
    pub fiat_currency: String,
    pub allow_registration: bool,
    pub suggested_withdrawal_exchange: Option<String>,
}

#[derive(Clone)]
pub struct TanConfig {
    pub sms_script: Option<String>,
    pub email_script: Option<String>,
    pub retransmission_secs: i64,
    pub challenge_validity_secs: i64,
    pub max_retries: u32,
    pub max_token_duration_secs: i64,
}

impl fmt::Debug for TanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TanConfig")
            .field("sms_script", &self.sms_script)
            .field("email_script", &self.email_script)
            .field("retransmission_secs", &self.retransmission_secs)
            .field("challenge_validity_secs", &self.challenge_validity_secs)
            .field("max_retries", &self.max_retries)
            .field("max_token_duration_secs", &self.max_token_duration_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GcConfig {
    pub abort_after_secs: i64,
    pub clean_after_secs: i64,
    pub delete_after_secs: i64,
    pub interval_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_retransmission_secs() -> i64 {
    60
}

fn default_challenge_validity_secs() -> i64 {
    5 * 60
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_token_duration_secs() -> i64 {
    365 * 24 * 60 * 60
}

fn default_gc_abort_after_secs() -> i64 {
    15 * 60
}

fn default_gc_clean_after_secs() -> i64 {
    14 * 24 * 60 * 60
}

fn default_gc_delete_after_secs() -> i64 {
    350 * 24 * 60 * 60
}

fn default_gc_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment variables, loading `.env` if present.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let server = ServerConfig {
            bind_address: env::var("BANK_BIND_ADDRESS").unwrap_or_else(|_| default_bind_address()),
            port: env::var("BANK_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_port),
        };

        let bank = BankConfig {
            base_url: env::var("BANK_BASE_URL")
                .map_err(|_| eyre!("BANK_BASE_URL environment variable is required"))?,
            regional_currency: env::var("BANK_REGIONAL_CURRENCY")
                .map_err(|_| eyre!("BANK_REGIONAL_CURRENCY environment variable is required"))?,
            fiat_currency: env::var("BANK_FIAT_CURRENCY").unwrap_or_default(),
            allow_registration: env::var("BANK_ALLOW_REGISTRATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            suggested_withdrawal_exchange: env::var("BANK_SUGGESTED_WITHDRAWAL_EXCHANGE").ok(),
        };

        let tan = TanConfig {
            sms_script: env::var("TAN_SMS_SCRIPT").ok(),
            email_script: env::var("TAN_EMAIL_SCRIPT").ok(),
            retransmission_secs: env::var("TAN_RETRANSMISSION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_retransmission_secs),
            challenge_validity_secs: env::var("TAN_CHALLENGE_VALIDITY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_challenge_validity_secs),
            max_retries: env::var("TAN_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_retries),
            max_token_duration_secs: env::var("TOKEN_MAX_DURATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_token_duration_secs),
        };

        let gc = GcConfig {
            abort_after_secs: env::var("GC_ABORT_AFTER_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gc_abort_after_secs),
            clean_after_secs: env::var("GC_CLEAN_AFTER_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gc_clean_after_secs),
            delete_after_secs: env::var("GC_DELETE_AFTER_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gc_delete_after_secs),
            interval_secs: env::var("GC_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gc_interval_secs),
        };

        let config = Config {
            database,
            server,
            bank,
            tan,
            gc,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }
        if self.bank.regional_currency.is_empty() {
            return Err(eyre!("bank.regional_currency cannot be empty"));
        }
        if self.tan.max_retries == 0 {
            return Err(eyre!("tan.max_retries must be at least 1"));
        }
        if self.tan.challenge_validity_secs <= 0 {
            return Err(eyre!("tan.challenge_validity_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
            },
            server: ServerConfig {
                bind_address: default_bind_address(),
                port: default_port(),
            },
            bank: BankConfig {
                base_url: "http://localhost:8080".to_string(),
                regional_currency: "KUDOS".to_string(),
                fiat_currency: "EUR".to_string(),
                allow_registration: true,
                suggested_withdrawal_exchange: None,
            },
            tan: TanConfig {
                sms_script: None,
                email_script: None,
                retransmission_secs: default_retransmission_secs(),
                challenge_validity_secs: default_challenge_validity_secs(),
                max_retries: default_max_retries(),
                max_token_duration_secs: default_max_token_duration_secs(),
            },
            gc: GcConfig {
                abort_after_secs: default_gc_abort_after_secs(),
                clean_after_secs: default_gc_clean_after_secs(),
                delete_after_secs: default_gc_delete_after_secs(),
                interval_secs: default_gc_interval_secs(),
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_currency_rejected() {
        let mut c = sample();
        c.bank.regional_currency.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_retries_rejected() {
        let mut c = sample();
        c.tan.max_retries = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn defaults_match_spec() {
        assert_eq!(default_gc_abort_after_secs(), 15 * 60);
        assert_eq!(default_gc_clean_after_secs(), 14 * 24 * 60 * 60);
        assert_eq!(default_gc_delete_after_secs(), 350 * 24 * 60 * 60);
    }
}
