use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::models::DEFAULT_CURRENCY;
use crate::provider::webhook::{WebhookSettings, DEFAULT_TOLERANCE_SECS};
use crate::validation::{validate_currency, validate_non_negative_amount};

/// Ledger configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Flat monthly late fee; zero disables late-fee assessment
    pub late_fee_amount: Decimal,
    pub sweep_interval_secs: u64,
    /// Currency given to intents that do not name one
    pub billing_currency: String,
    pub provider_webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| format!("{name} must be a valid {}", std::any::type_name::<T>()))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        let late_fee_amount: Decimal = parse_var("LATE_FEE_AMOUNT", "0.00")?;
        validate_non_negative_amount("LATE_FEE_AMOUNT", late_fee_amount)
            .map_err(|e| e.to_string())?;

        let sweep_interval_secs: u64 = parse_var("SWEEP_INTERVAL_SECS", "3600")?;
        if sweep_interval_secs == 0 {
            return Err("SWEEP_INTERVAL_SECS must be greater than zero".to_string());
        }

        let billing_currency = env::var("BILLING_CURRENCY")
            .unwrap_or_else(|_| DEFAULT_CURRENCY.to_string())
            .trim()
            .to_uppercase();
        validate_currency(&billing_currency).map_err(|e| e.to_string())?;

        let provider_webhook_secret = env::var("PROVIDER_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let webhook_tolerance_secs: i64 =
            parse_var("WEBHOOK_TOLERANCE_SECS", &DEFAULT_TOLERANCE_SECS.to_string())?;
        if webhook_tolerance_secs < 0 {
            return Err("WEBHOOK_TOLERANCE_SECS must not be negative".to_string());
        }

        Ok(Config {
            database_url,
            late_fee_amount,
            sweep_interval_secs,
            billing_currency,
            provider_webhook_secret,
            webhook_tolerance_secs,
        })
    }

    pub fn webhook_settings(&self) -> WebhookSettings {
        WebhookSettings {
            secret: self.provider_webhook_secret.clone(),
            tolerance_secs: self.webhook_tolerance_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 6] = [
        "DATABASE_URL",
        "LATE_FEE_AMOUNT",
        "SWEEP_INTERVAL_SECS",
        "BILLING_CURRENCY",
        "PROVIDER_WEBHOOK_SECRET",
        "WEBHOOK_TOLERANCE_SECS",
    ];

    fn with_env(vars: &[(&str, &str)], f: impl FnOnce()) {
        let saved: Vec<(&str, Option<String>)> =
            VARS.iter().map(|k| (*k, env::var(k).ok())).collect();
        for key in VARS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        f();
        for (key, value) in saved {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        with_env(&[("DATABASE_URL", "postgres://localhost/ledger")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.late_fee_amount, Decimal::ZERO);
            assert_eq!(config.sweep_interval_secs, 3600);
            assert_eq!(config.billing_currency, "USD");
            assert_eq!(config.provider_webhook_secret, None);
            assert_eq!(config.webhook_tolerance_secs, 300);
        });
    }

    #[test]
    #[serial]
    fn test_rejects_negative_late_fee() {
        with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/ledger"),
                ("LATE_FEE_AMOUNT", "-5.00"),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    #[serial]
    fn test_webhook_settings_from_env() {
        with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/ledger"),
                ("PROVIDER_WEBHOOK_SECRET", "whsec_live"),
                ("WEBHOOK_TOLERANCE_SECS", "120"),
                ("BILLING_CURRENCY", "clp"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.billing_currency, "CLP");
                assert_eq!(
                    config.webhook_settings(),
                    WebhookSettings {
                        secret: Some("whsec_live".to_string()),
                        tolerance_secs: 120,
                    }
                );
            },
        );

        with_env(
            &[
                ("DATABASE_URL", "postgres://localhost/ledger"),
                ("WEBHOOK_TOLERANCE_SECS", "-1"),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }
}
