use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::providers::ProviderSettings;
use crate::services::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeychainBackend {
    Env,
    Vault,
}

impl FromStr for KeychainBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "env" => Ok(KeychainBackend::Env),
            "vault" => Ok(KeychainBackend::Vault),
            other => anyhow::bail!("KEYCHAIN_BACKEND must be 'env' or 'vault', got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// In-memory storage when absent.
    pub database_url: Option<String>,
    pub stripe_api_base: String,
    pub adyen_api_base: String,
    pub paypal_api_base: String,
    pub provider_timeout_secs: u64,
    pub webhook_max_attempts: u32,
    pub webhook_retry_delay_ms: u64,
    /// Zero disables the pending transaction poller.
    pub poll_interval_secs: u64,
    pub poll_batch_size: i64,
    pub keychain_backend: KeychainBackend,
    pub log_format: LogFormat,
    pub log_request_body: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ProviderSettings::default();

        Ok(Config {
            server_port: parse_or(&var, "SERVER_PORT", 3000)?,
            database_url: var("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            stripe_api_base: var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
            adyen_api_base: var("ADYEN_API_BASE").unwrap_or(defaults.adyen_api_base),
            paypal_api_base: var("PAYPAL_API_BASE").unwrap_or(defaults.paypal_api_base),
            provider_timeout_secs: parse_or(&var, "PROVIDER_TIMEOUT_SECS", 30)?,
            webhook_max_attempts: parse_or(&var, "WEBHOOK_MAX_ATTEMPTS", 3)?,
            webhook_retry_delay_ms: parse_or(&var, "WEBHOOK_RETRY_DELAY_MS", 1000)?,
            poll_interval_secs: parse_or(&var, "POLL_INTERVAL_SECS", 60)?,
            poll_batch_size: parse_or(&var, "POLL_BATCH_SIZE", 50)?,
            keychain_backend: var("KEYCHAIN_BACKEND")
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or(KeychainBackend::Env),
            log_format: match var("LOG_FORMAT").as_deref().map(str::trim) {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            log_request_body: parse_or(&var, "LOG_REQUEST_BODY", false)?,
        })
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            stripe_api_base: self.stripe_api_base.clone(),
            adyen_api_base: self.adyen_api_base.clone(),
            paypal_api_base: self.paypal_api_base.clone(),
            timeout: Duration::from_secs(self.provider_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.webhook_max_attempts.max(1),
            delay: Duration::from_millis(self.webhook_retry_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
