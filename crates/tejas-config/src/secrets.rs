//! Secret resolution.
//!
//! Config YAML stores only **env var NAMES**. At startup, callers invoke
//! [`resolve_secrets`] once; the returned `ResolvedSecrets` is passed into
//! constructors. `Debug` redacts every field. Error messages reference the
//! env var NAME only, never the value.
//!
//! Mode-aware enforcement: LIVE requires the broker key/secret and the
//! store DSN; PAPER requires only the store DSN (capital is simulated, no
//! broker auth needed to run against paper fills... except the reference
//! strategy still needs quote/candle data, so PAPER also requires broker
//! credentials for market data).

use anyhow::{bail, Result};
use tejas_schemas::TradingMode;

pub const ENV_BROKER_API_KEY: &str = "TEJAS_BROKER_API_KEY";
pub const ENV_BROKER_API_SECRET: &str = "TEJAS_BROKER_API_SECRET";
pub const ENV_BROKER_REDIRECT_URL: &str = "TEJAS_BROKER_REDIRECT_URL";
pub const ENV_STORE_DATABASE_URL: &str = "TEJAS_STORE_DATABASE_URL";
pub const ENV_STORE_API_KEY: &str = "TEJAS_STORE_API_KEY";
pub const ENV_PLATFORM_PASSWORD: &str = "TEJAS_PLATFORM_PASSWORD";

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub broker_api_key: Option<String>,
    pub broker_api_secret: Option<String>,
    pub broker_redirect_url: Option<String>,
    pub store_database_url: Option<String>,
    pub store_api_key: Option<String>,
    pub platform_password: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |o: &Option<String>| o.as_ref().map(|_| "<REDACTED>");
        f.debug_struct("ResolvedSecrets")
            .field("broker_api_key", &redact(&self.broker_api_key))
            .field("broker_api_secret", &redact(&self.broker_api_secret))
            .field("broker_redirect_url", &redact(&self.broker_redirect_url))
            .field("store_database_url", &redact(&self.store_database_url))
            .field("store_api_key", &redact(&self.store_api_key))
            .field("platform_password", &redact(&self.platform_password))
            .finish()
    }
}

/// Resolve a named environment variable. `None` if unset or blank — never
/// returns the value in an error path.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve all secrets from the environment for `mode`.
///
/// | Mode | Required |
/// |---|---|
/// | LIVE | broker api_key, broker api_secret, store DSN |
/// | PAPER | broker api_key, broker api_secret (market data), store DSN |
pub fn resolve_secrets(mode: TradingMode) -> Result<ResolvedSecrets> {
    let broker_api_key = resolve_env(ENV_BROKER_API_KEY);
    let broker_api_secret = resolve_env(ENV_BROKER_API_SECRET);
    let broker_redirect_url = resolve_env(ENV_BROKER_REDIRECT_URL);
    let store_database_url = resolve_env(ENV_STORE_DATABASE_URL);
    let store_api_key = resolve_env(ENV_STORE_API_KEY);
    let platform_password = resolve_env(ENV_PLATFORM_PASSWORD);

    if broker_api_key.is_none() {
        bail!(
            "SECRETS_MISSING mode={mode}: required env var '{ENV_BROKER_API_KEY}' \
             (broker api_key) is not set or empty"
        );
    }
    if broker_api_secret.is_none() {
        bail!(
            "SECRETS_MISSING mode={mode}: required env var '{ENV_BROKER_API_SECRET}' \
             (broker api_secret) is not set or empty"
        );
    }
    if store_database_url.is_none() {
        bail!(
            "SECRETS_MISSING mode={mode}: required env var '{ENV_STORE_DATABASE_URL}' \
             (store DSN) is not set or empty"
        );
    }
    if mode == TradingMode::Live && platform_password.is_none() {
        bail!(
            "SECRETS_MISSING mode=LIVE: required env var '{ENV_PLATFORM_PASSWORD}' \
             is not set or empty"
        );
    }

    Ok(ResolvedSecrets {
        broker_api_key,
        broker_api_secret,
        broker_redirect_url,
        store_database_url,
        store_api_key,
        platform_password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize these tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn debug_never_leaks_values() {
        let secrets = ResolvedSecrets {
            broker_api_key: Some("super-secret".to_string()),
            broker_api_secret: Some("also-secret".to_string()),
            broker_redirect_url: None,
            store_database_url: Some("postgres://u:p@host/db".to_string()),
            store_api_key: None,
            platform_password: None,
        };
        let rendered = format!("{secrets:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("also-secret"));
        assert!(!rendered.contains("postgres://"));
    }

    #[test]
    fn paper_mode_requires_broker_and_store() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(ENV_BROKER_API_KEY);
        std::env::remove_var(ENV_BROKER_API_SECRET);
        std::env::remove_var(ENV_STORE_DATABASE_URL);
        let err = resolve_secrets(TradingMode::Paper).unwrap_err();
        assert!(err.to_string().contains(ENV_BROKER_API_KEY));

        std::env::set_var(ENV_BROKER_API_KEY, "k");
        std::env::set_var(ENV_BROKER_API_SECRET, "s");
        std::env::set_var(ENV_STORE_DATABASE_URL, "postgres://localhost/db");
        let resolved = resolve_secrets(TradingMode::Paper).unwrap();
        assert_eq!(resolved.broker_api_key.as_deref(), Some("k"));

        std::env::remove_var(ENV_BROKER_API_KEY);
        std::env::remove_var(ENV_BROKER_API_SECRET);
        std::env::remove_var(ENV_STORE_DATABASE_URL);
    }
}
