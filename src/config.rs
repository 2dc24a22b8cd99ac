//! Configuration types.

use std::path::PathBuf;

use rand::RngCore;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Service configuration, read from `LEDGER_HUB_*` environment variables.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Port the HTTP server binds on `0.0.0.0`.
    pub port: u16,
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Key for signing anti-forgery tokens.
    pub csrf_secret: SecretString,
    /// Form field carrying the anti-forgery token.
    pub csrf_field: String,
    /// Name of the decoy form field that must stay empty.
    pub honeypot_field: String,
    /// Cookie holding the opaque session id.
    pub session_cookie: String,
    /// Where unauthenticated requests are sent.
    pub login_path: String,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            db_path: PathBuf::from("./data/ledger-hub.db"),
            csrf_secret: random_secret(),
            csrf_field: "csrf".to_string(),
            honeypot_field: "name__confirm".to_string(),
            session_cookie: "ledger_session".to_string(),
            login_path: "/login".to_string(),
        }
    }
}

impl OnboardingConfig {
    /// Build the configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match std::env::var("LEDGER_HUB_PORT") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "LEDGER_HUB_PORT".into(),
                message: format!("{e}"),
            })?,
            Err(_) => defaults.port,
        };

        let db_path = std::env::var("LEDGER_HUB_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let csrf_secret = match std::env::var("LEDGER_HUB_CSRF_SECRET") {
            Ok(raw) if raw.len() < 32 => {
                return Err(ConfigError::InvalidValue {
                    key: "LEDGER_HUB_CSRF_SECRET".into(),
                    message: "must be at least 32 characters".into(),
                });
            }
            Ok(raw) => SecretString::from(raw),
            Err(_) => {
                tracing::warn!(
                    "LEDGER_HUB_CSRF_SECRET not set, using a per-process secret; \
                     forms will not survive a restart"
                );
                defaults.csrf_secret
            }
        };

        let login_path = non_empty_var("LEDGER_HUB_LOGIN_PATH").unwrap_or(defaults.login_path);
        let session_cookie =
            non_empty_var("LEDGER_HUB_SESSION_COOKIE").unwrap_or(defaults.session_cookie);
        let honeypot_field =
            non_empty_var("LEDGER_HUB_HONEYPOT_FIELD").unwrap_or(defaults.honeypot_field);

        Ok(Self {
            port,
            db_path,
            csrf_secret,
            csrf_field: defaults.csrf_field,
            honeypot_field,
            session_cookie,
            login_path,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn random_secret() -> SecretString {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    SecretString::from(hex)
}
