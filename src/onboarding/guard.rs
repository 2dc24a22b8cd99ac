//! Anti-automation guard: anti-forgery token and honeypot checks.
//!
//! The token is `base64url(HMAC-SHA256(secret, session_id))`, so it is bound
//! to the session without any server-side token storage.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::warn;

use super::identity::RequestContext;
use crate::config::OnboardingConfig;
use crate::error::OnboardingError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies form submissions before any field validation runs.
#[derive(Clone)]
pub struct AntiAutomationGuard {
    secret: SecretString,
    csrf_field: String,
    honeypot_field: String,
}

impl AntiAutomationGuard {
    pub fn new(config: &OnboardingConfig) -> Self {
        Self {
            secret: config.csrf_secret.clone(),
            csrf_field: config.csrf_field.clone(),
            honeypot_field: config.honeypot_field.clone(),
        }
    }

    pub fn csrf_field(&self) -> &str {
        &self.csrf_field
    }

    pub fn honeypot_field(&self) -> &str {
        &self.honeypot_field
    }

    fn mac(&self, session_id: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(session_id.as_bytes());
        mac
    }

    /// Token to embed in forms rendered for this session.
    pub fn issue_token(&self, session_id: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(session_id).finalize().into_bytes())
    }

    /// Constant-time check of a submitted token against the session.
    pub fn verify_token(&self, session_id: &str, token: &str) -> bool {
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(token.trim()) else {
            return false;
        };
        self.mac(session_id).verify_slice(&bytes).is_ok()
    }

    /// Run the forgery check, then the honeypot check.
    pub fn check(
        &self,
        ctx: &RequestContext,
        raw: &HashMap<String, String>,
    ) -> Result<(), OnboardingError> {
        let Some(session_id) = ctx.session_id() else {
            warn!("Form submitted without a session");
            return Err(OnboardingError::ForgeryRejected);
        };

        let token = raw.get(&self.csrf_field).map(String::as_str).unwrap_or_default();
        if token.is_empty() || !self.verify_token(session_id, token) {
            warn!(
                token_present = !token.is_empty(),
                "Anti-forgery token rejected"
            );
            return Err(OnboardingError::ForgeryRejected);
        }

        if raw
            .get(&self.honeypot_field)
            .is_some_and(|value| !value.is_empty())
        {
            warn!(field = %self.honeypot_field, "Honeypot field filled in");
            return Err(OnboardingError::AutomationSuspected);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::identity::OnboardingIdentity;

    fn guard() -> AntiAutomationGuard {
        let config = OnboardingConfig {
            csrf_secret: SecretString::from("0123456789abcdef0123456789abcdef"),
            ..Default::default()
        };
        AntiAutomationGuard::new(&config)
    }

    fn ctx(session_id: &str) -> RequestContext {
        RequestContext::new(
            Some(session_id.to_string()),
            Some(OnboardingIdentity::account("user-1", "user@example.com")),
        )
    }

    fn form(guard: &AntiAutomationGuard, token: &str, honeypot: &str) -> HashMap<String, String> {
        HashMap::from([
            (guard.csrf_field().to_string(), token.to_string()),
            (guard.honeypot_field().to_string(), honeypot.to_string()),
            ("language".to_string(), "en".to_string()),
        ])
    }

    #[test]
    fn issued_token_verifies_for_its_session() {
        let guard = guard();
        let token = guard.issue_token("sess-a");
        assert!(guard.verify_token("sess-a", &token));
        assert!(!guard.verify_token("sess-b", &token));
    }

    #[test]
    fn tokens_are_deterministic_per_session() {
        let guard = guard();
        assert_eq!(guard.issue_token("sess-a"), guard.issue_token("sess-a"));
        assert_ne!(guard.issue_token("sess-a"), guard.issue_token("sess-b"));
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let other = AntiAutomationGuard::new(&OnboardingConfig::default());
        let token = other.issue_token("sess-a");
        assert!(!guard().verify_token("sess-a", &token));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let guard = guard();
        assert!(!guard.verify_token("sess-a", "not base64 !!"));
        assert!(!guard.verify_token("sess-a", ""));
    }

    #[test]
    fn check_passes_valid_submission() {
        let guard = guard();
        let token = guard.issue_token("sess-a");
        assert!(guard.check(&ctx("sess-a"), &form(&guard, &token, "")).is_ok());
    }

    #[test]
    fn check_rejects_missing_token() {
        let guard = guard();
        let mut raw = form(&guard, "", "");
        raw.remove(guard.csrf_field());
        let err = guard.check(&ctx("sess-a"), &raw).unwrap_err();
        assert!(matches!(err, OnboardingError::ForgeryRejected));
    }

    #[test]
    fn check_rejects_token_for_other_session() {
        let guard = guard();
        let token = guard.issue_token("sess-b");
        let err = guard
            .check(&ctx("sess-a"), &form(&guard, &token, ""))
            .unwrap_err();
        assert!(matches!(err, OnboardingError::ForgeryRejected));
    }

    #[test]
    fn check_rejects_sessionless_request() {
        let guard = guard();
        let token = guard.issue_token("sess-a");
        let err = guard
            .check(&RequestContext::anonymous(), &form(&guard, &token, ""))
            .unwrap_err();
        assert!(matches!(err, OnboardingError::ForgeryRejected));
    }

    #[test]
    fn check_rejects_filled_honeypot() {
        let guard = guard();
        let token = guard.issue_token("sess-a");
        let err = guard
            .check(&ctx("sess-a"), &form(&guard, &token, "I am a bot"))
            .unwrap_err();
        assert!(matches!(err, OnboardingError::AutomationSuspected));
    }

    #[test]
    fn forgery_is_checked_before_honeypot() {
        let guard = guard();
        let err = guard
            .check(&ctx("sess-a"), &form(&guard, "forged", "I am a bot"))
            .unwrap_err();
        assert!(matches!(err, OnboardingError::ForgeryRejected));
    }
}
