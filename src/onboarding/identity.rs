//! Identity gate: resolves who is making the request.
//!
//! Session issuance lives elsewhere; this module only turns an opaque session
//! id into an [`OnboardingIdentity`] through a [`SessionLookup`] capability and
//! then enforces the identity level a step needs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DatabaseError, OnboardingError};

/// Who the session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingIdentity {
    pub subject_id: String,
    pub email: String,
    /// False while the subject has confirmed an email but has no account yet.
    pub has_account: bool,
}

impl OnboardingIdentity {
    pub fn account(subject_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: email.into(),
            has_account: true,
        }
    }

    pub fn pre_account(subject_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: email.into(),
            has_account: false,
        }
    }
}

/// Session lookup capability.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    /// Resolve a live session, or `None` if it is unknown or expired.
    async fn lookup_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OnboardingIdentity>, DatabaseError>;
}

/// Per-request identity, threaded explicitly through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    session_id: Option<String>,
    identity: Option<OnboardingIdentity>,
}

impl RequestContext {
    pub fn new(session_id: Option<String>, identity: Option<OnboardingIdentity>) -> Self {
        Self {
            session_id,
            identity,
        }
    }

    /// A request with no session cookie.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn identity(&self) -> Option<&OnboardingIdentity> {
        self.identity.as_ref()
    }

    /// Subject id of a fully registered account.
    pub fn require_account(&self) -> Result<&str, OnboardingError> {
        match &self.identity {
            Some(identity) if identity.has_account => Ok(&identity.subject_id),
            _ => Err(OnboardingError::Unauthenticated),
        }
    }

    /// Email of a subject that has not created an account yet.
    pub fn require_pre_account_email(&self) -> Result<&str, OnboardingError> {
        match &self.identity {
            Some(identity) if identity.has_account => Err(OnboardingError::AccountExists {
                subject_id: identity.subject_id.clone(),
            }),
            Some(identity) if !identity.email.is_empty() => Ok(&identity.email),
            _ => Err(OnboardingError::Unauthenticated),
        }
    }
}

/// Builds [`RequestContext`]s from session cookies.
#[derive(Clone)]
pub struct IdentityGate {
    sessions: Arc<dyn SessionLookup>,
    cookie_name: String,
}

impl IdentityGate {
    pub fn new(sessions: Arc<dyn SessionLookup>, cookie_name: impl Into<String>) -> Self {
        Self {
            sessions,
            cookie_name: cookie_name.into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Resolve the identity behind a `Cookie` header value.
    ///
    /// An unknown or expired session keeps its id (so the guard can still
    /// bind tokens to it) but carries no identity.
    pub async fn resolve(&self, cookie_header: Option<&str>) -> Result<RequestContext, DatabaseError> {
        let Some(session_id) = cookie_header.and_then(|h| cookie_value(h, &self.cookie_name)) else {
            return Ok(RequestContext::anonymous());
        };

        let identity = self.sessions.lookup_session(&session_id).await?;
        if identity.is_none() {
            debug!("Session cookie did not match a live session");
        }
        Ok(RequestContext::new(Some(session_id), identity))
    }
}

/// Extract one cookie from a `Cookie` header.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
