//! `ProgressStore` trait: the persistence boundary of the onboarding funnel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::identity::OnboardingIdentity;
use crate::onboarding::schema::{Currency, Language, LedgerInput, PreferencesInput};
use crate::onboarding::state::OnboardingState;

/// Persisted preferences of a subject. At most one per subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preferences {
    pub subject_id: String,
    pub language: Language,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

/// A persisted ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ledger {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic store for onboarding progress.
///
/// The `create_*` methods are step transitions: each inserts its record and
/// advances the subject's state in one atomic write, or fails with
/// [`DatabaseError::StaleState`] and writes nothing when the subject is not
/// on that step.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Progress ────────────────────────────────────────────────────

    /// Current funnel state; derived from existing records when no state
    /// row has been written yet.
    async fn get_state(&self, subject_id: &str) -> Result<OnboardingState, DatabaseError>;

    /// Record preferences and move the subject to the ledger step.
    async fn create_preferences(
        &self,
        subject_id: &str,
        input: &PreferencesInput,
    ) -> Result<Preferences, DatabaseError>;

    /// Record the first ledger and complete onboarding.
    async fn create_ledger(
        &self,
        owner_id: &str,
        input: &LedgerInput,
    ) -> Result<Ledger, DatabaseError>;

    // ── Records ─────────────────────────────────────────────────────

    async fn get_preferences(&self, subject_id: &str) -> Result<Option<Preferences>, DatabaseError>;

    /// Ledgers owned by a subject, oldest first.
    async fn list_ledgers(&self, owner_id: &str) -> Result<Vec<Ledger>, DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// Register a session. Used by the registration flow and by tests.
    async fn create_session(
        &self,
        session_id: &str,
        identity: &OnboardingIdentity,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
}
