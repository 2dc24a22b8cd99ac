//! Step orchestrator: runs a submission through the pipeline and decides
//! where the subject goes next.
//!
//! Order for a POST: identity gate, current-step check, anti-automation
//! guard, schema validation, then the store's atomic step transition.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::guard::AntiAutomationGuard;
use super::identity::RequestContext;
use super::schema::{self, FieldErrors, ValidatedPayload};
use super::state::{OnboardingState, OnboardingStep};
use crate::error::OnboardingError;
use crate::store::ProgressStore;

/// Form-level message for any guard rejection, whichever check failed.
pub const GENERIC_REJECTION: &str =
    "Your submission could not be verified. Please reload the page and try again.";

/// What the HTTP layer should do after a step request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Show the step's form.
    Render(StepForm),
    /// Send the subject to another URL.
    Redirect(&'static str),
}

/// Everything needed to render one step's form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepForm {
    pub step: OnboardingStep,
    pub csrf_token: String,
    /// Previously submitted values to echo back, keyed by field name.
    pub values: HashMap<String, String>,
    pub errors: FieldErrors,
}

impl StepForm {
    /// Value to prefill a field with.
    pub fn value(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or_default()
    }
}

/// Names of the data fields a step's form submits.
fn step_fields(step: OnboardingStep) -> &'static [&'static str] {
    match step {
        OnboardingStep::Preferences => &["language", "currency"],
        OnboardingStep::Ledger => &["name"],
    }
}

/// Drives the onboarding state machine.
pub struct StepOrchestrator {
    store: Arc<dyn ProgressStore>,
    guard: AntiAutomationGuard,
}

impl StepOrchestrator {
    pub fn new(store: Arc<dyn ProgressStore>, guard: AntiAutomationGuard) -> Self {
        Self { store, guard }
    }

    pub fn guard(&self) -> &AntiAutomationGuard {
        &self.guard
    }

    /// Where the subject currently is in the funnel.
    pub async fn current_state(&self, subject_id: &str) -> Result<OnboardingState, OnboardingError> {
        Ok(self.store.get_state(subject_id).await?)
    }

    /// Blank form for a step, bound to the request's session.
    pub fn form(&self, ctx: &RequestContext, step: OnboardingStep) -> StepForm {
        StepForm {
            step,
            csrf_token: ctx
                .session_id()
                .map(|sid| self.guard.issue_token(sid))
                .unwrap_or_default(),
            values: HashMap::new(),
            errors: FieldErrors::new(),
        }
    }

    /// Form re-rendered after a rejected submission.
    ///
    /// Only the step's own fields are echoed back; the token is re-issued
    /// rather than copied from the submission.
    pub fn rejected_form(
        &self,
        ctx: &RequestContext,
        step: OnboardingStep,
        raw: &HashMap<String, String>,
        err: &OnboardingError,
    ) -> StepForm {
        let mut form = self.form(ctx, step);
        form.values = step_fields(step)
            .iter()
            .filter_map(|field| raw.get(*field).map(|v| (field.to_string(), v.clone())))
            .collect();
        form.errors = match err {
            OnboardingError::ValidationFailed(errors) => errors.clone(),
            _ => {
                let mut errors = FieldErrors::new();
                errors.add_form(GENERIC_REJECTION);
                errors
            }
        };
        form
    }

    /// Handle a GET for a step.
    ///
    /// The form is only shown for the step the subject is on; any other
    /// step redirects to the current one, forward or back.
    pub async fn show(
        &self,
        ctx: &RequestContext,
        step: OnboardingStep,
    ) -> Result<StepOutcome, OnboardingError> {
        let subject_id = ctx.require_account()?;
        let current = self.current_state(subject_id).await?;

        if current.step() != Some(step) {
            return Ok(StepOutcome::Redirect(current.path()));
        }
        Ok(StepOutcome::Render(self.form(ctx, step)))
    }

    /// Handle a POST for a step.
    ///
    /// Success persists the validated payload and redirects to the next
    /// step. Every error leaves storage untouched.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        step: OnboardingStep,
        raw: &HashMap<String, String>,
    ) -> Result<StepOutcome, OnboardingError> {
        let subject_id = ctx.require_account()?;

        let current = self.current_state(subject_id).await?;
        if current.step() != Some(step) {
            return Err(OnboardingError::StepConflict { current });
        }

        self.guard.check(ctx, raw)?;

        let payload = schema::validate(step, raw).map_err(|errors| {
            info!(subject_id, %step, %errors, "Step submission failed validation");
            OnboardingError::ValidationFailed(errors)
        })?;

        match payload {
            ValidatedPayload::Preferences(input) => {
                self.store.create_preferences(subject_id, &input).await?;
            }
            ValidatedPayload::Ledger(input) => {
                self.store.create_ledger(subject_id, &input).await?;
            }
        }

        info!(subject_id, %step, "Onboarding step completed");
        Ok(StepOutcome::Redirect(step.success_redirect()))
    }

    /// Log an error the way its severity deserves.
    pub fn log_error(&self, step: Option<OnboardingStep>, err: &OnboardingError) {
        let step = step.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        match err {
            OnboardingError::Storage(e) => {
                tracing::error!(step = %step, error = %e, "Onboarding storage failure");
            }
            OnboardingError::StepConflict { current } => {
                info!(step = %step, %current, "Step requested out of order");
            }
            e if e.is_guard_rejection() => warn!(step = %step, error = %e, "Submission rejected"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use secrecy::SecretString;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::config::OnboardingConfig;
    use crate::error::DatabaseError;
    use crate::onboarding::identity::OnboardingIdentity;
    use crate::onboarding::schema::{LedgerInput, PreferencesInput};
    use crate::store::{Ledger, Preferences};

    /// In-memory store that records every write.
    #[derive(Default)]
    struct MemoryStore {
        preferences: Mutex<Vec<Preferences>>,
        ledgers: Mutex<Vec<Ledger>>,
        fail_writes: bool,
    }

    #[async_trait::async_trait]
    impl ProgressStore for MemoryStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn get_state(&self, subject_id: &str) -> Result<OnboardingState, DatabaseError> {
            let has_prefs = self
                .preferences
                .lock()
                .await
                .iter()
                .any(|p| p.subject_id == subject_id);
            let has_ledger = self
                .ledgers
                .lock()
                .await
                .iter()
                .any(|l| l.owner_id == subject_id);
            Ok(OnboardingState::from_records(has_prefs, has_ledger))
        }

        async fn create_preferences(
            &self,
            subject_id: &str,
            input: &PreferencesInput,
        ) -> Result<Preferences, DatabaseError> {
            if self.fail_writes {
                return Err(DatabaseError::Query("disk full".into()));
            }
            let prefs = Preferences {
                subject_id: subject_id.to_string(),
                language: input.language,
                currency: input.currency,
                created_at: Utc::now(),
            };
            self.preferences.lock().await.push(prefs.clone());
            Ok(prefs)
        }

        async fn create_ledger(
            &self,
            owner_id: &str,
            input: &LedgerInput,
        ) -> Result<Ledger, DatabaseError> {
            if self.fail_writes {
                return Err(DatabaseError::Query("disk full".into()));
            }
            let ledger = Ledger {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                name: input.name.clone(),
                created_at: Utc::now(),
            };
            self.ledgers.lock().await.push(ledger.clone());
            Ok(ledger)
        }

        async fn get_preferences(
            &self,
            subject_id: &str,
        ) -> Result<Option<Preferences>, DatabaseError> {
            Ok(self
                .preferences
                .lock()
                .await
                .iter()
                .find(|p| p.subject_id == subject_id)
                .cloned())
        }

        async fn list_ledgers(&self, owner_id: &str) -> Result<Vec<Ledger>, DatabaseError> {
            Ok(self
                .ledgers
                .lock()
                .await
                .iter()
                .filter(|l| l.owner_id == owner_id)
                .cloned()
                .collect())
        }

        async fn create_session(
            &self,
            _session_id: &str,
            _identity: &OnboardingIdentity,
            _expires_at: DateTime<Utc>,
        ) -> Result<(), DatabaseError> {
            Ok(())
        }
    }

    fn setup(store: MemoryStore) -> (Arc<MemoryStore>, StepOrchestrator) {
        let config = OnboardingConfig {
            csrf_secret: SecretString::from("orchestrator-test-secret-0123456789"),
            ..Default::default()
        };
        let store = Arc::new(store);
        let orchestrator = StepOrchestrator::new(store.clone(), AntiAutomationGuard::new(&config));
        (store, orchestrator)
    }

    fn ctx() -> RequestContext {
        RequestContext::new(
            Some("sess-1".into()),
            Some(OnboardingIdentity::account("user-1", "user@example.com")),
        )
    }

    fn submission(
        orchestrator: &StepOrchestrator,
        pairs: &[(&str, &str)],
    ) -> HashMap<String, String> {
        let mut raw: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        raw.insert(
            orchestrator.guard().csrf_field().to_string(),
            orchestrator.guard().issue_token("sess-1"),
        );
        raw.insert(orchestrator.guard().honeypot_field().to_string(), String::new());
        raw
    }

    #[tokio::test]
    async fn valid_preferences_persist_once_and_redirect_to_ledger() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let raw = submission(&orchestrator, &[("language", "en"), ("currency", "usd")]);

        let outcome = orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Redirect("/onboarding/ledger"));
        let prefs = store.preferences.lock().await;
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].subject_id, "user-1");
    }

    #[tokio::test]
    async fn valid_ledger_persists_and_redirects_to_dashboard() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let prefs = submission(&orchestrator, &[("language", "ne"), ("currency", "npr")]);
        orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &prefs)
            .await
            .unwrap();

        let raw = submission(&orchestrator, &[("name", "Acme Traders")]);
        let outcome = orchestrator
            .submit(&ctx(), OnboardingStep::Ledger, &raw)
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Redirect("/dashboard"));
        let ledgers = store.ledgers.lock().await;
        assert_eq!(ledgers.len(), 1);
        assert_eq!(ledgers[0].owner_id, "user-1");
        assert_eq!(ledgers[0].name, "Acme Traders");
    }

    #[tokio::test]
    async fn invalid_preferences_create_nothing() {
        let (store, orchestrator) = setup(MemoryStore::default());
        for (language, currency) in [("fr", "usd"), ("en", "eur"), ("", "")] {
            let raw = submission(&orchestrator, &[("language", language), ("currency", currency)]);
            let err = orchestrator
                .submit(&ctx(), OnboardingStep::Preferences, &raw)
                .await
                .unwrap_err();
            assert!(matches!(err, OnboardingError::ValidationFailed(_)));
        }
        assert!(store.preferences.lock().await.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_ledger_names_create_nothing() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let prefs = submission(&orchestrator, &[("language", "en"), ("currency", "usd")]);
        orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &prefs)
            .await
            .unwrap();

        let too_long = "x".repeat(51);
        for name in ["ab", "   a  ", too_long.as_str()] {
            let raw = submission(&orchestrator, &[("name", name)]);
            let err = orchestrator
                .submit(&ctx(), OnboardingStep::Ledger, &raw)
                .await
                .unwrap_err();
            assert!(matches!(err, OnboardingError::ValidationFailed(_)));
        }
        assert!(store.ledgers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn forged_token_rejected_before_validation() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let mut raw = submission(&orchestrator, &[("language", "zz"), ("currency", "zz")]);
        raw.insert(orchestrator.guard().csrf_field().to_string(), "forged".into());

        let err = orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::ForgeryRejected));
        assert!(store.preferences.lock().await.is_empty());
    }

    #[tokio::test]
    async fn filled_honeypot_rejected_before_validation() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let mut raw = submission(&orchestrator, &[("language", "en"), ("currency", "usd")]);
        raw.insert(orchestrator.guard().honeypot_field().to_string(), "spam".into());

        let err = orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::AutomationSuspected));
        assert!(store.preferences.lock().await.is_empty());
    }

    #[tokio::test]
    async fn filled_honeypot_wins_over_invalid_fields() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let mut raw = submission(&orchestrator, &[("language", "fr"), ("currency", "")]);
        raw.insert(orchestrator.guard().honeypot_field().to_string(), "spam".into());

        let err = orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::AutomationSuspected));
        assert!(store.preferences.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unauthenticated_submission_creates_nothing() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let raw = submission(&orchestrator, &[("language", "en"), ("currency", "usd")]);

        let err = orchestrator
            .submit(&RequestContext::anonymous(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Unauthenticated));
        assert!(store.preferences.lock().await.is_empty());
    }

    #[tokio::test]
    async fn pre_account_identity_cannot_submit_steps() {
        let (_, orchestrator) = setup(MemoryStore::default());
        let ctx = RequestContext::new(
            Some("sess-1".into()),
            Some(OnboardingIdentity::pre_account("reg-1", "p@example.com")),
        );
        let err = orchestrator
            .show(&ctx, OnboardingStep::Preferences)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Unauthenticated));
    }

    #[tokio::test]
    async fn resubmitting_finished_step_is_a_conflict() {
        let (store, orchestrator) = setup(MemoryStore::default());
        let raw = submission(&orchestrator, &[("language", "en"), ("currency", "usd")]);
        orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap();

        let err = orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::StepConflict {
                current: OnboardingState::AwaitingLedger
            }
        ));
        assert_eq!(store.preferences.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn show_renders_current_step_with_token() {
        let (_, orchestrator) = setup(MemoryStore::default());
        match orchestrator
            .show(&ctx(), OnboardingStep::Preferences)
            .await
            .unwrap()
        {
            StepOutcome::Render(form) => {
                assert_eq!(form.step, OnboardingStep::Preferences);
                assert!(orchestrator.guard().verify_token("sess-1", &form.csrf_token));
                assert!(form.errors.is_empty());
            }
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn show_redirects_to_current_step() {
        let (_, orchestrator) = setup(MemoryStore::default());
        // Ledger before preferences goes back.
        assert_eq!(
            orchestrator.show(&ctx(), OnboardingStep::Ledger).await.unwrap(),
            StepOutcome::Redirect("/onboarding/preferences")
        );

        let raw = submission(&orchestrator, &[("language", "en"), ("currency", "usd")]);
        orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap();

        // Finished preferences goes forward.
        assert_eq!(
            orchestrator
                .show(&ctx(), OnboardingStep::Preferences)
                .await
                .unwrap(),
            StepOutcome::Redirect("/onboarding/ledger")
        );
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_storage_error() {
        let (_, orchestrator) = setup(MemoryStore {
            fail_writes: true,
            ..Default::default()
        });
        let raw = submission(&orchestrator, &[("language", "en"), ("currency", "usd")]);
        let err = orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Storage(_)));
    }

    #[tokio::test]
    async fn rejected_form_echoes_only_step_fields() {
        let (_, orchestrator) = setup(MemoryStore::default());
        let raw = submission(&orchestrator, &[("language", "fr"), ("currency", "usd")]);
        let err = orchestrator
            .submit(&ctx(), OnboardingStep::Preferences, &raw)
            .await
            .unwrap_err();

        let form = orchestrator.rejected_form(&ctx(), OnboardingStep::Preferences, &raw, &err);
        assert_eq!(form.value("language"), "fr");
        assert_eq!(form.value("currency"), "usd");
        assert!(!form.values.contains_key(orchestrator.guard().csrf_field()));
        assert_eq!(form.errors.field("language"), ["Invalid option"]);
    }

    #[tokio::test]
    async fn guard_rejection_form_is_generic() {
        let (_, orchestrator) = setup(MemoryStore::default());
        let raw = HashMap::new();
        for err in [OnboardingError::ForgeryRejected, OnboardingError::AutomationSuspected] {
            let form = orchestrator.rejected_form(&ctx(), OnboardingStep::Ledger, &raw, &err);
            assert_eq!(form.errors.form(), [GENERIC_REJECTION]);
            assert_eq!(form.errors.field_names().count(), 0);
        }
    }
}
