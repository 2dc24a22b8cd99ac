//! Onboarding funnel: the two steps a new account walks through before
//! reaching the dashboard.
//!
//! A subject first picks a language and currency, then names a first
//! ledger. Each POST goes through the identity gate, the anti-automation
//! guard and schema validation before the store records the step and
//! advances the subject's `OnboardingState`.

pub mod guard;
pub mod identity;
pub mod orchestrator;
pub mod routes;
pub mod schema;
pub mod state;
pub mod views;

pub use guard::AntiAutomationGuard;
pub use identity::{IdentityGate, OnboardingIdentity, RequestContext, SessionLookup};
pub use orchestrator::{StepForm, StepOrchestrator, StepOutcome};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use schema::{Currency, FieldErrors, Language, LedgerInput, PreferencesInput};
pub use state::{OnboardingState, OnboardingStep};
