//! Error types for Ledger Hub.

use crate::onboarding::schema::FieldErrors;
use crate::onboarding::state::OnboardingState;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    /// A step transition lost its compare-and-set against the stored state.
    #[error("Step transition rejected: subject is at {current}")]
    StaleState { current: OnboardingState },
}

/// Errors raised while moving a request through the onboarding pipeline.
///
/// `ForgeryRejected` and `AutomationSuspected` render identically to the
/// client; only the logs tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("No authenticated session for the required identity level")]
    Unauthenticated,

    #[error("Subject {subject_id} already has an account")]
    AccountExists { subject_id: String },

    #[error("Anti-forgery token missing or invalid")]
    ForgeryRejected,

    #[error("Honeypot field was filled in")]
    AutomationSuspected,

    #[error("Submission failed validation: {0}")]
    ValidationFailed(FieldErrors),

    #[error("Step submitted out of order, subject is at {current}")]
    StepConflict { current: OnboardingState },

    #[error("Storage failure: {0}")]
    Storage(DatabaseError),
}

impl From<DatabaseError> for OnboardingError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::StaleState { current } => Self::StepConflict { current },
            other => Self::Storage(other),
        }
    }
}

impl OnboardingError {
    /// Whether this error came from the anti-automation guard.
    pub fn is_guard_rejection(&self) -> bool {
        matches!(self, Self::ForgeryRejected | Self::AutomationSuspected)
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
