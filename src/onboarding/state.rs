//! Onboarding state machine: tracks which step the subject is on.

use serde::{Deserialize, Serialize};

/// A form-backed step of the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Preferences,
    Ledger,
}

impl OnboardingStep {
    /// URL path the step is served on.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Preferences => "/onboarding/preferences",
            Self::Ledger => "/onboarding/ledger",
        }
    }

    /// The state a subject must be in to submit this step.
    pub fn awaiting_state(&self) -> OnboardingState {
        match self {
            Self::Preferences => OnboardingState::AwaitingPreferences,
            Self::Ledger => OnboardingState::AwaitingLedger,
        }
    }

    /// Where a successful submission sends the subject.
    pub fn success_redirect(&self) -> &'static str {
        self.awaiting_state()
            .next()
            .map(|state| state.path())
            .unwrap_or(DASHBOARD_PATH)
    }

    /// Page title for the step's form.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Preferences => "Set Your Preferences",
            Self::Ledger => "Create your first ledger",
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preferences => "preferences",
            Self::Ledger => "ledger",
        };
        write!(f, "{s}")
    }
}

/// Exit of the funnel.
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Position of a subject in the funnel.
///
/// Progresses linearly: AwaitingPreferences → AwaitingLedger → Complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingState {
    AwaitingPreferences,
    AwaitingLedger,
    Complete,
}

impl OnboardingState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: OnboardingState) -> bool {
        use OnboardingState::*;
        matches!(
            (self, target),
            (AwaitingPreferences, AwaitingLedger) | (AwaitingLedger, Complete)
        )
    }

    /// Whether onboarding is done.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Get the next state in the linear progression, if any.
    pub fn next(&self) -> Option<OnboardingState> {
        use OnboardingState::*;
        match self {
            AwaitingPreferences => Some(AwaitingLedger),
            AwaitingLedger => Some(Complete),
            Complete => None,
        }
    }

    /// The step this state is waiting on.
    pub fn step(&self) -> Option<OnboardingStep> {
        match self {
            Self::AwaitingPreferences => Some(OnboardingStep::Preferences),
            Self::AwaitingLedger => Some(OnboardingStep::Ledger),
            Self::Complete => None,
        }
    }

    /// URL the subject belongs on while in this state.
    pub fn path(&self) -> &'static str {
        self.step().map(|s| s.path()).unwrap_or(DASHBOARD_PATH)
    }

    /// Stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPreferences => "awaiting_preferences",
            Self::AwaitingLedger => "awaiting_ledger",
            Self::Complete => "complete",
        }
    }

    /// Infer progress from which step records exist.
    ///
    /// Used when a subject has no stored state row yet. A ledger without
    /// preferences still counts as awaiting preferences.
    pub fn from_records(has_preferences: bool, has_ledger: bool) -> Self {
        match (has_preferences, has_ledger) {
            (false, _) => Self::AwaitingPreferences,
            (true, false) => Self::AwaitingLedger,
            (true, true) => Self::Complete,
        }
    }
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self::AwaitingPreferences
    }
}

impl std::fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OnboardingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_preferences" => Ok(Self::AwaitingPreferences),
            "awaiting_ledger" => Ok(Self::AwaitingLedger),
            "complete" => Ok(Self::Complete),
            other => Err(format!("unknown onboarding state: {other}")),
        }
    }
}
