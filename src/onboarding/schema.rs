//! Per-step form schemas.
//!
//! Validation is a pure function of the raw form fields: it never touches
//! storage and it collects every field error instead of stopping at the first.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::state::OnboardingStep;

/// Shortest ledger name accepted, after trimming.
pub const LEDGER_NAME_MIN: usize = 3;
/// Longest ledger name accepted, after trimming.
pub const LEDGER_NAME_MAX: usize = 50;

/// Display language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ne,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::En, Language::Ne];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ne => "ne",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Ne => "Nepali",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Self::En),
            "ne" => Ok(Self::Ne),
            _ => Err(()),
        }
    }
}

/// Ledger currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Usd,
    Npr,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Usd, Currency::Npr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Npr => "npr",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Npr => "NPR",
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "usd" => Ok(Self::Usd),
            "npr" => Ok(Self::Npr),
            _ => Err(()),
        }
    }
}

/// Validated preferences step submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesInput {
    pub language: Language,
    pub currency: Currency,
}

/// Validated ledger step submission. `name` is already trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerInput {
    pub name: String,
}

/// Typed result of validating one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedPayload {
    Preferences(PreferencesInput),
    Ledger(LedgerInput),
}

/// Field-scoped and form-level error messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
    form: Vec<String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a message to a field.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Attach a message to the form as a whole.
    pub fn add_form(&mut self, message: impl Into<String>) {
        self.form.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.form.is_empty()
    }

    /// Messages for one field (empty slice if none).
    pub fn field(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn form(&self) -> &[String] {
        &self.form
    }

    /// Names of fields carrying at least one error.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = self.form.clone();
        for (field, messages) in &self.fields {
            parts.push(format!("{field}: {}", messages.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Validate the raw fields of a step submission.
pub fn validate(
    step: OnboardingStep,
    raw: &HashMap<String, String>,
) -> Result<ValidatedPayload, FieldErrors> {
    match step {
        OnboardingStep::Preferences => validate_preferences(raw).map(ValidatedPayload::Preferences),
        OnboardingStep::Ledger => validate_ledger(raw).map(ValidatedPayload::Ledger),
    }
}

/// Both `language` and `currency` must be present and in their closed sets.
pub fn validate_preferences(raw: &HashMap<String, String>) -> Result<PreferencesInput, FieldErrors> {
    let mut errors = FieldErrors::new();
    let language = closed_choice::<Language>(raw, "language", "Language is required", &mut errors);
    let currency = closed_choice::<Currency>(raw, "currency", "Currency is required", &mut errors);

    match (language, currency) {
        (Some(language), Some(currency)) if errors.is_empty() => {
            Ok(PreferencesInput { language, currency })
        }
        _ => Err(errors),
    }
}

/// `name` is trimmed and must then be 3 to 50 characters long.
pub fn validate_ledger(raw: &HashMap<String, String>) -> Result<LedgerInput, FieldErrors> {
    let mut errors = FieldErrors::new();
    let name = raw.get("name").map(|s| s.trim()).unwrap_or_default();
    let len = name.chars().count();

    if len == 0 {
        errors.add("name", "Name is required");
    } else if len < LEDGER_NAME_MIN {
        errors.add(
            "name",
            format!("Name must be at least {LEDGER_NAME_MIN} characters"),
        );
    } else if len > LEDGER_NAME_MAX {
        errors.add(
            "name",
            format!("Name must be at most {LEDGER_NAME_MAX} characters"),
        );
    }

    if errors.is_empty() {
        Ok(LedgerInput {
            name: name.to_string(),
        })
    } else {
        Err(errors)
    }
}

fn closed_choice<T: std::str::FromStr>(
    raw: &HashMap<String, String>,
    field: &str,
    required_message: &str,
    errors: &mut FieldErrors,
) -> Option<T> {
    let value = raw.get(field).map(String::as_str).unwrap_or_default();
    if value.trim().is_empty() {
        errors.add(field, required_message);
        return None;
    }
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            errors.add(field, "Invalid option");
            None
        }
    }
}
