//! Ledger Hub: onboarding funnel.

pub mod config;
pub mod error;
pub mod onboarding;
pub mod store;
