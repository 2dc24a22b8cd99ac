//! HTTP endpoints for the onboarding funnel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use tracing::error;

use super::identity::{IdentityGate, RequestContext};
use super::orchestrator::{StepOrchestrator, StepOutcome};
use super::state::{DASHBOARD_PATH, OnboardingStep};
use super::views;
use crate::error::OnboardingError;
use crate::store::ProgressStore;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub orchestrator: Arc<StepOrchestrator>,
    pub store: Arc<dyn ProgressStore>,
    pub gate: IdentityGate,
    pub login_path: String,
}

impl FromRequestParts<OnboardingRouteState> for RequestContext {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &OnboardingRouteState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = parts
            .headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok());

        state.gate.resolve(cookies).await.map_err(|e| {
            error!(error = %e, "Session lookup failed");
            failure_response()
        })
    }
}

fn failure_response() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Html(views::render_failure())).into_response()
}

/// Percent-encode a URL query component.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn login_redirect(state: &OnboardingRouteState, return_to: &str) -> Response {
    let target = format!("{}?redirectTo={}", state.login_path, encode_component(return_to));
    Redirect::to(&target).into_response()
}

fn outcome_response(state: &OnboardingRouteState, outcome: StepOutcome) -> Response {
    match outcome {
        StepOutcome::Render(form) => {
            Html(views::render_step(&form, state.orchestrator.guard())).into_response()
        }
        StepOutcome::Redirect(path) => Redirect::to(path).into_response(),
    }
}

/// Map a pipeline error onto the response the subject sees.
fn step_error_response(
    state: &OnboardingRouteState,
    ctx: &RequestContext,
    step: OnboardingStep,
    raw: &HashMap<String, String>,
    err: OnboardingError,
) -> Response {
    state.orchestrator.log_error(Some(step), &err);
    match err {
        OnboardingError::Unauthenticated | OnboardingError::AccountExists { .. } => {
            login_redirect(state, step.path())
        }
        OnboardingError::StepConflict { current } => Redirect::to(current.path()).into_response(),
        OnboardingError::ForgeryRejected
        | OnboardingError::AutomationSuspected
        | OnboardingError::ValidationFailed(_) => {
            let form = state.orchestrator.rejected_form(ctx, step, raw, &err);
            (
                StatusCode::OK,
                Html(views::render_step(&form, state.orchestrator.guard())),
            )
                .into_response()
        }
        OnboardingError::Storage(_) => failure_response(),
    }
}

async fn show_step(state: &OnboardingRouteState, ctx: RequestContext, step: OnboardingStep) -> Response {
    match state.orchestrator.show(&ctx, step).await {
        Ok(outcome) => outcome_response(state, outcome),
        Err(err) => step_error_response(state, &ctx, step, &HashMap::new(), err),
    }
}

async fn submit_step(
    state: &OnboardingRouteState,
    ctx: RequestContext,
    step: OnboardingStep,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    // An unreadable body from an anonymous caller still ends at the login redirect.
    let raw = match form {
        Ok(Form(raw)) => raw,
        Err(rejection) if ctx.require_account().is_ok() => return rejection.into_response(),
        Err(_) => HashMap::new(),
    };
    match state.orchestrator.submit(&ctx, step, &raw).await {
        Ok(outcome) => outcome_response(state, outcome),
        Err(err) => step_error_response(state, &ctx, step, &raw, err),
    }
}

/// GET /onboarding/preferences
async fn get_preferences(State(state): State<OnboardingRouteState>, ctx: RequestContext) -> Response {
    show_step(&state, ctx, OnboardingStep::Preferences).await
}

/// POST /onboarding/preferences
async fn post_preferences(
    State(state): State<OnboardingRouteState>,
    ctx: RequestContext,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    submit_step(&state, ctx, OnboardingStep::Preferences, form).await
}

/// GET /onboarding/ledger
async fn get_ledger(State(state): State<OnboardingRouteState>, ctx: RequestContext) -> Response {
    show_step(&state, ctx, OnboardingStep::Ledger).await
}

/// POST /onboarding/ledger
async fn post_ledger(
    State(state): State<OnboardingRouteState>,
    ctx: RequestContext,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    submit_step(&state, ctx, OnboardingStep::Ledger, form).await
}

/// GET /onboarding
///
/// Pre-account subjects get the confirmation page; account holders are
/// sent to whichever step they are on.
async fn get_entry(State(state): State<OnboardingRouteState>, ctx: RequestContext) -> Response {
    match ctx.require_pre_account_email() {
        Ok(email) => Html(views::render_confirm_email(email)).into_response(),
        Err(OnboardingError::AccountExists { subject_id }) => {
            match state.orchestrator.current_state(&subject_id).await {
                Ok(current) => Redirect::to(current.path()).into_response(),
                Err(err) => {
                    state.orchestrator.log_error(None, &err);
                    failure_response()
                }
            }
        }
        Err(_) => login_redirect(&state, "/onboarding"),
    }
}

/// GET /dashboard
async fn get_dashboard(State(state): State<OnboardingRouteState>, ctx: RequestContext) -> Response {
    let Ok(subject_id) = ctx.require_account() else {
        return login_redirect(&state, DASHBOARD_PATH);
    };
    let email = ctx.identity().map(|i| i.email.as_str()).unwrap_or_default();

    match state.store.list_ledgers(subject_id).await {
        Ok(ledgers) => Html(views::render_dashboard(email, &ledgers)).into_response(),
        Err(e) => {
            error!(subject_id, error = %e, "Failed to load ledgers");
            failure_response()
        }
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ledger-hub-onboarding"
    }))
}

/// Build the onboarding routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/onboarding", get(get_entry))
        .route(
            "/onboarding/preferences",
            get(get_preferences).post(post_preferences),
        )
        .route("/onboarding/ledger", get(get_ledger).post(post_ledger))
        .route(DASHBOARD_PATH, get(get_dashboard))
        .with_state(state)
}
