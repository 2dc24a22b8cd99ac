//! Plain HTML pages for the funnel. Markup only, no decisions.

use super::guard::AntiAutomationGuard;
use super::orchestrator::StepForm;
use super::schema::{Currency, Language};
use super::state::OnboardingStep;
use crate::store::Ledger;

/// Escape text for use in HTML bodies and attribute values.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n\
         <body>\n<main>\n{body}\n</main>\n</body>\n</html>\n",
        escape(title)
    )
}

fn error_list(messages: &[String], id: &str) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let items: String = messages
        .iter()
        .map(|m| format!("<li>{}</li>", escape(m)))
        .collect();
    format!("<ul class=\"errors\" id=\"{id}\" role=\"alert\">{items}</ul>")
}

fn selector(form: &StepForm, name: &str, label: &str, placeholder: &str, options: &[(&str, &str)]) -> String {
    let current = form.value(name);
    let options: String = options
        .iter()
        .map(|(value, text)| {
            let selected = if *value == current { " selected" } else { "" };
            format!("<option value=\"{value}\"{selected}>{}</option>", escape(text))
        })
        .collect();
    let errors = form.errors.field(name);
    let invalid = if errors.is_empty() { "" } else { " aria-invalid=\"true\"" };
    format!(
        "<label for=\"{name}\">{label}</label>\n\
         <select id=\"{name}\" name=\"{name}\" required{invalid}>\
         <option value=\"\">{placeholder}</option>{options}</select>\n{}",
        error_list(errors, &format!("{name}-errors"))
    )
}

fn step_fields(form: &StepForm) -> String {
    match form.step {
        OnboardingStep::Preferences => {
            let languages: Vec<(&str, &str)> =
                Language::ALL.iter().map(|l| (l.as_str(), l.label())).collect();
            let currencies: Vec<(&str, &str)> =
                Currency::ALL.iter().map(|c| (c.as_str(), c.label())).collect();
            format!(
                "{}\n{}",
                selector(form, "language", "Language", "Select a language", &languages),
                selector(form, "currency", "Currency", "Select a currency", &currencies)
            )
        }
        OnboardingStep::Ledger => {
            let errors = form.errors.field("name");
            let invalid = if errors.is_empty() { "" } else { " aria-invalid=\"true\"" };
            format!(
                "<label for=\"name\">Ledger name</label>\n\
                 <input id=\"name\" name=\"name\" type=\"text\" minlength=\"3\" maxlength=\"50\" \
                 required value=\"{}\"{invalid}>\n{}",
                escape(form.value("name")),
                error_list(errors, "name-errors")
            )
        }
    }
}

/// Render a step's form, including anti-forgery and honeypot inputs.
pub fn render_step(form: &StepForm, guard: &AntiAutomationGuard) -> String {
    let heading = match form.step {
        OnboardingStep::Preferences => "Choose your preferences",
        OnboardingStep::Ledger => "Create your first ledger",
    };
    let honeypot = guard.honeypot_field();
    let body = format!(
        "<h1>{heading}</h1>\n\
         <form id=\"onboarding-form\" method=\"POST\" action=\"{action}\">\n\
         {form_errors}\n\
         <input type=\"hidden\" name=\"{csrf}\" value=\"{token}\">\n\
         <div style=\"display:none\" aria-hidden=\"true\">\
         <label for=\"{honeypot}\">Please leave this field blank</label>\
         <input id=\"{honeypot}\" name=\"{honeypot}\" type=\"text\" autocomplete=\"nope\" tabindex=\"-1\" value=\"\">\
         </div>\n\
         {fields}\n\
         <button type=\"submit\">Submit</button>\n\
         </form>",
        action = form.step.path(),
        form_errors = error_list(form.errors.form(), "form-errors"),
        csrf = escape(guard.csrf_field()),
        token = escape(&form.csrf_token),
        honeypot = escape(honeypot),
        fields = step_fields(form),
    );
    page(form.step.title(), &body)
}

/// Shown to a subject who confirmed an email but has no account yet.
pub fn render_confirm_email(email: &str) -> String {
    let body = format!(
        "<h1>Welcome aboard</h1>\n<p>We are setting up an account for <strong>{}</strong>. \
         Finish signing up to choose your preferences.</p>",
        escape(email)
    );
    page("Ledger Hub | Onboarding", &body)
}

/// Landing page once onboarding is done.
pub fn render_dashboard(email: &str, ledgers: &[Ledger]) -> String {
    let list = if ledgers.is_empty() {
        "<p>You have no ledgers yet.</p>".to_string()
    } else {
        let items: String = ledgers
            .iter()
            .map(|l| format!("<li data-ledger-id=\"{}\">{}</li>", l.id, escape(&l.name)))
            .collect();
        format!("<ul class=\"ledgers\">{items}</ul>")
    };
    let body = format!(
        "<h1>Hello, welcome to Ledger Hub</h1>\n<p>Signed in as {}</p>\n{list}",
        escape(email)
    );
    page("Ledger Hub | Dashboard", &body)
}

/// Generic failure page; never includes error details.
pub fn render_failure() -> String {
    page(
        "Something went wrong",
        "<h1>Something went wrong</h1>\n<p>We could not complete your request. Please try again.</p>",
    )
}
