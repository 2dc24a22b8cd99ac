use std::sync::Arc;

use ledger_hub::config::OnboardingConfig;
use ledger_hub::onboarding::{
    AntiAutomationGuard, IdentityGate, OnboardingRouteState, StepOrchestrator, onboarding_routes,
};
use ledger_hub::store::{LibSqlBackend, ProgressStore};

#[tokio::main]
async fn main() -> ledger_hub::error::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env()?;

    eprintln!("📒 Ledger Hub v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Onboarding: http://0.0.0.0:{}/onboarding", config.port);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let backend = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    let store: Arc<dyn ProgressStore> = backend.clone();

    // ── Onboarding pipeline ──────────────────────────────────────────────
    let guard = AntiAutomationGuard::new(&config);
    let orchestrator = Arc::new(StepOrchestrator::new(Arc::clone(&store), guard));
    let gate = IdentityGate::new(backend, config.session_cookie.clone());

    let app = onboarding_routes(OnboardingRouteState {
        orchestrator,
        store,
        gate,
        login_path: config.login_path.clone(),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Onboarding server started");
    axum::serve(listener, app).await?;

    Ok(())
}
