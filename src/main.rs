use std::sync::Arc;

use anyhow::Context;
use scribe_onboarding::collaborators::{MockServices, OnboardingServices};
use scribe_onboarding::config::OnboardingConfig;
use scribe_onboarding::onboarding::{OnboardingRouteState, OnboardingSessions, onboarding_routes};
use scribe_onboarding::store::{Database, LibSqlBackend};
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env().context("invalid configuration")?;

    eprintln!("🎙️  Scribe onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   REST: http://0.0.0.0:{}/api/onboarding/sessions", config.port);
    eprintln!("   WS:   ws://0.0.0.0:{}/api/onboarding/sessions/{{id}}/ws", config.port);
    eprintln!(
        "   Mock services: {} ms latency, SSO failure {:.0}%, calendar failure {:.0}%",
        config.collaborators.latency.as_millis(),
        config.collaborators.sso_failure_rate * 100.0,
        config.collaborators.calendar_failure_rate * 100.0,
    );
    eprintln!(
        "   Step gates: {}",
        if config.enforce_gates { "enforced" } else { "off" }
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Option<Arc<dyn Database>> = match &config.db_path {
        Some(path) => {
            let backend = LibSqlBackend::new_local(path)
                .await
                .with_context(|| format!("failed to open database at {}", path.display()))?;
            eprintln!("   Database: {}", path.display());
            Some(Arc::new(backend))
        }
        None => {
            eprintln!("   Database: none (sessions are kept in memory)");
            None
        }
    };

    // ── Sessions ─────────────────────────────────────────────────────────
    let services: Arc<dyn OnboardingServices> =
        Arc::new(MockServices::new(config.collaborators.clone()));
    let sessions = Arc::new(OnboardingSessions::new(&config, services, db));

    let app = onboarding_routes(OnboardingRouteState { sessions }).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Onboarding server started");
    axum::serve(listener, app).await?;

    Ok(())
}
