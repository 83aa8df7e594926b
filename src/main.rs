use std::sync::Arc;

use anyhow::Context;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use onboard_engine::audit::TracingAuditSink;
use onboard_engine::config::EngineConfig;
use onboard_engine::content::StaticContent;
use onboard_engine::identity::StaticIdentity;
use onboard_engine::onboarding::{OnboardingEngine, OnboardingRouteState, onboarding_routes};
use onboard_engine::store::LibSqlProgressStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();

    let content = StaticContent::from_path(&config.content_path).with_context(|| {
        format!("loading content catalog from {}", config.content_path.display())
    })?;
    let store = LibSqlProgressStore::new_local(&config.db_path)
        .await
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;

    if config.managers.is_empty() {
        tracing::warn!("ONBOARD_MANAGERS is empty; manager-only operations will be refused");
    }
    let identity = StaticIdentity::new(config.managers.clone());

    let engine = OnboardingEngine::new(
        Arc::new(store),
        Arc::new(content),
        Arc::new(identity),
        Arc::new(TracingAuditSink),
    )
    .with_write_retries(config.write_retries);

    let app = onboarding_routes(OnboardingRouteState {
        engine: Arc::new(engine),
    })
    .layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "Onboarding server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
