pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod engines;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::shutdown::ShutdownTrigger;
use crate::core::{config::Settings, state::AppState, telemetry};
use crate::engines::EngineRegistry;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let engines = engines::from_settings(&settings)?;
    let registry = EngineRegistry::probe(engines, settings.engines().probe_timeout()).await;
    for descriptor in registry.descriptors() {
        tracing::info!(
            engine = descriptor.name,
            kind = descriptor.kind.as_str(),
            available = descriptor.available,
            languages = ?descriptor.languages,
            "Engine probed"
        );
    }
    if !registry.any_available() {
        tracing::error!("No OCR engine is available; submissions will be refused");
    }

    let state = AppState::new(settings, Arc::new(registry));

    let (trigger, shutdown_rx) = ShutdownTrigger::new();
    let retention = state.settings().retention();
    let janitor = tokio::spawn(tasks::janitor::run(
        state.store().clone(),
        retention.retention_window(),
        retention.janitor_interval(),
        shutdown_rx,
    ));

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        max_concurrent_tasks = state.admission().max_concurrent(),
        "OCR batch service listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    trigger.fire();
    if let Err(err) = janitor.await {
        tracing::warn!(error = %err, "Janitor task ended abnormally");
    }

    result?;

    Ok(())
}
