use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::core::metrics;
use crate::core::state::AppState;
use crate::schemas::{
    EngineStatusResponse, HealthResponse, RootResponse, ServiceStatusResponse,
};

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let response = RootResponse {
        message: state.settings().api().service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status_url: format!("{}/status", state.settings().api().api_prefix),
    };

    Json(response)
}

pub(crate) async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let available_engines =
        state.engines().descriptors().iter().filter(|engine| engine.available).count();
    let (status, label) = if available_engines > 0 {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status,
        Json(HealthResponse { service: "ocr-batch".to_string(), status: label, available_engines }),
    )
}

pub(crate) async fn status(State(state): State<AppState>) -> Json<ServiceStatusResponse> {
    let counts = state.store().counts();

    Json(ServiceStatusResponse {
        status: state.engines().service_level(),
        engines: state
            .engines()
            .descriptors()
            .into_iter()
            .map(EngineStatusResponse::from)
            .collect(),
        active_tasks: counts.total,
        processing_tasks: counts.processing,
        max_concurrent_tasks: state.admission().max_concurrent(),
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
