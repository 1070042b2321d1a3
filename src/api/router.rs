use axum::{
    http::header::{HeaderValue, ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE, ORIGIN},
    http::{HeaderName, Method, Request, Response},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::api::handlers;
use crate::api::tasks;
use crate::core::{config::Settings, state::AppState};

pub(crate) fn router(state: AppState) -> Router {
    let cors = build_cors_layer(state.settings());
    let api_prefix = state.settings().api().api_prefix.clone();
    let api = Router::new()
        .route("/status", get(handlers::status))
        .nest("/tasks", tasks::router(&state));

    let request_id_header = HeaderName::from_static("x-request-id");
    let request_id_header_for_span = request_id_header.clone();
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(move |request: &Request<_>| {
            let request_id = request
                .headers()
                .get(&request_id_header_for_span)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_response(|response: &Response<axum::body::Body>, latency: Duration, _span: &Span| {
            let status_label = response.status().as_u16().to_string();
            metrics::counter!(
                "http_requests_total",
                "status" => status_label.clone()
            )
            .increment(1);
            metrics::histogram!(
                "http_request_duration_seconds",
                "status" => status_label
            )
            .record(latency.as_secs_f64());
        });

    let mut router: Router<AppState> = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz).head(handlers::healthz))
        .nest(&api_prefix, api)
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(trace_layer)
        .layer(cors);

    if state.settings().telemetry().prometheus_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router.with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins = settings
        .cors()
        .origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            ORIGIN,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([CONTENT_DISPOSITION, HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        // Wildcard origin cannot be combined with allow_credentials
        base.allow_origin(Any)
    } else {
        base.allow_credentials(true)
            .allow_origin(AllowOrigin::list(origins))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    use crate::core::metrics;
    use crate::engines::Language;
    use crate::test_support::{self, FakeEngine};

    #[tokio::test]
    async fn root_returns_service_banner() {
        let ctx = test_support::setup_test_context(vec![FakeEngine::primary("tesseract")]).await;

        let response =
            ctx.app.oneshot(test_support::empty_request(Method::GET, "/")).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = test_support::read_json(response).await;
        assert_eq!(json["message"], "OCR Batch Service");
        assert_eq!(json["status_url"], "/api/status");
    }

    #[tokio::test]
    async fn healthz_reflects_engine_availability() {
        let ctx = test_support::setup_test_context(vec![FakeEngine::fallback("regions")]).await;
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::empty_request(Method::HEAD, "/healthz"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        drop(ctx);

        let ctx =
            test_support::setup_test_context(vec![FakeEngine::primary("tesseract").unavailable()])
                .await;
        let response = ctx
            .app
            .oneshot(test_support::empty_request(Method::GET, "/healthz"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = test_support::read_json(response).await;
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["available_engines"], 0);
    }

    #[tokio::test]
    async fn status_lists_engines_and_task_counts() {
        let ctx = test_support::setup_test_context(vec![
            FakeEngine::primary("tesseract").supporting(&[Language::En, Language::Ko]),
            FakeEngine::backup("vision").unavailable(),
            FakeEngine::fallback("regions"),
        ])
        .await;

        let response = ctx
            .app
            .oneshot(test_support::empty_request(Method::GET, "/api/status"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = test_support::read_json(response).await;
        assert_eq!(json["status"], "ready");
        assert_eq!(json["active_tasks"], 0);
        assert_eq!(json["processing_tasks"], 0);
        assert_eq!(json["max_concurrent_tasks"], 2);
        assert_eq!(json["engines"][0]["name"], "tesseract");
        assert_eq!(json["engines"][0]["kind"], "primary");
        assert_eq!(json["engines"][0]["languages"], serde_json::json!(["en", "ko"]));
        assert_eq!(json["engines"][1]["available"], false);
        assert_eq!(json["engines"][2]["kind"], "fallback");
    }

    #[tokio::test]
    async fn status_is_limited_with_only_the_region_detector() {
        let ctx = test_support::setup_test_context(vec![
            FakeEngine::primary("tesseract").unavailable(),
            FakeEngine::fallback("regions"),
        ])
        .await;

        let response = ctx
            .app
            .oneshot(test_support::empty_request(Method::GET, "/api/status"))
            .await
            .expect("response");
        let json = test_support::read_json(response).await;
        assert_eq!(json["status"], "limited");
    }

    #[tokio::test]
    async fn metrics_disabled_returns_404() {
        let ctx = test_support::setup_test_context(vec![FakeEngine::primary("tesseract")]).await;

        let response = ctx
            .app
            .oneshot(test_support::empty_request(Method::GET, "/metrics"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_enabled_returns_200() {
        let ctx = test_support::setup_test_context_with(
            vec![FakeEngine::primary("tesseract")],
            &[("PROMETHEUS_ENABLED", "1")],
        )
        .await;
        metrics::init(ctx.state.settings()).expect("metrics init");

        let response = ctx
            .app
            .oneshot(test_support::empty_request(Method::GET, "/metrics"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
