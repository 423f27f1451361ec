use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{get_all, health_check, metrics, stats, AppState};
use crate::supervisor::{ShutdownSignal, TaskResult};

/// Build the debug router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/getall.json", get(get_all))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the debug endpoints until shutdown
pub async fn run_server(addr: &str, state: Arc<AppState>, mut shutdown: ShutdownSignal) -> TaskResult {
    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("HTTP server started on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Pipeline;
    use crate::stats::{MetricLabels, MetricsExporter};
    use crate::store::TraceStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn create_state() -> Arc<AppState> {
        let pipeline = Pipeline::new(Arc::new(TraceStore::new()));
        let labels = MetricLabels {
            node: "node-1".to_string(),
            app: "test-app".to_string(),
            env: "test".to_string(),
        };
        let metrics = MetricsExporter::new(
            Arc::clone(pipeline.store().counters()),
            Arc::clone(pipeline.counters()),
            labels,
        )
        .unwrap();
        Arc::new(AppState {
            pipeline,
            metrics,
            app_name: "test-app".to_string(),
            env: "test".to_string(),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get_json(build_router(create_state()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_stats() {
        let state = create_state();
        state.pipeline.process_packet(
            0,
            br#"{"method":"init-trace","sentAt":"2023-04-10T14:04:31.367337+03:00","pid":"1","traceId":"t","data":{}}"#.to_vec(),
        );

        let (status, body) = get_json(build_router(state), "/stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["traceSet"], 1);
        assert_eq!(body["packagesParse"], 1);
        assert_eq!(body["countActivePid"], 1);
    }

    #[tokio::test]
    async fn test_get_all() {
        let state = create_state();
        state.pipeline.process_packet(
            0,
            br#"{"method":"init-trace","sentAt":"2023-04-10T14:04:31.367337+03:00","pid":"2905890","traceId":"t1","data":{"uri":"/","tags":[]}}"#.to_vec(),
        );

        let (status, body) = get_json(build_router(state), "/getall.json").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["gauge"]["countActivePid"], 1);
        assert_eq!(body["stats"]["_"]["appName"], "test-app");
        let trace = &body["trace"]["2905890"];
        assert_eq!(trace["traceId"], "t1");
        assert_eq!(trace["trace"]["uri"], "/");
        assert_eq!(trace["tags"], serde_json::json!([]));
        assert!(trace["span"].is_null());
    }

    #[tokio::test]
    async fn test_metrics() {
        let state = create_state();
        state.pipeline.process_packet(
            0,
            br#"{"method":"init-trace","sentAt":"2023-04-10T14:04:31.367337+03:00","pid":"1","traceId":"t","data":{}}"#.to_vec(),
        );

        let response = build_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            prometheus::TEXT_FORMAT
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        let active = text
            .lines()
            .find(|line| line.starts_with("trace_monitor_count_active_pid{"))
            .unwrap();
        assert!(active.contains(r#"node="node-1""#));
        assert!(active.ends_with(" 1"));
        assert!(text.contains("trace_monitor_total_packages_parse{"));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = get_json(build_router(create_state()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
