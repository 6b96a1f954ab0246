use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::routes::{health, jobs, scheduler, tasks};
use crate::state::AppState;

/// Dashboard origins allowed when wildcard CORS is off
const DASHBOARD_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

pub fn create_app(state: AppState, cors_allow_any: bool) -> Router {
    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/scheduler", scheduler::router())
        .nest("/api/jobs", jobs::router())
        .nest("/api/tasks", tasks::router())
        .layer(cors(cors_allow_any))
        .with_state(state)
}

fn cors(allow_any: bool) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if allow_any {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(DASHBOARD_ORIGINS.map(HeaderValue::from_static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = create_app(test_support::state(Duration::from_millis(10)), false);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_cors_allows_dashboard_origin() {
        let app = create_app(test_support::state(Duration::from_millis(10)), false);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/scheduler")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn test_graceful_shutdown_with_open_stream() {
        let state = test_support::state(Duration::from_millis(10));
        let scheduler = state.scheduler.clone();
        let app = create_app(state, false);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                    scheduler.stop().await.unwrap();
                })
                .await
        });

        let mut stream = reqwest::get(format!("http://{}/api/scheduler/stream", addr)).await.unwrap();
        assert_eq!(stream.status(), reqwest::StatusCode::OK);
        assert!(stream.chunk().await.unwrap().is_some());

        stop_tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(3), server).await;
        assert!(finished.is_ok(), "server kept serving the open stream");
        drop(stream);
    }
}
