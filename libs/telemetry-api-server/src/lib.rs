mod error;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use telemetry_engine::TelemetryService;

#[derive(Clone)]
struct AppState {
    service: Arc<TelemetryService>,
}

/// Routes of the telemetry HTTP API.
///
/// ```text
/// GET  /health
/// GET  /api/spacecraft/{spacecraft_name}/{journey_id}/instruments/{kind}?pagesize=&pagestate=
/// POST /api/spacecraft/{spacecraft_name}/{journey_id}/instruments/{kind}
/// ```
pub fn router(service: Arc<TelemetryService>, max_body_bytes: usize) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(http::handle_health))
        .route(
            "/api/spacecraft/{spacecraft_name}/{journey_id}/instruments/{kind}",
            get(http::handle_query).post(http::handle_ingest),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Telemetry HTTP API server. Returns once `shutdown` is cancelled and
/// in-flight requests have drained.
pub async fn run(
    bind: &str,
    port: u16,
    service: Arc<TelemetryService>,
    max_body_bytes: usize,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let app = router(service, max_body_bytes);

    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .map_err(|e| format!("bind api {bind}:{port}: {e}"))?;
    let addr: SocketAddr = listener
        .local_addr()
        .map_err(|e| format!("api local addr: {e}"))?;
    tracing::info!(%addr, "telemetry api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    tracing::info!("telemetry api stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use storage_memory::MemoryStore;
    use telemetry_api::{
        CursorCodec, InstrumentKind, PartitionKey, Reading, ScanPage, ScanPosition, StoreError, TelemetryStore,
    };
    use telemetry_engine::ServiceSettings;
    use tower::ServiceExt;

    use super::*;

    const JOURNEY: &str = "abb7c000-c310-11ac-8080-808080808080";
    const TEMPERATURE_URI: &str = "/api/spacecraft/gemini3/abb7c000-c310-11ac-8080-808080808080/instruments/temperature";

    fn app_over(store: Arc<dyn TelemetryStore>, max_body_bytes: usize) -> Router {
        let service = TelemetryService::new(store, CursorCodec::new(b"test"), ServiceSettings::default()).unwrap();
        router(Arc::new(service), max_body_bytes)
    }

    fn app() -> Router {
        app_over(Arc::new(MemoryStore::new()), 1 << 20)
    }

    fn temperature(secs: u32, value: f64) -> Value {
        json!({
            "spacecraftName": "gemini3",
            "journeyId": JOURNEY,
            "timestamp": format!("2024-01-01T00:00:{secs:02}Z"),
            "temperature": value,
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post(app: &Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap();
        send(app, request).await
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get(&app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ingested_reading_is_queryable() {
        let app = app();
        let reading = temperature(0, 21.5);

        let (status, body) = post(&app, TEMPERATURE_URI, json!([reading]).to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");

        let (status, body) = get(&app, &format!("{TEMPERATURE_URI}?pagesize=10")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "items": [reading] }));
    }

    #[tokio::test]
    async fn pagestate_chains_pages() {
        let app = app();
        let readings: Vec<_> = (0..3).map(|i| temperature(i, 20.0 + i as f64)).collect();
        post(&app, TEMPERATURE_URI, json!(readings).to_string()).await;

        let (_, first) = get(&app, &format!("{TEMPERATURE_URI}?pagesize=2")).await;
        assert_eq!(first["items"].as_array().unwrap().len(), 2);
        let state = first["pagestate"].as_str().unwrap();

        let (status, second) = get(&app, &format!("{TEMPERATURE_URI}?pagesize=2&pagestate={state}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["items"], json!([readings[2]]));
        assert!(second.get("pagestate").is_none());
    }

    #[tokio::test]
    async fn unknown_instrument_is_not_found() {
        let uri = format!("/api/spacecraft/gemini3/{JOURNEY}/instruments/humidity");
        let (status, body) = get(&app(), &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_instrument");
    }

    #[tokio::test]
    async fn malformed_arguments_are_bad_requests() {
        let app = app();
        let cases = [
            ("/api/spacecraft/gemini3/not-a-uuid/instruments/speed".to_string(), "invalid_argument"),
            (format!("{TEMPERATURE_URI}?pagesize=ten"), "invalid_argument"),
            (format!("{TEMPERATURE_URI}?pagesize=0"), "invalid_argument"),
            (format!("{TEMPERATURE_URI}?pagestate=bm90LWEtY3Vyc29y"), "invalid_cursor"),
        ];
        for (uri, code) in cases {
            let (status, body) = get(&app, &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["code"], code, "{uri}");
        }
    }

    #[tokio::test]
    async fn bad_reading_rejects_batch_and_reports_index() {
        let app = app();
        let batch = json!([temperature(0, 20.0), temperature(1, -500.0)]);

        let (status, body) = post(&app, TEMPERATURE_URI, batch.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "invalid_reading");
        assert_eq!(body["index"], 1);

        let (_, page) = get(&app, TEMPERATURE_URI).await;
        assert_eq!(page["items"], json!([]));
    }

    #[tokio::test]
    async fn reading_for_another_journey_is_rejected() {
        let mut reading = temperature(0, 20.0);
        reading["journeyId"] = json!("00000000-0000-0000-0000-000000000001");

        let (status, body) = post(&app(), TEMPERATURE_URI, json!([reading]).to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "invalid_reading");
        assert_eq!(body["index"], 0);
    }

    #[tokio::test]
    async fn non_array_body_is_a_bad_request() {
        let (status, body) = post(&app(), TEMPERATURE_URI, r#"{"temperature": 1}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn absent_batch_is_accepted_without_touching_the_store() {
        let app = app_over(Arc::new(DownStore), 1 << 20);

        for body in ["", "null", "  \n", "[]"] {
            let (status, reply) = post(&app, TEMPERATURE_URI, body).await;
            assert_eq!(status, StatusCode::OK, "body {body:?}");
            assert_eq!(reply, b"OK");
        }

        let (status, _) = post(&app, "/api/spacecraft/gemini3/not-a-uuid/instruments/temperature", "null").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let app = app_over(Arc::new(MemoryStore::new()), 64);
        let batch = json!((0..10).map(|i| temperature(i, 1.0)).collect::<Vec<_>>());

        let (status, _) = post(&app, TEMPERATURE_URI, batch.to_string()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    struct DownStore;

    impl TelemetryStore for DownStore {
        fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn scan(
            &self,
            _kind: InstrumentKind,
            _partition: &PartitionKey,
            _after: Option<ScanPosition>,
            _limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<ScanPage, StoreError>> + Send + '_>> {
            Box::pin(async { Err(StoreError::Unavailable("disk offline".into())) })
        }

        fn batch_append(&self, _readings: &[Reading]) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            Box::pin(async { Err(StoreError::Unavailable("disk offline".into())) })
        }

        fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn read_your_writes(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn store_outage_is_service_unavailable() {
        let app = app_over(Arc::new(DownStore), 1 << 20);

        let (status, body) = get(&app, TEMPERATURE_URI).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "store_unavailable");

        let (status, _) = post(&app, TEMPERATURE_URI, json!([temperature(0, 1.0)]).to_string()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
