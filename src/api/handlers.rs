use axum::{
    extract::{Path, Query, State},
    response::Html,
    Json,
};
use chrono::Utc;
use tokio::fs;
use utoipa::OpenApi;

use super::{
    dto::{HealthDto, LogAckDto, LogEntryDto, LogParams, SeriesDto},
    errors::AppError,
    AppState,
};
use crate::broadcast::BroadcastMessage;

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Record a single reading, stamped with the server's current time, and
/// push it to every live WebSocket subscriber.
#[utoipa::path(
    get,
    path = "/log",
    params(LogParams),
    responses(
        (status = 200, description = "Reading stored", body = LogAckDto),
        (status = 400, description = "Missing or malformed query parameters"),
        (status = 422, description = "Value is not a finite number"),
    ),
    tag = "ingest"
)]
pub async fn log_reading(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<Json<LogAckDto>, AppError> {
    let reading = state
        .service
        .record(&params.endereco, params.temperatura)
        .await?;
    Ok(Json(reading.into()))
}

/// Record a batch of readings under one shared timestamp.
/// Every reading is stored; only the last one is echoed back.
#[utoipa::path(
    post,
    path = "/log",
    request_body = Vec<LogEntryDto>,
    responses(
        (status = 200, description = "Batch stored; last reading echoed", body = LogAckDto),
        (status = 422, description = "Empty batch, malformed body or non-finite value"),
    ),
    tag = "ingest"
)]
pub async fn log_batch(
    State(state): State<AppState>,
    Json(entries): Json<Vec<LogEntryDto>>,
) -> Result<Json<LogAckDto>, AppError> {
    let items: Vec<(String, f64)> = entries
        .into_iter()
        .map(|e| (e.endereco, e.temperatura))
        .collect();
    let reading = state.service.record_batch(&items).await?;
    Ok(Json(reading.into()))
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Retained history for every sensor that still has samples.
#[utoipa::path(
    get,
    path = "/dados",
    responses(
        (status = 200, description = "Retained history per sensor", body = Vec<SeriesDto>),
    ),
    tag = "history"
)]
pub async fn get_all_series(State(state): State<AppState>) -> Json<Vec<SeriesDto>> {
    let snapshots = state.service.store().snapshot_all(Utc::now()).await;
    Json(snapshots.into_iter().map(Into::into).collect())
}

/// Retained history for a single sensor.
#[utoipa::path(
    get,
    path = "/dados/{endereco}",
    params(
        ("endereco" = String, Path, description = "Sensor identifier"),
    ),
    responses(
        (status = 200, description = "Retained history", body = SeriesDto),
        (status = 404, description = "No retained samples for this sensor"),
    ),
    tag = "history"
)]
pub async fn get_series(
    State(state): State<AppState>,
    Path(endereco): Path<String>,
) -> Result<Json<SeriesDto>, AppError> {
    state
        .service
        .store()
        .series(&endereco, Utc::now())
        .await
        .map(|s| Json(s.into()))
        .ok_or_else(|| AppError::NotFound(format!("no retained samples for sensor {endereco:?}")))
}

// ---------------------------------------------------------------------------
// Page & health
// ---------------------------------------------------------------------------

/// Serves the dashboard page. The file is read on every request.
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let page = fs::read_to_string(&state.index_html_path).await.map_err(|e| {
        tracing::warn!(path = %state.index_html_path.display(), error = %e, "Index page unavailable");
        AppError::NotFound("index page not found".to_owned())
    })?;
    Ok(Html(page))
}

/// Returns `200 OK` with `{"status":"ok"}` and a few live counters.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthDto),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok".to_owned(),
        sensors: state.service.store().len().await,
        subscribers: state.service.hub().len().await,
    })
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(log_reading, log_batch, get_all_series, get_series, health),
    components(schemas(LogEntryDto, LogAckDto, SeriesDto, HealthDto, BroadcastMessage)),
    tags(
        (name = "ingest",  description = "Reading intake"),
        (name = "history", description = "Retained sensor history"),
        (name = "system",  description = "System endpoints"),
    ),
    info(
        title = "Sensor Relay API",
        version = "0.1.0",
        description = "Sensor reading intake, recent history and live WebSocket fan-out at /ws"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};

    use crate::{
        api::{router, AppState},
        broadcast::BroadcastHub,
        ingest::IngestService,
        series::{CoalescePolicy, RetentionPolicy, StorePolicy},
        series_store::SeriesStore,
    };

    fn test_state(policy: StorePolicy) -> AppState {
        let service = IngestService::new(SeriesStore::new(policy), BroadcastHub::default(), false);
        AppState {
            service,
            index_html_path: PathBuf::from("frontend/index.html"),
        }
    }

    fn test_server(state: AppState) -> TestServer {
        TestServer::new(router(state)).unwrap()
    }

    // -----------------------------------------------------------------------
    // GET /log
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn log_returns_acknowledgement() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server
            .get("/log")
            .add_query_param("endereco", "sensor_1")
            .add_query_param("temperatura", 21.5)
            .await;
        resp.assert_status_ok();

        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["endereco"], "sensor_1");
        assert_eq!(body["temperatura"], 21.5);
        assert!(body["time"].is_string());
    }

    #[tokio::test]
    async fn log_broadcasts_to_subscribers() {
        let state = test_state(StorePolicy::default());
        let mut sub = state.service.hub().subscribe().await;
        let server = test_server(state);

        server
            .get("/log")
            .add_query_param("endereco", "sensor_1")
            .add_query_param("temperatura", 18.0)
            .await
            .assert_status_ok();

        let pushed: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["endereco"], "sensor_1");
        assert_eq!(pushed["temperatura"], 18.0);
        assert!(pushed["data"].is_string());
    }

    #[tokio::test]
    async fn log_rejects_non_finite_values() {
        let server = test_server(test_state(StorePolicy::default()));
        for raw in ["NaN", "inf", "-inf"] {
            let resp = server
                .get("/log")
                .add_query_param("endereco", "sensor_1")
                .add_query_param("temperatura", raw)
                .expect_failure()
                .await;
            resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
            let body: Value = resp.json();
            assert!(body["error"].as_str().unwrap().contains("finite"));
        }

        let all: Value = server.get("/dados").await.json();
        assert_eq!(all, json!([]));
    }

    #[tokio::test]
    async fn log_missing_parameter_is_a_client_error() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server
            .get("/log")
            .add_query_param("endereco", "sensor_1")
            .expect_failure()
            .await;
        resp.assert_status_bad_request();
    }

    #[tokio::test]
    async fn log_non_numeric_value_is_a_client_error() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server
            .get("/log")
            .add_query_param("endereco", "sensor_1")
            .add_query_param("temperatura", "warm")
            .expect_failure()
            .await;
        resp.assert_status_bad_request();
    }

    // -----------------------------------------------------------------------
    // POST /log
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn batch_acknowledges_last_entry_and_stores_all() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server
            .post("/log")
            .json(&json!([
                { "endereco": "a", "temperatura": 1.0 },
                { "endereco": "b", "temperatura": 2.0 },
            ]))
            .await;
        resp.assert_status_ok();
        let ack: Value = resp.json();
        assert_eq!(ack["endereco"], "b");
        assert_eq!(ack["temperatura"], 2.0);

        let all: Vec<Value> = server.get("/dados").await.json();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server.post("/log").json(&json!([])).expect_failure().await;
        resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json();
        assert!(body["error"].as_str().unwrap().contains("at least one"));
    }

    #[tokio::test]
    async fn batch_with_out_of_range_value_stores_nothing() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server
            .post("/log")
            .content_type("application/json")
            .bytes(r#"[{"endereco": "a", "temperatura": 1.0}, {"endereco": "b", "temperatura": 1e999}]"#.into())
            .expect_failure()
            .await;
        assert!(resp.status_code().is_client_error());

        let all: Value = server.get("/dados").await.json();
        assert_eq!(all, json!([]));
    }

    #[tokio::test]
    async fn batch_uses_plateau_coalescing_when_configured() {
        let server = test_server(test_state(StorePolicy {
            retention: RetentionPolicy::MaxCount(1000),
            coalesce: CoalescePolicy::PlateauEqual,
        }));
        let entries: Vec<Value> = (0..4)
            .map(|_| json!({ "endereco": "s1", "temperatura": 5.0 }))
            .collect();
        for entry in entries {
            server.post("/log").json(&json!([entry])).await.assert_status_ok();
        }

        let all: Vec<Value> = server.get("/dados").await.json();
        assert_eq!(all[0]["temperatura"].as_array().unwrap().len(), 3);
    }

    // -----------------------------------------------------------------------
    // GET /dados
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dados_empty_returns_empty_array() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server.get("/dados").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn dados_returns_parallel_lists_oldest_first() {
        let server = test_server(test_state(StorePolicy::default()));
        for v in [20.0, 21.0, 22.0] {
            server
                .get("/log")
                .add_query_param("endereco", "sensor_1")
                .add_query_param("temperatura", v)
                .await
                .assert_status_ok();
        }

        let body: Vec<Value> = server.get("/dados").await.json();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0]["endereco"], "sensor_1");
        assert_eq!(body[0]["temperatura"], json!([20.0, 21.0, 22.0]));
        let data = body[0]["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert!(data[0].as_str().unwrap() <= data[1].as_str().unwrap());
        assert!(data[1].as_str().unwrap() <= data[2].as_str().unwrap());
    }

    #[tokio::test]
    async fn single_series_lookup() {
        let server = test_server(test_state(StorePolicy::default()));
        server
            .get("/log")
            .add_query_param("endereco", "sensor_1")
            .add_query_param("temperatura", 19.5)
            .await
            .assert_status_ok();

        let found: Value = server.get("/dados/sensor_1").await.json();
        assert_eq!(found["temperatura"], json!([19.5]));

        server
            .get("/dados/unknown")
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    // -----------------------------------------------------------------------
    // GET /ws
    // -----------------------------------------------------------------------

    async fn wait_for_subscribers(hub: &BroadcastHub, expected: usize) {
        for _ in 0..200 {
            if hub.len().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} subscribers, found {}", hub.len().await);
    }

    #[tokio::test]
    async fn ws_subscriber_receives_readings_until_closed() {
        let state = test_state(StorePolicy::default());
        let hub = state.service.hub().clone();
        let server = TestServer::builder()
            .http_transport()
            .build(router(state))
            .unwrap();

        let mut websocket = server.get_websocket("/ws").await.into_websocket().await;
        wait_for_subscribers(&hub, 1).await;

        server
            .get("/log")
            .add_query_param("endereco", "s1")
            .add_query_param("temperatura", 2.5)
            .await
            .assert_status_ok();

        let pushed: Value = serde_json::from_str(&websocket.receive_text().await).unwrap();
        assert_eq!(pushed["endereco"], "s1");
        assert_eq!(pushed["temperatura"], 2.5);
        assert!(pushed["data"].is_string());

        websocket.close().await;
        wait_for_subscribers(&hub, 0).await;
    }

    // -----------------------------------------------------------------------
    // GET /, /health, /api-docs/openapi.json
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn missing_index_page_is_not_found() {
        let mut state = test_state(StorePolicy::default());
        state.index_html_path = PathBuf::from("does/not/exist.html");
        let server = test_server(state);
        server.get("/").expect_failure().await.assert_status_not_found();
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let state = test_state(StorePolicy::default());
        let _sub = state.service.hub().subscribe().await;
        let server = test_server(state);
        server
            .get("/log")
            .add_query_param("endereco", "sensor_1")
            .add_query_param("temperatura", 1.0)
            .await
            .assert_status_ok();

        let body: Value = server.get("/health").await.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sensors"], 1);
        assert_eq!(body["subscribers"], 1);
    }

    #[tokio::test]
    async fn openapi_spec_is_served() {
        let server = test_server(test_state(StorePolicy::default()));
        let resp = server.get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "Sensor Relay API");
        assert!(body["paths"]["/dados"].is_object());
    }
}
