//! HTTP trigger server.
//!
//! Lets an external scheduler (a platform cron, cron-job.org, an uptime
//! pinger…) trigger ingest runs over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/cron` | Run if inside the session window. Secret optional. |
//! | `GET` | `/api/trigger` | Run if inside the window, or always with `?force=true`. Secret required. |
//! | `GET` | `/health` | Health check (returns version) |
//!
//! # Authorization
//!
//! `/api/cron` accepts `Authorization: Bearer <secret>` or `?secret=<secret>`
//! and is open when no secret is configured. `/api/trigger` accepts
//! `?secret=<secret>` or an `x-cron-secret` header and refuses to run at all
//! without a configured secret.
//!
//! # Responses
//!
//! Every run endpoint answers JSON with a `success` flag:
//!
//! ```json
//! { "success": true, "total": 37, "saved": 35, "timestamp": "2024-01-25T23:15:30.000Z" }
//! { "success": false, "error": "authentication failed: HTTP 401: ..." }
//! ```

use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::IngestError;
use crate::ingest::IngestService;
use crate::session::{Clock, SessionWindow, SystemClock};

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    service: Arc<IngestService>,
    window: SessionWindow,
    secret: Option<Arc<str>>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(service: Arc<IngestService>, window: SessionWindow, secret: Option<String>) -> Self {
        Self {
            service,
            window,
            secret: secret.map(Arc::from),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn timestamp(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cron", get(handle_cron))
        .route("/api/trigger", get(handle_trigger))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    config: &Config,
    service: Arc<IngestService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let state = AppState::new(
        service,
        config.schedule.window(),
        config.server.secret.clone(),
    );
    if state.secret.is_none() {
        tracing::warn!("no CRON_SECRET configured: /api/cron is open and /api/trigger is disabled");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "trigger server listening");
    println!("chanlog server listening on http://{}", config.server.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// ============ Error response ============

/// A non-200 JSON reply.
struct ApiError {
    status: StatusCode,
    body: Value,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn unauthorized() -> ApiError {
    ApiError {
        status: StatusCode::UNAUTHORIZED,
        body: json!({ "error": "Unauthorized" }),
    }
}

// ============ Shared run logic ============

#[derive(Debug, Default, Deserialize)]
struct TriggerQuery {
    secret: Option<String>,
    force: Option<String>,
}

/// Run the pipeline and shape the JSON reply.
async fn run_and_report(state: &AppState, with_duration: bool) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();

    match state.service.run().await {
        Ok(summary) => {
            let mut body = json!({
                "success": true,
                "total": summary.total,
                "saved": summary.saved,
                "timestamp": state.timestamp(),
            });
            if with_duration {
                body["duration"] = json!(format!("{}ms", started.elapsed().as_millis()));
            }
            Ok(Json(body))
        }
        Err(IngestError::Busy) => Ok(Json(json!({
            "success": true,
            "skipped": true,
            "message": IngestError::Busy.to_string(),
        }))),
        Err(e) => {
            tracing::error!(error = %e, "triggered run failed");
            Err(ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({
                    "success": false,
                    "error": e.to_string(),
                    "timestamp": state.timestamp(),
                }),
            })
        }
    }
}

// ============ GET /api/cron ============

async fn handle_cron(
    State(state): State<AppState>,
    Query(query): Query<TriggerQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if let Some(secret) = state.secret.as_deref() {
        let bearer_ok = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {}", secret));
        let query_ok = query.secret.as_deref() == Some(secret);
        if !bearer_ok && !query_ok {
            tracing::warn!("unauthorized /api/cron request");
            return Err(unauthorized());
        }
    }

    if !state.window.contains(state.clock.now()) {
        return Ok(Json(json!({
            "success": true,
            "message": "Outside the monitoring window",
            "schedule": state.window.describe(),
        })));
    }

    run_and_report(&state, false).await
}

// ============ GET /api/trigger ============

async fn handle_trigger(
    State(state): State<AppState>,
    Query(query): Query<TriggerQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let Some(secret) = state.secret.as_deref() else {
        tracing::error!("/api/trigger called but CRON_SECRET is not configured");
        return Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "error": "CRON_SECRET not configured" }),
        });
    };

    let provided = query.secret.clone().or_else(|| {
        headers
            .get("x-cron-secret")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    if provided.as_deref() != Some(secret) {
        tracing::warn!("unauthorized /api/trigger request");
        return Err(unauthorized());
    }

    let force = query.force.as_deref() == Some("true");
    let now = state.clock.now();
    if !force && !state.window.contains(now) {
        return Ok(Json(json!({
            "success": true,
            "skipped": true,
            "message": "Outside the monitoring window",
            "currentTime": state.window.local_clock(now),
            "schedule": state.window.describe(),
        })));
    }

    run_and_report(&state, true).await
}

// ============ GET /health ============

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::MessageSource;
    use crate::models::RawMessage;
    use crate::session::{ManualClock, SessionResolver};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use tower::ServiceExt;

    struct OnePage(Option<IngestError>);

    #[async_trait]
    impl MessageSource for OnePage {
        async fn fetch_page(
            &self,
            _limit: usize,
            _after: Option<&str>,
        ) -> crate::error::Result<Vec<RawMessage>> {
            match &self.0 {
                Some(IngestError::Auth(msg)) => Err(IngestError::Auth(msg.clone())),
                Some(_) => Err(IngestError::Api {
                    status: 500,
                    body: "boom".into(),
                }),
                None => Ok(vec![
                    RawMessage::new("2", "`25/01/2024 21:00:02` b"),
                    RawMessage::new("1", "chatter"),
                ]),
            }
        }
    }

    fn local(h: u32) -> DateTime<Utc> {
        FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 25, h, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn app(secret: Option<&str>, now: DateTime<Utc>, failure: Option<IngestError>) -> Router {
        let window = SessionWindow::new(20, 23, 59, -3);
        let clock = Arc::new(ManualClock::new(now));
        let service = IngestService::new(
            Arc::new(OnePage(failure)),
            Arc::new(MemoryStore::new()),
            SessionResolver::new(window),
        )
        .with_clock(clock.clone());
        router(
            AppState::new(Arc::new(service), window, secret.map(str::to_string)).with_clock(clock),
        )
    }

    async fn get(app: Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut req = Request::builder().uri(uri);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let resp = app
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get(app(None, local(21), None), "/health", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_cron_open_without_secret_runs() {
        let (status, body) = get(app(None, local(21), None), "/api/cron", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["total"], 2);
        assert_eq!(body["saved"], 1);
        assert!(body["timestamp"].as_str().unwrap().starts_with("2024-01-26T00:00:00"));
    }

    #[tokio::test]
    async fn test_cron_requires_configured_secret() {
        let (status, body) = get(app(Some("s3cret"), local(21), None), "/api/cron", &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_cron_accepts_bearer_or_query_secret() {
        let (status, _) = get(
            app(Some("s3cret"), local(21), None),
            "/api/cron",
            &[("authorization", "Bearer s3cret")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get(
            app(Some("s3cret"), local(21), None),
            "/api/cron?secret=s3cret",
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cron_outside_window_does_not_run() {
        let (status, body) = get(app(None, local(10), None), "/api/cron", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["schedule"], "20:00 - 23:59");
        assert!(body.get("total").is_none());
    }

    #[tokio::test]
    async fn test_cron_run_failure_is_500_json() {
        let failure = Some(IngestError::Auth("HTTP 401: expired".into()));
        let (status, body) = get(app(None, local(21), failure), "/api/cron", &[]).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_trigger_without_configured_secret_is_500() {
        let (status, body) = get(app(None, local(21), None), "/api/trigger", &[]).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "CRON_SECRET not configured");
    }

    #[tokio::test]
    async fn test_trigger_rejects_wrong_secret() {
        let (status, _) = get(
            app(Some("s3cret"), local(21), None),
            "/api/trigger?secret=nope",
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trigger_with_header_secret_runs() {
        let (status, body) = get(
            app(Some("s3cret"), local(21), None),
            "/api/trigger",
            &[("x-cron-secret", "s3cret")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["saved"], 1);
        assert!(body["duration"].as_str().unwrap().ends_with("ms"));
    }

    #[tokio::test]
    async fn test_trigger_outside_window_skips_unless_forced() {
        let (status, body) = get(
            app(Some("s3cret"), local(10), None),
            "/api/trigger?secret=s3cret",
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skipped"], true);
        assert_eq!(body["currentTime"], "10:00");

        let (status, body) = get(
            app(Some("s3cret"), local(10), None),
            "/api/trigger?secret=s3cret&force=true",
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
    }
}
