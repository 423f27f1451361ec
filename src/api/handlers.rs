use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::ingest::Pipeline;
use crate::stats::{MetricsExporter, StatsSnapshot};
use crate::store::TraceSnapshot;

/// Application state shared across handlers
pub struct AppState {
    pub pipeline: Pipeline,
    pub metrics: MetricsExporter,
    pub app_name: String,
    pub env: String,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Stats
// ============================================================================

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.pipeline.stats())
}

// ============================================================================
// Prometheus
// ============================================================================

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================================
// Trace dump
// ============================================================================

#[derive(Serialize)]
pub struct GetAllResponse {
    pub stats: Value,
    pub trace: Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceView {
    pub pid: String,
    pub trace_id: String,
    pub sent_at: DateTime<FixedOffset>,
    pub elapsed_time: String,
    pub trace: Option<Value>,
    pub span: Option<Value>,
    pub context: Option<Value>,
    pub tags: Option<Value>,
}

/// Every active trace plus the collector's counters
pub async fn get_all(State(state): State<Arc<AppState>>) -> Json<GetAllResponse> {
    let now = Utc::now();
    let counts = state.pipeline.stats();

    let stats = serde_json::json!({
        "_": {
            "serverTime": now.to_rfc3339(),
            "appVersion": env!("CARGO_PKG_VERSION"),
            "appName": state.app_name,
            "env": state.env,
        },
        "totalCounts": {
            "traceSet": counts.trace_set,
            "spanSet": counts.span_set,
            "allSpanClose": counts.all_span_close,
            "traceDelete": counts.trace_delete,
            "packagesCaught": counts.packages_caught,
            "packagesParse": counts.packages_parse,
            "packagesRejected": counts.packages_rejected,
            "totalChannelReset": counts.total_channel_reset,
        },
        "gauge": {
            "countActivePid": counts.count_active_pid,
        },
    });

    let trace = state
        .pipeline
        .store()
        .get_all()
        .into_iter()
        .map(|(pid, snapshot)| {
            let view = trace_view(pid.clone(), snapshot, now);
            (pid, serde_json::to_value(view).unwrap_or(Value::Null))
        })
        .collect();

    Json(GetAllResponse { stats, trace })
}

/// Flatten a stored snapshot for display
///
/// Stored payloads are whole packets; the view shows their `data` field.
/// Context and tags fall back to the ones carried by the trace payload.
pub fn trace_view(pid: String, snapshot: TraceSnapshot, now: DateTime<Utc>) -> TraceView {
    let elapsed = now
        .signed_duration_since(snapshot.sent_at.with_timezone(&Utc))
        .to_std()
        .unwrap_or_default();

    let mut trace = snapshot.trace.map(unpack_data);
    let trace_context = trace.as_mut().and_then(|t| take_key(t, "context"));
    let trace_tags = trace.as_mut().and_then(|t| take_key(t, "tags"));

    TraceView {
        pid,
        trace_id: snapshot.trace_id,
        sent_at: snapshot.sent_at,
        elapsed_time: format!("{:?}", elapsed),
        trace,
        span: snapshot.span.map(unpack_data),
        context: snapshot.context.map(unpack_data).or(trace_context),
        tags: snapshot.tags.map(unpack_data).or(trace_tags),
    }
}

fn unpack_data(value: Value) -> Value {
    match value {
        Value::Object(mut object) => match object.remove("data") {
            Some(data) => data,
            None => Value::Object(object),
        },
        other => other,
    }
}

fn take_key(value: &mut Value, key: &str) -> Option<Value> {
    value.as_object_mut().and_then(|object| object.remove(key))
}
