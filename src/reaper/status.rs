//! Worker status source
//!
//! The reaper asks a [`StatusSource`] for the state of every worker process
//! on each cycle. The production source reads the FPM status page, which
//! reports `{"processes": [{"pid": 123, "state": "Idle", ...}, ...]}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// State of one worker as reported by the status source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(default)]
    pub state: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkerStatus {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Worker id -> reported status
pub type WorkerStatuses = HashMap<String, WorkerStatus>;

/// Something that can report worker states on demand
pub trait StatusSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<WorkerStatuses, StatusError>> + Send;
}

/// Reads worker states from an FPM status endpoint over HTTP
#[derive(Debug, Clone)]
pub struct FpmStatusClient {
    http_client: reqwest::Client,
    url: String,
}

impl FpmStatusClient {
    /// Build a client with its own request timeout
    ///
    /// Certificate verification is disabled.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, StatusError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| StatusError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

impl StatusSource for FpmStatusClient {
    fn fetch(&self) -> impl Future<Output = Result<WorkerStatuses, StatusError>> + Send {
        async move {
            let response = self
                .http_client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| StatusError::Network(e.to_string()))?;

            if !response.status().is_success() {
                return Err(StatusError::Remote(format!(
                    "status page returned {}",
                    response.status()
                )));
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| StatusError::Deserialization(e.to_string()))?;

            tracing::trace!(body = %body, "FPM status response");

            parse_fpm_status(body)
        }
    }
}

#[derive(Debug, Deserialize)]
struct FpmStatusPage {
    processes: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Index an FPM status document by worker pid
pub fn parse_fpm_status(body: serde_json::Value) -> Result<WorkerStatuses, StatusError> {
    let page: FpmStatusPage =
        serde_json::from_value(body).map_err(|e| StatusError::Deserialization(e.to_string()))?;

    let mut statuses = WorkerStatuses::with_capacity(page.processes.len());
    for mut process in page.processes {
        let pid = match process.get("pid") {
            Some(serde_json::Value::Number(n)) => match n.as_u64() {
                Some(pid) => pid.to_string(),
                None => n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string()),
            },
            Some(serde_json::Value::String(s)) => s.clone(),
            other => {
                return Err(StatusError::Deserialization(format!(
                    "process entry has no usable pid: {:?}",
                    other
                )))
            }
        };
        let state = match process.remove("state") {
            Some(serde_json::Value::String(s)) => s,
            _ => String::new(),
        };
        statuses.insert(
            pid,
            WorkerStatus {
                state,
                extra: process,
            },
        );
    }

    Ok(statuses)
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_fpm_status() {
        let body = serde_json::json!({
            "pool": "www",
            "processes": [
                {"pid": 2905890, "state": "Running", "request uri": "/v3.0/car-address"},
                {"pid": 2905891, "state": "Idle"},
                {"pid": "2905892", "state": "Idle"}
            ]
        });

        let statuses = parse_fpm_status(body).unwrap();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses["2905890"].state, "Running");
        assert_eq!(
            statuses["2905890"].extra["request uri"],
            serde_json::json!("/v3.0/car-address")
        );
        assert_eq!(statuses["2905891"].state, "Idle");
        assert_eq!(statuses["2905892"].state, "Idle");
    }

    #[test]
    fn test_parse_fpm_status_requires_processes() {
        let body = serde_json::json!({"pool": "www"});
        assert!(matches!(
            parse_fpm_status(body),
            Err(StatusError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_from_http_endpoint() {
        let app = Router::new().route(
            "/status",
            get(|| async {
                Json(serde_json::json!({
                    "processes": [{"pid": 42, "state": "Idle"}]
                }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            FpmStatusClient::new(format!("http://{}/status", addr), Duration::from_secs(3)).unwrap();
        let statuses = client.fetch().await.unwrap();

        assert_eq!(statuses["42"].state, "Idle");
    }

    #[tokio::test]
    async fn test_fetch_reports_network_errors() {
        // Nothing listens on port 9 of localhost in the test environment
        let client =
            FpmStatusClient::new("http://127.0.0.1:9/status", Duration::from_secs(1)).unwrap();

        assert!(matches!(
            client.fetch().await,
            Err(StatusError::Network(_))
        ));
    }
}
