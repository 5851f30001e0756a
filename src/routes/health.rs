//! Liveness endpoints
//!
//! - /ping            - Plain `pong`
//! - /health, /healthz - Service and store connection status
//!
//! Neither touches the store. `/health` reports the connection handle's
//! state as last observed, so it stays fast while the store is down.

use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::db::HandleState;
use crate::routes::respond::{json_response, text_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "ok" while the process is serving
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub node_id: String,
    /// "development" or "production"
    pub mode: &'static str,
    pub database: DatabaseHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseHealth {
    pub state: HandleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Connect episodes started since boot
    pub episodes: u64,
    pub db_name: String,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let args = &state.args;

    HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        node_id: args.node_id.to_string(),
        mode: if args.dev_mode {
            "development"
        } else {
            "production"
        },
        database: DatabaseHealth {
            state: state.db.state(),
            last_error: state.db.last_error().map(|e| e.to_string()),
            episodes: state.db.episodes(),
            db_name: state.db.config().db_name.clone(),
        },
    }
}

/// GET /ping
pub fn ping() -> Response<BoxBody> {
    text_response(StatusCode::OK, "pong")
}

/// GET /health
///
/// Always 200 while the process runs; callers that need the store should
/// check `database.state`.
pub fn health_check(state: &AppState) -> Response<BoxBody> {
    json_response(StatusCode::OK, &build_health_response(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use http_body_util::BodyExt;

    use crate::config::Args;

    fn test_state() -> AppState {
        let args = Args::try_parse_from([
            "spendbook",
            "--mongodb-uri",
            "mongodb://127.0.0.1:27017",
            "--dev-mode",
        ])
        .unwrap();
        AppState::new(args).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let response = ping();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn test_health_reports_unconnected_store_without_io() {
        let state = test_state();
        let response = health_check(&state);
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mode"], "development");
        assert_eq!(body["database"]["state"], "unconnected");
        assert_eq!(body["database"]["episodes"], 0);
        assert_eq!(body["database"]["dbName"], "spendbook");
        assert!(body["database"].get("lastError").is_none());
    }
}
