//! Plain HTTP handlers: liveness and session minting.

use axum::Json;
use serde_json::{Value, json};
use uuid::Uuid;

/// `GET /health`
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// `GET /session/new` — mint an opaque session id for the client to open
/// `/ws/{session_id}` with.
pub async fn new_session() -> Json<Value> {
    Json(json!({ "session_id": Uuid::new_v4().to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health_check().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn new_sessions_are_unique() {
        let Json(a) = new_session().await;
        let Json(b) = new_session().await;
        assert_ne!(a["session_id"], b["session_id"]);
    }
}
