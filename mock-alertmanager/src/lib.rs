//! Minimal in-process mock of the Alertmanager v2 API surface consumed by
//! the MCP runtime: alert listing/grouping, silence CRUD, and status.
//!
//! State is seedable and the last observed request (alert query string,
//! silence POST body) is captured so tests can assert on the wire encoding.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct MockState {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    alerts: Vec<Value>,
    silences: Vec<Value>,
    last_alerts_query: Option<String>,
    last_silence_body: Option<Value>,
}

impl MockState {
    pub async fn seed_alert(&self, alert: Value) {
        self.inner.write().await.alerts.push(alert);
    }

    pub async fn seed_silence(&self, silence: Value) {
        self.inner.write().await.silences.push(silence);
    }

    /// Query string of the most recent `GET /api/v2/alerts`, "" when none.
    pub async fn last_alerts_query(&self) -> Option<String> {
        self.inner.read().await.last_alerts_query.clone()
    }

    /// Body of the most recent `POST /api/v2/silences`.
    pub async fn last_silence_body(&self) -> Option<Value> {
        self.inner.read().await.last_silence_body.clone()
    }
}

pub fn app(state: MockState) -> Router {
    Router::new()
        .route("/api/v2/status", get(status))
        .route("/api/v2/alerts", get(list_alerts))
        .route("/api/v2/alerts/groups", get(alert_groups))
        .route("/api/v2/silences", get(list_silences).post(create_silence))
        .route("/api/v2/silence/{id}", delete(delete_silence))
        .with_state(state)
}

pub async fn run(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

async fn status() -> Json<Value> {
    Json(json!({
        "cluster": { "status": "ready", "peers": [] },
        "versionInfo": { "version": "0.27.0" },
        "uptime": "2026-08-07T00:00:00Z"
    }))
}

async fn list_alerts(State(state): State<MockState>, RawQuery(query): RawQuery) -> Json<Value> {
    let mut inner = state.inner.write().await;
    inner.last_alerts_query = Some(query.unwrap_or_default());
    Json(Value::Array(inner.alerts.clone()))
}

async fn alert_groups(State(state): State<MockState>, RawQuery(_query): RawQuery) -> Json<Value> {
    let inner = state.inner.read().await;
    Json(json!([
        {
            "labels": { "job": "node" },
            "receiver": { "name": "default" },
            "alerts": inner.alerts.clone()
        }
    ]))
}

async fn list_silences(State(state): State<MockState>) -> Json<Value> {
    let inner = state.inner.read().await;
    Json(Value::Array(inner.silences.clone()))
}

async fn create_silence(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let id = Uuid::new_v4().to_string();
    let mut inner = state.inner.write().await;
    inner.last_silence_body = Some(body.clone());

    // Keep the created silence listable so create/list round trips work.
    let mut stored = json!({
        "id": id,
        "status": { "state": "active" }
    });
    if let (Some(stored_map), Some(body_map)) = (stored.as_object_mut(), body.as_object()) {
        for key in ["matchers", "startsAt", "endsAt", "createdBy", "comment"] {
            if let Some(value) = body_map.get(key) {
                stored_map.insert(key.to_string(), value.clone());
            }
        }
    }
    inner.silences.push(stored);

    (StatusCode::OK, Json(json!({ "silenceID": id })))
}

async fn delete_silence(
    State(state): State<MockState>,
    Path(id): Path<String>,
) -> StatusCode {
    let mut inner = state.inner.write().await;
    let before = inner.silences.len();
    inner
        .silences
        .retain(|silence| silence.get("id").and_then(Value::as_str) != Some(id.as_str()));
    if inner.silences.len() < before {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_alerts_are_listed_and_query_is_captured() {
        let state = MockState::default();
        state.seed_alert(json!({"fingerprint": "f1"})).await;

        let response = list_alerts(State(state.clone()), RawQuery(Some("silenced=true".into()))).await;
        assert_eq!(response.0.as_array().unwrap().len(), 1);
        assert_eq!(state.last_alerts_query().await.as_deref(), Some("silenced=true"));
    }

    #[tokio::test]
    async fn delete_distinguishes_known_and_unknown_ids() {
        let state = MockState::default();
        state
            .seed_silence(json!({"id": "s1", "status": {"state": "active"}}))
            .await;

        let ok = delete_silence(State(state.clone()), Path("s1".to_string())).await;
        assert_eq!(ok, StatusCode::OK);

        let missing = delete_silence(State(state), Path("s1".to_string())).await;
        assert_eq!(missing, StatusCode::NOT_FOUND);
    }
}
