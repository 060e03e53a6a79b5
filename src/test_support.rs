//! Router-level test harness: in-memory store plus a mocked hub.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::config::Config;
use crate::hub::CommandRelay;
use crate::store::memory::MemoryStore;
use crate::AppState;

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "IOT_HUB_API_KEY" => Some("test-key".to_string()),
        "SERVER_DOMAIN" => Some("gw.test".to_string()),
        "PROVISION_PACING_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub fn new(relay: impl CommandRelay + 'static) -> Self {
        Self::with_config(test_config(), relay)
    }

    pub fn with_config(config: Config, relay: impl CommandRelay + 'static) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState {
            config: Arc::new(config),
            store: store.clone(),
            relay: Arc::new(relay),
        };
        Self {
            router: crate::router(state),
            store,
        }
    }
}

/// Send a JSON request and decode the JSON response.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    send_raw(router, method, uri, &body).await
}

pub async fn send_raw(
    router: &Router,
    method: Method,
    uri: &str,
    body: &str,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}
