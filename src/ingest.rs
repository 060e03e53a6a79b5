//! Shared front half of every webhook: body extraction and the raw log.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::normalize;
use crate::records::{EventKind, RawLog};
use crate::store::StoreResult;
use crate::AppState;

/// A JSON object body. Anything else (malformed JSON, arrays, scalars) is a
/// 400 rather than an opaque extractor rejection.
#[derive(Debug, Clone)]
pub struct JsonBody(pub Map<String, Value>);

impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::PayloadTooLarge
            } else {
                ApiError::bad_request(rejection.body_text())
            }
        })?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(_) => Err(ApiError::bad_request("JSON body must be an object")),
            Err(_) => Err(ApiError::bad_request("Malformed JSON body")),
        }
    }
}

/// Handle on the raw log row written for an admitted body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub raw_log_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Fresh(Receipt),
    /// Same body already processed on this endpoint; nothing was written.
    Duplicate,
}

/// SHA-256 of the body's canonical serialization, hex encoded.
pub fn content_hash(body: &Map<String, Value>) -> String {
    // serde_json maps are key-ordered, so equal objects serialize identically.
    let canonical = Value::Object(body.clone()).to_string();
    hex::encode(&Sha256::digest(canonical.as_bytes()))
}

/// Append `body` to the raw log before any type-specific processing.
///
/// With deduplication on, a body already processed for the same endpoint is
/// reported as `Duplicate` and not logged again. Rows stay unprocessed until
/// [`complete`] runs, so a rejected or failed request can be redelivered.
pub async fn admit(
    state: &AppState,
    kind: EventKind,
    body: &Map<String, Value>,
) -> StoreResult<Admission> {
    admit_at(state, kind.endpoint().unwrap_or_else(|| kind.table()), body).await
}

/// [`admit`] for handlers mounted on more than one path.
pub async fn admit_at(
    state: &AppState,
    endpoint: &str,
    body: &Map<String, Value>,
) -> StoreResult<Admission> {
    let hash = content_hash(body);
    let imei = normalize::device_id(body);

    if state.config.webhook_dedup && state.store.raw_log_seen(endpoint, &hash).await? {
        info!(endpoint, imei = ?imei, "Duplicate webhook ignored");
        return Ok(Admission::Duplicate);
    }

    let id = Uuid::new_v4();
    state
        .store
        .insert_raw_log(&RawLog {
            id,
            timestamp: chrono::Utc::now(),
            imei,
            endpoint: endpoint.to_string(),
            payload: Value::Object(body.clone()),
            content_hash: hash,
            processed: false,
        })
        .await?;

    debug!(endpoint, "Raw webhook logged");
    Ok(Admission::Fresh(Receipt { raw_log_id: id }))
}

/// Mark an admitted body as fully processed.
///
/// The request already succeeded; a failure here only means a redelivery
/// would be stored again, so it is logged rather than returned.
pub async fn complete(state: &AppState, receipt: Receipt) {
    if let Err(e) = state.store.mark_raw_log_processed(receipt.raw_log_id).await {
        error!(raw_log_id = %receipt.raw_log_id, error = %e, "Failed to mark raw log processed");
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
