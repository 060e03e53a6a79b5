//! Device state projection.
//!
//! Every ingestion path that carries an IMEI folds a `DeviceDelta` into the
//! single `devices` row for that IMEI. The store performs the fold as one
//! atomic upsert; `apply` is the in-process fold the test store uses.
//!
//! Rules:
//! - a new device starts `unknown` with `totalSessions = 0`, unless the delta
//!   itself sets a status or opens a session
//! - GPS fixes, heartbeats and logins set `online`; logouts set `offline`
//! - only a login increments `totalSessions` and sets `currentSessionStart`;
//!   a logout clears it
//! - `metadata` is merged shallowly: top-level keys from the delta replace
//!   existing keys, nested objects are not merged

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use crate::records::{Device, DeviceStatus};
use crate::store::{StoreResult, TelemetryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    Start,
    End,
}

impl SessionChange {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDelta {
    pub status: Option<DeviceStatus>,
    pub session: Option<SessionChange>,
    pub last_location: Option<Value>,
    pub last_heartbeat: Option<Value>,
    pub metadata: Map<String, Value>,
}

impl DeviceDelta {
    /// Device was heard from; nothing else changes.
    pub fn seen(metadata: Map<String, Value>) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn location(location: Value, metadata: Map<String, Value>) -> Self {
        Self {
            status: Some(DeviceStatus::Online),
            last_location: Some(location),
            metadata,
            ..Self::default()
        }
    }

    pub fn heartbeat(snapshot: Value, metadata: Map<String, Value>) -> Self {
        Self {
            status: Some(DeviceStatus::Online),
            last_heartbeat: Some(snapshot),
            metadata,
            ..Self::default()
        }
    }

    /// Delta for a session event. Only `login` and `logout` move the state
    /// machine; any other event type just marks the device as seen.
    pub fn session_event(event_type: &str, metadata: Map<String, Value>) -> Self {
        match event_type {
            "login" => Self {
                status: Some(DeviceStatus::Online),
                session: Some(SessionChange::Start),
                metadata,
                ..Self::default()
            },
            "logout" => Self {
                status: Some(DeviceStatus::Offline),
                session: Some(SessionChange::End),
                metadata,
                ..Self::default()
            },
            _ => Self::seen(metadata),
        }
    }
}

/// Fold `delta` into `existing` (or a fresh record) at time `at`.
#[cfg(test)]
pub fn apply(
    existing: Option<Device>,
    imei: &str,
    delta: &DeviceDelta,
    at: chrono::DateTime<Utc>,
) -> Device {
    let mut device = existing.unwrap_or_else(|| Device {
        imei: imei.to_string(),
        status: DeviceStatus::Unknown,
        last_seen: at,
        first_seen: at,
        total_sessions: 0,
        current_session_start: None,
        last_location: None,
        last_heartbeat: None,
        metadata: Value::Object(Map::new()),
    });

    device.last_seen = at;
    if let Some(status) = delta.status {
        device.status = status;
    }
    match delta.session {
        Some(SessionChange::Start) => {
            device.total_sessions += 1;
            device.current_session_start = Some(at);
        }
        Some(SessionChange::End) => device.current_session_start = None,
        None => {}
    }
    if let Some(location) = &delta.last_location {
        device.last_location = Some(location.clone());
    }
    if let Some(heartbeat) = &delta.last_heartbeat {
        device.last_heartbeat = Some(heartbeat.clone());
    }

    let mut merged = match std::mem::take(&mut device.metadata) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in &delta.metadata {
        merged.insert(key.clone(), value.clone());
    }
    device.metadata = Value::Object(merged);

    device
}

/// Upsert the device row for `imei`. Projection failures are returned so the
/// caller can decide whether they fail the request.
pub async fn project(
    store: &dyn TelemetryStore,
    imei: &str,
    delta: DeviceDelta,
) -> StoreResult<Device> {
    let device = store.apply_device_delta(imei, &delta, Utc::now()).await?;
    debug!(
        imei = %imei,
        status = device.status.as_str(),
        total_sessions = device.total_sessions,
        "Device state projected"
    );
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn meta(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn first_contact_creates_unknown_device() {
        let now = Utc::now();
        let device = apply(None, "123", &DeviceDelta::seen(Map::new()), now);
        assert_eq!(device.status, DeviceStatus::Unknown);
        assert_eq!(device.first_seen, now);
        assert_eq!(device.total_sessions, 0);
    }

    #[test]
    fn login_increments_sessions_and_logout_does_not() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        let t2 = t1 + Duration::seconds(5);

        let device = apply(None, "123", &DeviceDelta::session_event("login", Map::new()), t0);
        assert_eq!(device.total_sessions, 1);
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.current_session_start, Some(t0));

        let delta = DeviceDelta::session_event("logout", Map::new());
        let device = apply(Some(device), "123", &delta, t1);
        assert_eq!(device.total_sessions, 1);
        assert_eq!(device.status, DeviceStatus::Offline);
        assert_eq!(device.current_session_start, None);

        let delta = DeviceDelta::session_event("login", Map::new());
        let device = apply(Some(device), "123", &delta, t2);
        assert_eq!(device.total_sessions, 2);
        assert_eq!(device.first_seen, t0);
        assert_eq!(device.last_seen, t2);
    }

    #[test]
    fn heartbeat_and_gps_bring_device_online() {
        let now = Utc::now();
        let device = apply(
            None,
            "123",
            &DeviceDelta::heartbeat(json!({"voltage": 12.1}), Map::new()),
            now,
        );
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.last_heartbeat, Some(json!({"voltage": 12.1})));

        let device = apply(
            Some(device),
            "123",
            &DeviceDelta::location(json!({"latitude": 1.0}), Map::new()),
            now,
        );
        assert_eq!(device.last_location, Some(json!({"latitude": 1.0})));
        assert_eq!(device.last_heartbeat, Some(json!({"voltage": 12.1})));
    }

    #[test]
    fn other_events_leave_status_alone() {
        let now = Utc::now();
        let device = apply(None, "123", &DeviceDelta::session_event("login", Map::new()), now);
        let delta = DeviceDelta::session_event("reboot", Map::new());
        let device = apply(Some(device), "123", &delta, now);
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.total_sessions, 1);
    }

    #[test]
    fn metadata_merge_is_shallow() {
        let now = Utc::now();
        let device = apply(
            None,
            "123",
            &DeviceDelta::seen(meta(json!({"fw": "1.0", "net": {"mcc": 724, "mnc": 5}}))),
            now,
        );
        let device = apply(
            Some(device),
            "123",
            &DeviceDelta::seen(meta(json!({"net": {"mcc": 310}}))),
            now,
        );
        assert_eq!(device.metadata, json!({"fw": "1.0", "net": {"mcc": 310}}));
    }
}
