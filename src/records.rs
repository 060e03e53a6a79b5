//! Record types persisted by the gateway.
//!
//! Every inbound event family is registered once here as an `EventKind`,
//! which owns its table name and (for webhooks) its inbound endpoint. Handlers
//! build the typed record and hand it to the store; nothing redeclares a
//! schema inline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Raw,
    Gps,
    Alarm,
    Heartbeat,
    Session,
    Obd,
    Fuel,
    Temperature,
    TripReport,
    TerminalInfo,
    InstructResponse,
    HubEvent,
    VideoFileList,
    Command,
}

impl EventKind {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Raw => "raw_logs",
            Self::Gps => "gps_logs",
            Self::Alarm => "alarm_logs",
            Self::Heartbeat => "heartbeat_logs",
            Self::Session => "event_logs",
            Self::Obd => "obd_logs",
            Self::Fuel => "fuel_logs",
            Self::Temperature => "temperature_logs",
            Self::TripReport => "trip_reports",
            Self::TerminalInfo => "terminal_info_logs",
            Self::InstructResponse => "instruct_responses",
            Self::HubEvent => "hub_events",
            Self::VideoFileList => "video_file_lists",
            Self::Command => "command_logs",
        }
    }

    /// Inbound webhook path for device-pushed kinds.
    pub const fn endpoint(self) -> Option<&'static str> {
        match self {
            Self::Gps => Some("/api/pushgps"),
            Self::Alarm => Some("/api/pushalarm"),
            Self::Heartbeat => Some("/api/pushhb"),
            Self::Session => Some("/api/pushevent"),
            Self::Obd => Some("/api/pushobd"),
            Self::Fuel => Some("/api/pushoil"),
            Self::Temperature => Some("/api/pushtem"),
            Self::TripReport => Some("/api/pushtripreport"),
            Self::TerminalInfo => Some("/api/pushTerminalTransinfo"),
            Self::InstructResponse => Some("/api/pushInstructResponse"),
            Self::HubEvent => Some("/api/pushlothubEvent"),
            Self::VideoFileList => Some("/api/media/playback/list"),
            Self::Raw | Self::Command => None,
        }
    }

    /// Kinds stored as generic `TelemetryRecord` rows.
    pub const fn is_structured(self) -> bool {
        matches!(
            self,
            Self::Obd
                | Self::Fuel
                | Self::Temperature
                | Self::TripReport
                | Self::TerminalInfo
                | Self::InstructResponse
                | Self::HubEvent
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// ── Catch-all ───────────────────────────────────────────────────────────────

/// Append-only copy of every webhook body as received.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: Option<String>,
    pub endpoint: String,
    pub payload: Value,
    pub content_hash: String,
    /// Set once the typed record is stored. Only processed rows count as
    /// duplicates.
    pub processed: bool,
}

// ── GPS ─────────────────────────────────────────────────────────────────────

/// GeoJSON point. Coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: GeoPointType,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoPointType {
    Point,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            kind: GeoPointType::Point,
            coordinates: [longitude, latitude],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub satellites: Option<i64>,
    pub hdop: Option<f64>,
    pub gps_valid: bool,
    pub location: GeoPoint,
    pub payload: Value,
}

// ── Alarms ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub coordinates: [f64; 2],
}

impl AlarmLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            coordinates: [longitude, latitude],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: String,
    pub alarm_type: String,
    pub alarm_code: String,
    pub msg_class: i64,
    pub severity: Severity,
    pub description: String,
    pub location: Option<AlarmLocation>,
    pub payload: Value,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

// ── Heartbeats and sessions ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: String,
    pub acc_status: bool,
    pub gps_valid: bool,
    pub voltage: Option<f64>,
    pub gsm_signal: Option<i64>,
    pub temperature: Option<f64>,
    pub payload: Value,
}

/// Login/logout (or any other session-level event the hub pushes).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: String,
    pub event_type: String,
    pub payload: Value,
}

// ── Structured telemetry ────────────────────────────────────────────────────

/// Row shape shared by the schema-validated telemetry families.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: String,
    pub kind: EventKind,
    /// Device-reported time, kept verbatim (string or epoch number).
    pub device_time: Option<Value>,
    /// The validated, typed body.
    pub data: Value,
    /// Fields the schema does not know about.
    pub payload: Value,
}

// ── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Sent,
    Delivered,
    Failed,
}

impl CommandStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: String,
    pub command: String,
    pub pro_no: String,
    pub status: CommandStatus,
    pub response: Value,
    pub sent_by: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFileList {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub imei: String,
    pub file_name_list: Vec<String>,
    pub total_files: i64,
}

// ── Device state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unknown,
    Online,
    Offline,
}

impl DeviceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Self::Unknown),
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Current-state projection of a device, keyed by IMEI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub imei: String,
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub total_sessions: i64,
    pub current_session_start: Option<DateTime<Utc>>,
    pub last_location: Option<Value>,
    pub last_heartbeat: Option<Value>,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_point_inverts_axis_order() {
        let point = GeoPoint::new(-23.5, -46.6);
        assert_eq!(point.coordinates, [-46.6, -23.5]);

        let json = serde_json::to_value(point).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"][0], -46.6);
    }

    #[test]
    fn structured_kinds_have_endpoints() {
        for kind in [
            EventKind::Obd,
            EventKind::Fuel,
            EventKind::Temperature,
            EventKind::TripReport,
            EventKind::TerminalInfo,
            EventKind::InstructResponse,
            EventKind::HubEvent,
        ] {
            assert!(kind.is_structured());
            assert!(kind.endpoint().is_some(), "{kind:?} has no endpoint");
        }
        assert!(!EventKind::Gps.is_structured());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [DeviceStatus::Unknown, DeviceStatus::Online, DeviceStatus::Offline] {
            assert_eq!(DeviceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(CommandStatus::parse("bogus"), None);
    }
}
