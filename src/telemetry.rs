//! Schema-validated telemetry webhooks.
//!
//! Each family deserializes into a typed report, is checked with `garde`,
//! and lands in its own table as a `TelemetryRecord`. Fields the report
//! does not declare are kept as the row's passthrough payload.

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use garde::Validate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, FieldError, StructuredError};
use crate::ingest::{self, Admission, JsonBody};
use crate::projector::{self, DeviceDelta};
use crate::records::{CommandStatus, EventKind, TelemetryRecord};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pushobd", post(receive::<ObdReport>))
        .route("/pushoil", post(receive::<FuelReport>))
        .route("/pushtem", post(receive::<TemperatureReport>))
        .route("/pushtripreport", post(receive::<TripReport>))
        .route("/pushTerminalTransinfo", post(receive::<TerminalInfoReport>))
        .route("/pushInstructResponse", post(receive_instruct_response))
        .route("/pushlothubEvent", post(receive::<HubEventReport>))
}

// ── Shared pieces ──────────────────────────────────────────────────────────

/// Device identifier fields common to every report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHeader {
    #[garde(length(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[garde(length(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_imei: Option<String>,
}

impl DeviceHeader {
    fn resolve(&self) -> Option<&str> {
        self.imei.as_deref().or(self.device_imei.as_deref())
    }
}

/// Device-reported time: an ISO string or an epoch number, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceTime {
    Epoch(serde_json::Number),
    Text(String),
}

impl DeviceTime {
    fn to_value(&self) -> Value {
        match self {
            Self::Epoch(n) => Value::Number(n.clone()),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

trait TelemetryReport: DeserializeOwned + Serialize + Validate<Context = ()> + Send + 'static {
    const KIND: EventKind;
    /// Success message returned to the sender.
    const RECEIVED: &'static str;

    fn header(&self) -> &DeviceHeader;
    fn device_time(&self) -> Option<&DeviceTime>;
    fn extra(&self) -> &Map<String, Value>;

    /// Fields worth copying onto the device record.
    fn device_metadata(&self) -> Map<String, Value> {
        Map::new()
    }
}

// ── Reports ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ObdReport {
    #[serde(flatten)]
    #[garde(dive)]
    pub device: DeviceHeader,
    #[garde(skip)]
    pub timestamp: Option<DeviceTime>,
    #[garde(dive)]
    pub obd: Option<ObdData>,
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ObdData {
    #[garde(range(min = 0.0))]
    pub speed: Option<f64>,
    #[garde(range(min = 0.0))]
    pub rpm: Option<f64>,
    #[garde(skip)]
    pub engine_temp: Option<f64>,
    #[garde(range(min = 0.0, max = 100.0))]
    pub fuel_level: Option<f64>,
    #[garde(range(min = 0.0, max = 100.0))]
    pub engine_load: Option<f64>,
    #[garde(range(min = 0.0, max = 100.0))]
    pub throttle_position: Option<f64>,
    #[garde(skip)]
    pub dtc_codes: Option<Vec<String>>,
    #[garde(length(min = 1))]
    pub vin: Option<String>,
    #[garde(range(min = 0.0))]
    pub mileage: Option<f64>,
}

impl TelemetryReport for ObdReport {
    const KIND: EventKind = EventKind::Obd;
    const RECEIVED: &'static str = "OBD data received and processed";

    fn header(&self) -> &DeviceHeader {
        &self.device
    }
    fn device_time(&self) -> Option<&DeviceTime> {
        self.timestamp.as_ref()
    }
    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
    fn device_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        if let Some(vin) = self.obd.as_ref().and_then(|o| o.vin.clone()) {
            meta.insert("vin".into(), json!(vin));
        }
        meta
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FuelReport {
    #[serde(flatten)]
    #[garde(dive)]
    pub device: DeviceHeader,
    #[garde(skip)]
    pub timestamp: Option<DeviceTime>,
    /// Percent of tank.
    #[garde(range(min = 0.0, max = 100.0))]
    pub fuel_level: Option<f64>,
    /// Litres.
    #[garde(range(min = 0.0))]
    pub fuel_volume: Option<f64>,
    #[garde(skip)]
    pub fuel_temperature: Option<f64>,
    /// L/100km.
    #[garde(range(min = 0.0))]
    pub fuel_consumption: Option<f64>,
    #[garde(length(min = 1))]
    pub fuel_type: Option<String>,
    #[garde(range(min = 0.0))]
    pub tank_capacity: Option<f64>,
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,
}

impl TelemetryReport for FuelReport {
    const KIND: EventKind = EventKind::Fuel;
    const RECEIVED: &'static str = "Fuel data received and processed";

    fn header(&self) -> &DeviceHeader {
        &self.device
    }
    fn device_time(&self) -> Option<&DeviceTime> {
        self.timestamp.as_ref()
    }
    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    C,
    F,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureSensor {
    #[garde(length(min = 1))]
    pub sensor_id: String,
    #[garde(skip)]
    pub temperature: f64,
    #[garde(skip)]
    pub unit: Option<TemperatureUnit>,
    #[garde(skip)]
    pub threshold: Option<Threshold>,
    #[garde(skip)]
    pub alert: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureReport {
    #[serde(flatten)]
    #[garde(dive)]
    pub device: DeviceHeader,
    #[garde(skip)]
    pub timestamp: Option<DeviceTime>,
    #[garde(dive)]
    pub sensors: Option<Vec<TemperatureSensor>>,
    // Single-sensor devices report flat fields instead of `sensors`.
    #[garde(skip)]
    pub temperature: Option<f64>,
    #[garde(length(min = 1))]
    pub sensor_id: Option<String>,
    #[garde(skip)]
    pub unit: Option<TemperatureUnit>,
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,
}

impl TelemetryReport for TemperatureReport {
    const KIND: EventKind = EventKind::Temperature;
    const RECEIVED: &'static str = "Temperature data received and processed";

    fn header(&self) -> &DeviceHeader {
        &self.device
    }
    fn device_time(&self) -> Option<&DeviceTime> {
        self.timestamp.as_ref()
    }
    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TripLocation {
    #[garde(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[garde(range(min = -180.0, max = 180.0))]
    pub lng: f64,
    #[garde(skip)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TripReport {
    #[serde(flatten)]
    #[garde(dive)]
    pub device: DeviceHeader,
    #[garde(length(min = 1))]
    pub trip_id: Option<String>,
    #[garde(skip)]
    pub start_time: DeviceTime,
    #[garde(skip)]
    pub end_time: DeviceTime,
    /// Seconds.
    #[garde(range(min = 0.0))]
    pub duration: Option<f64>,
    #[garde(range(min = 0.0))]
    pub distance: Option<f64>,
    #[garde(range(min = 0.0))]
    pub max_speed: Option<f64>,
    #[garde(range(min = 0.0))]
    pub avg_speed: Option<f64>,
    #[garde(dive)]
    pub start_location: Option<TripLocation>,
    #[garde(dive)]
    pub end_location: Option<TripLocation>,
    #[garde(skip)]
    pub driver_name: Option<String>,
    #[garde(skip)]
    pub driver_id: Option<String>,
    #[garde(range(min = 0.0))]
    pub fuel_consumption: Option<f64>,
    #[garde(range(min = 0.0))]
    pub idle_time: Option<f64>,
    #[garde(skip)]
    pub harsh_braking: Option<f64>,
    #[garde(skip)]
    pub harsh_acceleration: Option<f64>,
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,
}

impl TelemetryReport for TripReport {
    const KIND: EventKind = EventKind::TripReport;
    const RECEIVED: &'static str = "Trip report received and processed";

    fn header(&self) -> &DeviceHeader {
        &self.device
    }
    fn device_time(&self) -> Option<&DeviceTime> {
        Some(&self.start_time)
    }
    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DigitalPort {
    #[garde(skip)]
    pub port: i64,
    #[garde(skip)]
    pub state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnalogInput {
    #[garde(skip)]
    pub port: i64,
    #[garde(skip)]
    pub value: f64,
    #[garde(skip)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfoReport {
    #[serde(flatten)]
    #[garde(dive)]
    pub device: DeviceHeader,
    #[garde(skip)]
    pub timestamp: Option<DeviceTime>,
    #[garde(skip)]
    pub external_voltage: Option<f64>,
    #[garde(skip)]
    pub internal_voltage: Option<f64>,
    #[garde(skip)]
    pub gsm_signal: Option<f64>,
    #[garde(skip)]
    pub gps_signal: Option<f64>,
    #[garde(range(min = 0.0))]
    pub satellite_count: Option<f64>,
    #[garde(skip)]
    pub temperature: Option<f64>,
    #[garde(range(min = 0.0, max = 100.0))]
    pub humidity: Option<f64>,
    #[garde(range(min = 0.0, max = 100.0))]
    pub battery_level: Option<f64>,
    #[garde(length(min = 1))]
    pub firmware_version: Option<String>,
    #[garde(length(min = 1))]
    pub hardware_version: Option<String>,
    #[garde(dive)]
    pub digital_inputs: Option<Vec<DigitalPort>>,
    #[garde(dive)]
    pub digital_outputs: Option<Vec<DigitalPort>>,
    #[garde(dive)]
    pub analog_inputs: Option<Vec<AnalogInput>>,
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,
}

impl TelemetryReport for TerminalInfoReport {
    const KIND: EventKind = EventKind::TerminalInfo;
    const RECEIVED: &'static str = "Terminal trans info received and processed";

    fn header(&self) -> &DeviceHeader {
        &self.device
    }
    fn device_time(&self) -> Option<&DeviceTime> {
        self.timestamp.as_ref()
    }
    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
    fn device_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        if let Some(v) = &self.firmware_version {
            meta.insert("firmwareVersion".into(), json!(v));
        }
        if let Some(v) = &self.hardware_version {
            meta.insert("hardwareVersion".into(), json!(v));
        }
        if let Some(v) = self.battery_level {
            meta.insert("batteryLevel".into(), json!(v));
        }
        meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructStatus {
    Sent,
    Received,
    Executed,
    Failed,
}

impl InstructStatus {
    /// Command log status implied by this report, if it moves it at all.
    pub fn command_status(self) -> Option<CommandStatus> {
        match self {
            Self::Sent => None,
            Self::Received | Self::Executed => Some(CommandStatus::Delivered),
            Self::Failed => Some(CommandStatus::Failed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InstructResponseReport {
    #[serde(flatten)]
    #[garde(dive)]
    pub device: DeviceHeader,
    #[garde(length(min = 1))]
    pub request_id: String,
    #[garde(skip)]
    pub cmd_type: Option<String>,
    #[garde(skip)]
    pub cmd_content: Option<String>,
    #[garde(skip)]
    pub status: InstructStatus,
    #[garde(skip)]
    pub timestamp: Option<DeviceTime>,
    #[garde(skip)]
    pub response: Option<String>,
    #[garde(skip)]
    pub error_code: Option<String>,
    #[garde(skip)]
    pub error_message: Option<String>,
    /// Milliseconds.
    #[garde(range(min = 0.0))]
    pub execution_time: Option<f64>,
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,
}

impl TelemetryReport for InstructResponseReport {
    const KIND: EventKind = EventKind::InstructResponse;
    const RECEIVED: &'static str = "Command response received and processed";

    fn header(&self) -> &DeviceHeader {
        &self.device
    }
    fn device_time(&self) -> Option<&DeviceTime> {
        self.timestamp.as_ref()
    }
    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubFile {
    #[garde(length(min = 1))]
    pub filename: String,
    #[garde(range(min = 0.0))]
    pub size: Option<f64>,
    /// `image` or `video`.
    #[serde(rename = "type")]
    #[garde(skip)]
    pub kind: Option<String>,
    #[garde(skip)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Started,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UploadStatus {
    #[garde(length(min = 1))]
    pub filename: String,
    #[garde(range(min = 0.0, max = 100.0))]
    pub progress: Option<f64>,
    #[garde(skip)]
    pub status: UploadState,
    #[garde(skip)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HubEventReport {
    #[serde(flatten)]
    #[garde(dive)]
    pub device: DeviceHeader,
    /// `fileListReady`, `uploadStart`, `uploadComplete`, `uploadFailed`, ...
    #[garde(length(min = 1))]
    pub event_type: String,
    #[garde(skip)]
    pub timestamp: Option<DeviceTime>,
    #[garde(skip)]
    pub alarm_id: Option<String>,
    #[garde(dive)]
    pub file_list: Option<Vec<HubFile>>,
    #[garde(dive)]
    pub upload_status: Option<UploadStatus>,
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,
}

impl TelemetryReport for HubEventReport {
    const KIND: EventKind = EventKind::HubEvent;
    const RECEIVED: &'static str = "IotHub event received and processed";

    fn header(&self) -> &DeviceHeader {
        &self.device
    }
    fn device_time(&self) -> Option<&DeviceTime> {
        self.timestamp.as_ref()
    }
    fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────

fn success(message: &str) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn invalid(errors: Vec<FieldError>) -> StructuredError {
    StructuredError(ApiError::Validation {
        message: "Invalid payload format".into(),
        errors,
    })
}

/// Parse and validate `body` as `T`.
fn parse_report<T: TelemetryReport>(
    body: &Map<String, Value>,
) -> Result<(T, String), StructuredError> {
    let report: T = serde_json::from_value(Value::Object(body.clone()))
        .map_err(|e| invalid(vec![FieldError::new("body", e.to_string())]))?;

    report.validate().map_err(|report| {
        invalid(
            report
                .iter()
                .map(|(path, error)| FieldError::new(path.to_string(), error.message()))
                .collect(),
        )
    })?;

    let imei = report
        .header()
        .resolve()
        .map(str::to_string)
        .ok_or_else(|| invalid(vec![FieldError::new("imei", "imei or deviceImei is required")]))?;

    Ok((report, imei))
}

enum Outcome<T> {
    Stored(T, String),
    Duplicate,
}

/// Raw log, validation, typed insert and device touch.
async fn ingest_report<T: TelemetryReport>(
    state: &AppState,
    body: Result<JsonBody, ApiError>,
) -> Result<Outcome<T>, StructuredError> {
    let JsonBody(body) = body?;

    let Admission::Fresh(receipt) = ingest::admit(state, T::KIND, &body).await? else {
        return Ok(Outcome::Duplicate);
    };

    let (report, imei) = parse_report::<T>(&body).map_err(|e| {
        warn!(endpoint = T::KIND.endpoint(), "Rejected telemetry payload: {}", e.0);
        e
    })?;

    let mut data = match serde_json::to_value(&report) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    data.retain(|key, value| !value.is_null() && !report.extra().contains_key(key));

    let record = TelemetryRecord {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        imei: imei.clone(),
        kind: T::KIND,
        device_time: report.device_time().map(DeviceTime::to_value),
        data: Value::Object(data),
        payload: Value::Object(report.extra().clone()),
    };
    state.store.insert_telemetry(&record).await?;

    let mut metadata = report.device_metadata();
    metadata.insert("lastTelemetryAt".into(), json!(record.timestamp));
    metadata.insert("lastTelemetryKind".into(), json!(T::KIND));
    projector::project(state.store.as_ref(), &imei, DeviceDelta::seen(metadata)).await?;

    ingest::complete(state, receipt).await;
    info!(imei = %imei, kind = %T::KIND, "Telemetry stored");
    Ok(Outcome::Stored(report, imei))
}

async fn receive<T: TelemetryReport>(
    State(state): State<AppState>,
    body: Result<JsonBody, ApiError>,
) -> Result<Json<Value>, StructuredError> {
    ingest_report::<T>(&state, body).await?;
    Ok(success(T::RECEIVED))
}

/// Same as `receive`, then feeds the report back into the command log when
/// `requestId` names a command this gateway sent.
async fn receive_instruct_response(
    State(state): State<AppState>,
    body: Result<JsonBody, ApiError>,
) -> Result<Json<Value>, StructuredError> {
    let Outcome::Stored(report, imei) = ingest_report::<InstructResponseReport>(&state, body).await?
    else {
        return Ok(success(InstructResponseReport::RECEIVED));
    };

    if let (Ok(command_id), Some(status)) = (
        Uuid::parse_str(&report.request_id),
        report.status.command_status(),
    ) {
        if state.store.update_command_status(command_id, status).await? {
            info!(imei = %imei, %command_id, status = status.as_str(), "Command status updated");
        } else {
            warn!(imei = %imei, %command_id, "Command response for unknown command");
        }
    }

    Ok(success(InstructResponseReport::RECEIVED))
}
