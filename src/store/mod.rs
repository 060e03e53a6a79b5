//! Persistence boundary.
//!
//! Handlers only see `TelemetryStore`. Production wires in `PgStore`; the
//! handler tests run against the in-memory store.

mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::projector::DeviceDelta;
use crate::records::{
    AlarmRecord, CommandRecord, CommandStatus, Device, EventKind, GpsFix, HeartbeatRecord, RawLog,
    SessionEvent, TelemetryRecord, VideoFileList,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("{0} is not a structured telemetry kind")]
    UnsupportedKind(EventKind),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct RawLogFilter {
    pub imei: Option<String>,
    pub endpoint: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// 1-based page number.
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    pub imei: Option<String>,
    pub alarm_type: Option<String>,
    pub acknowledged: Option<bool>,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn insert_raw_log(&self, log: &RawLog) -> StoreResult<()>;

    /// Whether a body with this hash was already processed for `endpoint`.
    async fn raw_log_seen(&self, endpoint: &str, content_hash: &str) -> StoreResult<bool>;

    async fn mark_raw_log_processed(&self, id: Uuid) -> StoreResult<()>;

    /// Newest first, paginated.
    async fn query_raw_logs(&self, filter: &RawLogFilter) -> StoreResult<Page<RawLog>>;

    async fn insert_gps_fix(&self, fix: &GpsFix) -> StoreResult<()>;

    async fn recent_gps_fixes(&self, imei: Option<&str>, limit: i64) -> StoreResult<Vec<GpsFix>>;

    async fn insert_alarm(&self, alarm: &AlarmRecord) -> StoreResult<()>;

    async fn query_alarms(&self, filter: &AlarmFilter) -> StoreResult<Vec<AlarmRecord>>;

    /// Mark an alarm acknowledged. The first acknowledgement's time and
    /// author are kept; later calls return the alarm unchanged. `None` when
    /// no alarm has this id.
    async fn acknowledge_alarm(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AlarmRecord>>;

    async fn insert_heartbeat(&self, heartbeat: &HeartbeatRecord) -> StoreResult<()>;

    async fn insert_session_event(&self, event: &SessionEvent) -> StoreResult<()>;

    /// Append to the table owned by `record.kind`.
    async fn insert_telemetry(&self, record: &TelemetryRecord) -> StoreResult<()>;

    async fn insert_command(&self, command: &CommandRecord) -> StoreResult<()>;

    /// Returns `false` when no command has this id.
    async fn update_command_status(&self, id: Uuid, status: CommandStatus) -> StoreResult<bool>;

    async fn recent_commands(&self, imei: Option<&str>, limit: i64)
        -> StoreResult<Vec<CommandRecord>>;

    async fn insert_video_file_list(&self, list: &VideoFileList) -> StoreResult<()>;

    async fn recent_video_file_lists(
        &self,
        imei: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<VideoFileList>>;

    /// Atomically create-or-update the device row (see `projector::apply`).
    async fn apply_device_delta(
        &self,
        imei: &str,
        delta: &DeviceDelta,
        at: DateTime<Utc>,
    ) -> StoreResult<Device>;

    async fn get_device(&self, imei: &str) -> StoreResult<Option<Device>>;

    /// Most recently seen first.
    async fn list_devices(&self) -> StoreResult<Vec<Device>>;
}
