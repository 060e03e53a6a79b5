//! In-memory `TelemetryStore` for handler tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AlarmFilter, Page, RawLogFilter, StoreError, StoreResult, TelemetryStore};
use crate::projector::{self, DeviceDelta};
use crate::records::{
    AlarmRecord, CommandRecord, CommandStatus, Device, EventKind, GpsFix, HeartbeatRecord,
    RawLog, SessionEvent, TelemetryRecord, VideoFileList,
};

#[derive(Default)]
struct Tables {
    raw_logs: Vec<RawLog>,
    gps: Vec<GpsFix>,
    alarms: Vec<AlarmRecord>,
    heartbeats: Vec<HeartbeatRecord>,
    sessions: Vec<SessionEvent>,
    telemetry: Vec<TelemetryRecord>,
    commands: Vec<CommandRecord>,
    video_lists: Vec<VideoFileList>,
    devices: HashMap<String, Device>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raw_logs(&self) -> Vec<RawLog> {
        self.tables.read().await.raw_logs.clone()
    }

    pub async fn heartbeats(&self) -> Vec<HeartbeatRecord> {
        self.tables.read().await.heartbeats.clone()
    }

    pub async fn session_events(&self) -> Vec<SessionEvent> {
        self.tables.read().await.sessions.clone()
    }

    pub async fn telemetry(&self, kind: EventKind) -> Vec<TelemetryRecord> {
        self.tables
            .read()
            .await
            .telemetry
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn commands(&self) -> Vec<CommandRecord> {
        self.tables.read().await.commands.clone()
    }
}

/// Newest-first slice of an append-only table.
fn newest<T: Clone>(rows: &[T], keep: impl Fn(&T) -> bool, limit: i64) -> Vec<T> {
    rows.iter()
        .rev()
        .filter(|row| keep(row))
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_raw_log(&self, log: &RawLog) -> StoreResult<()> {
        self.tables.write().await.raw_logs.push(log.clone());
        Ok(())
    }

    async fn raw_log_seen(&self, endpoint: &str, content_hash: &str) -> StoreResult<bool> {
        Ok(self
            .tables
            .read()
            .await
            .raw_logs
            .iter()
            .any(|log| {
                log.processed && log.endpoint == endpoint && log.content_hash == content_hash
            }))
    }

    async fn mark_raw_log_processed(&self, id: Uuid) -> StoreResult<()> {
        if let Some(log) = self.tables.write().await.raw_logs.iter_mut().find(|l| l.id == id) {
            log.processed = true;
        }
        Ok(())
    }

    async fn query_raw_logs(&self, filter: &RawLogFilter) -> StoreResult<Page<RawLog>> {
        let tables = self.tables.read().await;
        let matching: Vec<&RawLog> = tables
            .raw_logs
            .iter()
            .rev()
            .filter(|log| filter.imei.is_none() || log.imei == filter.imei)
            .filter(|log| filter.endpoint.as_ref().is_none_or(|e| &log.endpoint == e))
            .filter(|log| filter.start.is_none_or(|start| log.timestamp >= start))
            .filter(|log| filter.end.is_none_or(|end| log.timestamp <= end))
            .collect();

        let skip = (filter.page.max(1) - 1).saturating_mul(filter.limit.max(0));
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        Ok(Page {
            total: matching.len() as i64,
            items: matching
                .into_iter()
                .skip(skip)
                .take(filter.limit.max(0) as usize)
                .cloned()
                .collect(),
        })
    }

    async fn insert_gps_fix(&self, fix: &GpsFix) -> StoreResult<()> {
        self.tables.write().await.gps.push(fix.clone());
        Ok(())
    }

    async fn recent_gps_fixes(&self, imei: Option<&str>, limit: i64) -> StoreResult<Vec<GpsFix>> {
        let tables = self.tables.read().await;
        Ok(newest(&tables.gps, |f| imei.is_none_or(|i| f.imei == i), limit))
    }

    async fn insert_alarm(&self, alarm: &AlarmRecord) -> StoreResult<()> {
        self.tables.write().await.alarms.push(alarm.clone());
        Ok(())
    }

    async fn query_alarms(&self, filter: &AlarmFilter) -> StoreResult<Vec<AlarmRecord>> {
        let tables = self.tables.read().await;
        Ok(newest(
            &tables.alarms,
            |a| {
                filter.imei.as_ref().is_none_or(|i| &a.imei == i)
                    && filter.alarm_type.as_ref().is_none_or(|t| &a.alarm_type == t)
                    && filter.acknowledged.is_none_or(|ack| a.acknowledged == ack)
            },
            filter.limit,
        ))
    }

    async fn acknowledge_alarm(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AlarmRecord>> {
        let mut tables = self.tables.write().await;
        let Some(alarm) = tables.alarms.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        alarm.acknowledged = true;
        alarm.acknowledged_at.get_or_insert(at);
        alarm.acknowledged_by.get_or_insert_with(|| by.to_string());
        Ok(Some(alarm.clone()))
    }

    async fn insert_heartbeat(&self, heartbeat: &HeartbeatRecord) -> StoreResult<()> {
        self.tables.write().await.heartbeats.push(heartbeat.clone());
        Ok(())
    }

    async fn insert_session_event(&self, event: &SessionEvent) -> StoreResult<()> {
        self.tables.write().await.sessions.push(event.clone());
        Ok(())
    }

    async fn insert_telemetry(&self, record: &TelemetryRecord) -> StoreResult<()> {
        if !record.kind.is_structured() {
            return Err(StoreError::UnsupportedKind(record.kind));
        }
        self.tables.write().await.telemetry.push(record.clone());
        Ok(())
    }

    async fn insert_command(&self, command: &CommandRecord) -> StoreResult<()> {
        self.tables.write().await.commands.push(command.clone());
        Ok(())
    }

    async fn update_command_status(&self, id: Uuid, status: CommandStatus) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.commands.iter_mut().find(|c| c.id == id) {
            Some(command) => {
                command.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_commands(
        &self,
        imei: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<CommandRecord>> {
        let tables = self.tables.read().await;
        Ok(newest(&tables.commands, |c| imei.is_none_or(|i| c.imei == i), limit))
    }

    async fn insert_video_file_list(&self, list: &VideoFileList) -> StoreResult<()> {
        self.tables.write().await.video_lists.push(list.clone());
        Ok(())
    }

    async fn recent_video_file_lists(
        &self,
        imei: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<VideoFileList>> {
        let tables = self.tables.read().await;
        Ok(newest(&tables.video_lists, |v| imei.is_none_or(|i| v.imei == i), limit))
    }

    async fn apply_device_delta(
        &self,
        imei: &str,
        delta: &DeviceDelta,
        at: DateTime<Utc>,
    ) -> StoreResult<Device> {
        let mut tables = self.tables.write().await;
        let existing = tables.devices.remove(imei);
        let device = projector::apply(existing, imei, delta, at);
        tables.devices.insert(imei.to_string(), device.clone());
        Ok(device)
    }

    async fn get_device(&self, imei: &str) -> StoreResult<Option<Device>> {
        Ok(self.tables.read().await.devices.get(imei).cloned())
    }

    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        let mut devices: Vec<Device> = self.tables.read().await.devices.values().cloned().collect();
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(devices)
    }
}
