use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{AlarmFilter, Page, RawLogFilter, StoreError, StoreResult, TelemetryStore};
use crate::projector::DeviceDelta;
use crate::records::{
    AlarmLocation, AlarmRecord, CommandRecord, CommandStatus, Device, DeviceStatus, GeoPoint,
    GpsFix, HeartbeatRecord, RawLog, SessionEvent, Severity, TelemetryRecord, VideoFileList,
};

const ALARM_COLUMNS: &str = "id, received_at, imei, alarm_type, alarm_code, msg_class, severity, \
     description, latitude, longitude, payload, acknowledged, acknowledged_at, acknowledged_by";

const DEVICE_COLUMNS: &str = "imei, status, last_seen, first_seen, total_sessions, \
     current_session_start, last_location, last_heartbeat, metadata";

const COMMAND_COLUMNS: &str =
    "id, sent_at, imei, command, pro_no, status, response, sent_by, metadata";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn insert_raw_log(&self, log: &RawLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO raw_logs \
             (id, received_at, imei, endpoint, payload, content_hash, processed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(log.id)
        .bind(log.timestamp)
        .bind(log.imei.as_deref())
        .bind(&log.endpoint)
        .bind(&log.payload)
        .bind(&log.content_hash)
        .bind(log.processed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn raw_log_seen(&self, endpoint: &str, content_hash: &str) -> StoreResult<bool> {
        let seen: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM raw_logs \
             WHERE endpoint = $1 AND content_hash = $2 AND processed)",
        )
        .bind(endpoint)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(seen)
    }

    async fn mark_raw_log_processed(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE raw_logs SET processed = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_raw_logs(&self, filter: &RawLogFilter) -> StoreResult<Page<RawLog>> {
        const WHERE: &str = "WHERE ($1::text IS NULL OR imei = $1) \
             AND ($2::text IS NULL OR endpoint = $2) \
             AND ($3::timestamptz IS NULL OR received_at >= $3) \
             AND ($4::timestamptz IS NULL OR received_at <= $4)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM raw_logs {WHERE}"))
            .bind(filter.imei.as_deref())
            .bind(filter.endpoint.as_deref())
            .bind(filter.start)
            .bind(filter.end)
            .fetch_one(&self.pool)
            .await?;

        let offset = (filter.page.max(1) - 1).saturating_mul(filter.limit);
        let rows = sqlx::query(&format!(
            "SELECT id, received_at, imei, endpoint, payload, content_hash, processed \
             FROM raw_logs {WHERE} ORDER BY received_at DESC LIMIT $5 OFFSET $6"
        ))
        .bind(filter.imei.as_deref())
        .bind(filter.endpoint.as_deref())
        .bind(filter.start)
        .bind(filter.end)
        .bind(filter.limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(RawLog {
                    id: row.try_get("id")?,
                    timestamp: row.try_get("received_at")?,
                    imei: row.try_get("imei")?,
                    endpoint: row.try_get("endpoint")?,
                    payload: row.try_get("payload")?,
                    content_hash: row.try_get("content_hash")?,
                    processed: row.try_get("processed")?,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Page { items, total })
    }

    async fn insert_gps_fix(&self, fix: &GpsFix) -> StoreResult<()> {
        let location = serde_json::to_value(fix.location).unwrap_or(Value::Null);
        sqlx::query(
            "INSERT INTO gps_logs (id, received_at, imei, latitude, longitude, altitude, speed, \
             course, satellites, hdop, gps_valid, location, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(fix.id)
        .bind(fix.timestamp)
        .bind(&fix.imei)
        .bind(fix.latitude)
        .bind(fix.longitude)
        .bind(fix.altitude)
        .bind(fix.speed)
        .bind(fix.course)
        .bind(fix.satellites)
        .bind(fix.hdop)
        .bind(fix.gps_valid)
        .bind(location)
        .bind(&fix.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_gps_fixes(&self, imei: Option<&str>, limit: i64) -> StoreResult<Vec<GpsFix>> {
        let rows = sqlx::query(
            "SELECT id, received_at, imei, latitude, longitude, altitude, speed, course, \
             satellites, hdop, gps_valid, payload FROM gps_logs \
             WHERE ($1::text IS NULL OR imei = $1) \
             ORDER BY received_at DESC LIMIT $2",
        )
        .bind(imei)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(gps_from_row).collect()
    }

    async fn insert_alarm(&self, alarm: &AlarmRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO alarm_logs (id, received_at, imei, alarm_type, alarm_code, msg_class, \
             severity, description, latitude, longitude, payload, acknowledged) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(alarm.id)
        .bind(alarm.timestamp)
        .bind(&alarm.imei)
        .bind(&alarm.alarm_type)
        .bind(&alarm.alarm_code)
        .bind(alarm.msg_class)
        .bind(alarm.severity.as_str())
        .bind(&alarm.description)
        .bind(alarm.location.map(|l| l.latitude))
        .bind(alarm.location.map(|l| l.longitude))
        .bind(&alarm.payload)
        .bind(alarm.acknowledged)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_alarms(&self, filter: &AlarmFilter) -> StoreResult<Vec<AlarmRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALARM_COLUMNS} FROM alarm_logs \
             WHERE ($1::text IS NULL OR imei = $1) \
             AND ($2::text IS NULL OR alarm_type = $2) \
             AND ($3::boolean IS NULL OR acknowledged = $3) \
             ORDER BY received_at DESC LIMIT $4"
        ))
        .bind(filter.imei.as_deref())
        .bind(filter.alarm_type.as_deref())
        .bind(filter.acknowledged)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alarm_from_row).collect()
    }

    async fn acknowledge_alarm(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AlarmRecord>> {
        let row = sqlx::query(&format!(
            "UPDATE alarm_logs SET acknowledged = TRUE, \
             acknowledged_at = COALESCE(acknowledged_at, $2), \
             acknowledged_by = COALESCE(acknowledged_by, $3) \
             WHERE id = $1 RETURNING {ALARM_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .bind(by)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(alarm_from_row).transpose()
    }

    async fn insert_heartbeat(&self, heartbeat: &HeartbeatRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO heartbeat_logs (id, received_at, imei, acc_status, gps_valid, voltage, \
             gsm_signal, temperature, payload) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(heartbeat.id)
        .bind(heartbeat.timestamp)
        .bind(&heartbeat.imei)
        .bind(heartbeat.acc_status)
        .bind(heartbeat.gps_valid)
        .bind(heartbeat.voltage)
        .bind(heartbeat.gsm_signal)
        .bind(heartbeat.temperature)
        .bind(&heartbeat.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_session_event(&self, event: &SessionEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_logs (id, received_at, imei, event_type, payload) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id)
        .bind(event.timestamp)
        .bind(&event.imei)
        .bind(&event.event_type)
        .bind(&event.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_telemetry(&self, record: &TelemetryRecord) -> StoreResult<()> {
        if !record.kind.is_structured() {
            return Err(StoreError::UnsupportedKind(record.kind));
        }
        // Table names come from the closed `EventKind` registry.
        sqlx::query(&format!(
            "INSERT INTO {} (id, received_at, imei, device_time, data, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            record.kind.table()
        ))
        .bind(record.id)
        .bind(record.timestamp)
        .bind(&record.imei)
        .bind(record.device_time.as_ref())
        .bind(&record.data)
        .bind(&record.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_command(&self, command: &CommandRecord) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO command_logs ({COMMAND_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(command.id)
        .bind(command.timestamp)
        .bind(&command.imei)
        .bind(&command.command)
        .bind(&command.pro_no)
        .bind(command.status.as_str())
        .bind(&command.response)
        .bind(&command.sent_by)
        .bind(&command.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_command_status(&self, id: Uuid, status: CommandStatus) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE command_logs SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_commands(
        &self,
        imei: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<CommandRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMAND_COLUMNS} FROM command_logs \
             WHERE ($1::text IS NULL OR imei = $1) \
             ORDER BY sent_at DESC LIMIT $2"
        ))
        .bind(imei)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(command_from_row).collect()
    }

    async fn insert_video_file_list(&self, list: &VideoFileList) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO video_file_lists (id, received_at, imei, file_names, total_files) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(list.id)
        .bind(list.timestamp)
        .bind(&list.imei)
        .bind(&list.file_name_list)
        .bind(list.total_files)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_video_file_lists(
        &self,
        imei: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<VideoFileList>> {
        let rows = sqlx::query(
            "SELECT id, received_at, imei, file_names, total_files FROM video_file_lists \
             WHERE ($1::text IS NULL OR imei = $1) \
             ORDER BY received_at DESC LIMIT $2",
        )
        .bind(imei)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(VideoFileList {
                    id: row.try_get("id")?,
                    timestamp: row.try_get("received_at")?,
                    imei: row.try_get("imei")?,
                    file_name_list: row.try_get("file_names")?,
                    total_files: row.try_get("total_files")?,
                })
            })
            .collect()
    }

    async fn apply_device_delta(
        &self,
        imei: &str,
        delta: &DeviceDelta,
        at: DateTime<Utc>,
    ) -> StoreResult<Device> {
        // Single statement so concurrent webhooks for one IMEI serialize on
        // the row; metadata uses jsonb `||`, a shallow merge.
        let row = sqlx::query(&format!(
            "INSERT INTO devices ({DEVICE_COLUMNS}) \
             VALUES ($1, COALESCE($2::text, 'unknown'), $3::timestamptz, $3::timestamptz, \
                     CASE WHEN $4::text = 'start' THEN 1 ELSE 0 END, \
                     CASE WHEN $4::text = 'start' THEN $3::timestamptz END, \
                     $5::jsonb, $6::jsonb, $7::jsonb) \
             ON CONFLICT (imei) DO UPDATE SET \
                 status = COALESCE($2::text, devices.status), \
                 last_seen = $3::timestamptz, \
                 total_sessions = devices.total_sessions \
                     + CASE WHEN $4::text = 'start' THEN 1 ELSE 0 END, \
                 current_session_start = CASE \
                     WHEN $4::text = 'start' THEN $3::timestamptz \
                     WHEN $4::text = 'end' THEN NULL \
                     ELSE devices.current_session_start END, \
                 last_location = COALESCE($5::jsonb, devices.last_location), \
                 last_heartbeat = COALESCE($6::jsonb, devices.last_heartbeat), \
                 metadata = devices.metadata || $7::jsonb \
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(imei)
        .bind(delta.status.map(DeviceStatus::as_str))
        .bind(at)
        .bind(delta.session.map(|s| s.as_str()))
        .bind(delta.last_location.as_ref())
        .bind(delta.last_heartbeat.as_ref())
        .bind(Value::Object(delta.metadata.clone()))
        .fetch_one(&self.pool)
        .await?;

        device_from_row(&row)
    }

    async fn get_device(&self, imei: &str) -> StoreResult<Option<Device>> {
        let row = sqlx::query(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE imei = $1"))
            .bind(imei)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY last_seen DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(device_from_row).collect()
    }
}

// ── Row decoding ────────────────────────────────────────────────────────────

fn gps_from_row(row: &PgRow) -> StoreResult<GpsFix> {
    let latitude: f64 = row.try_get("latitude")?;
    let longitude: f64 = row.try_get("longitude")?;
    Ok(GpsFix {
        id: row.try_get("id")?,
        timestamp: row.try_get("received_at")?,
        imei: row.try_get("imei")?,
        latitude,
        longitude,
        altitude: row.try_get("altitude")?,
        speed: row.try_get("speed")?,
        course: row.try_get("course")?,
        satellites: row.try_get("satellites")?,
        hdop: row.try_get("hdop")?,
        gps_valid: row.try_get("gps_valid")?,
        location: GeoPoint::new(latitude, longitude),
        payload: row.try_get("payload")?,
    })
}

fn alarm_from_row(row: &PgRow) -> StoreResult<AlarmRecord> {
    let severity: String = row.try_get("severity")?;
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;
    Ok(AlarmRecord {
        id: row.try_get("id")?,
        timestamp: row.try_get("received_at")?,
        imei: row.try_get("imei")?,
        alarm_type: row.try_get("alarm_type")?,
        alarm_code: row.try_get("alarm_code")?,
        msg_class: row.try_get("msg_class")?,
        severity: Severity::parse(&severity).ok_or_else(|| StoreError::Corrupt {
            table: "alarm_logs",
            reason: format!("unknown severity {severity:?}"),
        })?,
        description: row.try_get("description")?,
        location: latitude
            .zip(longitude)
            .map(|(lat, lng)| AlarmLocation::new(lat, lng)),
        payload: row.try_get("payload")?,
        acknowledged: row.try_get("acknowledged")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
    })
}

fn command_from_row(row: &PgRow) -> StoreResult<CommandRecord> {
    let status: String = row.try_get("status")?;
    Ok(CommandRecord {
        id: row.try_get("id")?,
        timestamp: row.try_get("sent_at")?,
        imei: row.try_get("imei")?,
        command: row.try_get("command")?,
        pro_no: row.try_get("pro_no")?,
        status: CommandStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            table: "command_logs",
            reason: format!("unknown status {status:?}"),
        })?,
        response: row.try_get("response")?,
        sent_by: row.try_get("sent_by")?,
        metadata: row.try_get("metadata")?,
    })
}

fn device_from_row(row: &PgRow) -> StoreResult<Device> {
    let status: String = row.try_get("status")?;
    Ok(Device {
        imei: row.try_get("imei")?,
        status: DeviceStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            table: "devices",
            reason: format!("unknown status {status:?}"),
        })?,
        last_seen: row.try_get("last_seen")?,
        first_seen: row.try_get("first_seen")?,
        total_sessions: row.try_get("total_sessions")?,
        current_session_start: row.try_get("current_session_start")?,
        last_location: row.try_get("last_location")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        metadata: row.try_get("metadata")?,
    })
}
