//! Device-pushed webhooks answered in the hub's `{code}` envelope.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::alarm;
use crate::error::{ApiError, ApiResult};
use crate::ingest::{self, Admission, JsonBody};
use crate::normalize::{self, device_id};
use crate::projector::{self, DeviceDelta};
use crate::records::{
    AlarmLocation, AlarmRecord, EventKind, GeoPoint, GpsFix, HeartbeatRecord, SessionEvent,
};
use crate::store::AlarmFilter;
use crate::AppState;

const MAX_LIMIT: i64 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pushgps", get(recent_gps).post(push_gps))
        .route(
            "/pushalarm",
            get(list_alarms).post(push_alarm).patch(acknowledge_alarm),
        )
        .route("/pushevent", post(push_event))
        .route("/pushhb", post(push_heartbeat))
}

fn ack() -> Json<Value> {
    Json(json!({"code": 0}))
}

fn with_timestamp(mut meta: Map<String, Value>, key: &str) -> Map<String, Value> {
    meta.insert(key.to_string(), json!(Utc::now()));
    meta
}

// ── GPS ────────────────────────────────────────────────────────────────────

const GPS_FIELDS: &[&str] = &[
    "imei", "deviceImei", "latitude", "longitude", "altitude", "speed", "course", "satellites",
    "hdop", "gpsValid",
];

async fn push_gps(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let Admission::Fresh(receipt) = ingest::admit(&state, EventKind::Gps, &body).await? else {
        return Ok(ack());
    };

    let present = |key: &str| body.get(key).is_some_and(|v| !v.is_null());
    let Some(imei) = device_id(&body).filter(|_| present("latitude") && present("longitude"))
    else {
        warn!("GPS push missing IMEI or coordinates");
        return Err(ApiError::bad_request("IMEI, latitude and longitude are required"));
    };

    let latitude =
        normalize::number(body.get("latitude")).filter(|lat| (-90.0..=90.0).contains(lat));
    let longitude =
        normalize::number(body.get("longitude")).filter(|lng| (-180.0..=180.0).contains(lng));
    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        warn!(imei = %imei, "GPS push with invalid coordinates");
        return Err(ApiError::bad_request("Invalid coordinates"));
    };

    let extra = normalize::remainder(&body, GPS_FIELDS);
    let fix = GpsFix {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        imei: imei.clone(),
        latitude,
        longitude,
        altitude: normalize::number(body.get("altitude")),
        speed: normalize::number(body.get("speed")),
        course: normalize::number(body.get("course")),
        satellites: normalize::integer(body.get("satellites")),
        hdop: normalize::number(body.get("hdop")),
        gps_valid: normalize::flag(body.get("gpsValid")) != Some(false),
        location: GeoPoint::new(latitude, longitude),
        payload: Value::Object(extra.clone()),
    };
    state.store.insert_gps_fix(&fix).await?;

    let location = json!({
        "latitude": fix.latitude,
        "longitude": fix.longitude,
        "timestamp": fix.timestamp,
        "speed": fix.speed,
        "course": fix.course,
    });
    projector::project(
        state.store.as_ref(),
        &imei,
        DeviceDelta::location(location, with_timestamp(extra, "lastLocationAt")),
    )
    .await?;

    ingest::complete(&state, receipt).await;
    info!(imei = %imei, latitude, longitude, speed = ?fix.speed, "GPS fix stored");
    Ok(ack())
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    imei: Option<String>,
    limit: Option<i64>,
}

async fn recent_gps(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(10).clamp(1, MAX_LIMIT);
    let fixes = state
        .store
        .recent_gps_fixes(query.imei.as_deref(), limit)
        .await?;
    Ok(Json(json!({"data": fixes, "message": "Latest GPS fixes"})))
}

// ── Alarms ─────────────────────────────────────────────────────────────────

const ALARM_FIELDS: &[&str] = &[
    "imei", "deviceImei", "alarmCode", "msgClass", "latitude", "longitude",
];

async fn push_alarm(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let Admission::Fresh(receipt) = ingest::admit(&state, EventKind::Alarm, &body).await? else {
        return Ok(ack());
    };

    let (Some(imei), Some(code)) = (device_id(&body), normalize::text(body.get("alarmCode")))
    else {
        warn!("Alarm push missing IMEI or alarmCode");
        return Err(ApiError::bad_request("IMEI and alarmCode are required"));
    };

    let class = alarm::classify(&code);
    let location = normalize::number(body.get("latitude"))
        .zip(normalize::number(body.get("longitude")))
        .map(|(lat, lng)| AlarmLocation::new(lat, lng));

    let record = AlarmRecord {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        imei: imei.clone(),
        alarm_type: class.alarm_type,
        alarm_code: code,
        // JC400 devices always report class 0.
        msg_class: normalize::integer(body.get("msgClass")).unwrap_or(0),
        severity: class.severity,
        description: class.description,
        location,
        payload: Value::Object(normalize::remainder(&body, ALARM_FIELDS)),
        acknowledged: false,
        acknowledged_at: None,
        acknowledged_by: None,
    };
    state.store.insert_alarm(&record).await?;

    let mut meta = Map::new();
    meta.insert("lastAlarmType".into(), json!(record.alarm_type));
    projector::project(
        state.store.as_ref(),
        &imei,
        DeviceDelta::seen(with_timestamp(meta, "lastAlarmAt")),
    )
    .await?;

    ingest::complete(&state, receipt).await;
    info!(
        imei = %imei,
        alarm_type = %record.alarm_type,
        code = %record.alarm_code,
        severity = record.severity.as_str(),
        "Alarm stored"
    );
    Ok(ack())
}

#[derive(Debug, Deserialize)]
struct AlarmQuery {
    imei: Option<String>,
    #[serde(rename = "type")]
    alarm_type: Option<String>,
    acknowledged: Option<String>,
    limit: Option<i64>,
}

async fn list_alarms(
    State(state): State<AppState>,
    Query(query): Query<AlarmQuery>,
) -> ApiResult<Json<Value>> {
    let filter = AlarmFilter {
        imei: query.imei,
        alarm_type: query.alarm_type.filter(|t| t != "all"),
        acknowledged: query.acknowledged.map(|a| a == "true"),
        limit: query.limit.unwrap_or(50).clamp(1, MAX_LIMIT),
    };
    let alarms = state.store.query_alarms(&filter).await?;
    Ok(Json(json!({"data": alarms, "message": "Alarm list"})))
}

async fn acknowledge_alarm(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let alarm_id = normalize::text(body.get("alarmId"))
        .ok_or_else(|| ApiError::bad_request("alarmId is required"))?;
    let alarm_id =
        Uuid::parse_str(&alarm_id).map_err(|_| ApiError::bad_request("Invalid alarmId"))?;
    let by = normalize::text(body.get("acknowledgedBy")).unwrap_or_else(|| "system".to_string());

    let alarm = state
        .store
        .acknowledge_alarm(alarm_id, &by, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("Alarm not found"))?;

    info!(%alarm_id, by = %by, "Alarm acknowledged");
    Ok(Json(json!({"code": 0, "alarm": alarm})))
}

// ── Sessions and heartbeats ────────────────────────────────────────────────

async fn push_event(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let Admission::Fresh(receipt) = ingest::admit(&state, EventKind::Session, &body).await? else {
        return Ok(ack());
    };

    let Some(imei) = device_id(&body) else {
        warn!("Session event missing IMEI");
        return Err(ApiError::bad_request("IMEI is required"));
    };
    let event_type = normalize::text(body.get("eventType")).unwrap_or_else(|| "unknown".into());
    let extra = normalize::remainder(&body, &["imei", "deviceImei", "eventType"]);

    state
        .store
        .insert_session_event(&SessionEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            imei: imei.clone(),
            event_type: event_type.clone(),
            payload: Value::Object(extra.clone()),
        })
        .await?;

    let device = projector::project(
        state.store.as_ref(),
        &imei,
        DeviceDelta::session_event(&event_type, extra),
    )
    .await?;

    ingest::complete(&state, receipt).await;
    info!(
        imei = %imei,
        event = %event_type,
        total_sessions = device.total_sessions,
        "Session event processed"
    );
    Ok(ack())
}

const HEARTBEAT_FIELDS: &[&str] = &[
    "imei", "deviceImei", "accStatus", "gpsValid", "voltage", "gsmSignal", "temperature",
];

async fn push_heartbeat(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let Admission::Fresh(receipt) = ingest::admit(&state, EventKind::Heartbeat, &body).await? else {
        return Ok(ack());
    };

    let Some(imei) = device_id(&body) else {
        warn!("Heartbeat missing IMEI");
        return Err(ApiError::bad_request("IMEI is required"));
    };

    let extra = normalize::remainder(&body, HEARTBEAT_FIELDS);
    let heartbeat = HeartbeatRecord {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        imei: imei.clone(),
        acc_status: normalize::flag(body.get("accStatus")).unwrap_or(false),
        gps_valid: normalize::flag(body.get("gpsValid")).unwrap_or(false),
        voltage: normalize::number(body.get("voltage")),
        gsm_signal: normalize::integer(body.get("gsmSignal")),
        temperature: normalize::number(body.get("temperature")),
        payload: Value::Object(extra.clone()),
    };
    state.store.insert_heartbeat(&heartbeat).await?;

    let snapshot = json!({
        "timestamp": heartbeat.timestamp,
        "accStatus": heartbeat.acc_status,
        "gpsValid": heartbeat.gps_valid,
        "voltage": heartbeat.voltage,
        "gsmSignal": heartbeat.gsm_signal,
        "temperature": heartbeat.temperature,
    });
    projector::project(
        state.store.as_ref(),
        &imei,
        DeviceDelta::heartbeat(snapshot, with_timestamp(extra, "lastHeartbeatAt")),
    )
    .await?;

    ingest::complete(&state, receipt).await;
    info!(
        imei = %imei,
        acc = heartbeat.acc_status,
        gps = heartbeat.gps_valid,
        "Heartbeat processed"
    );
    Ok(ack())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::MockCommandRelay;
    use crate::records::{DeviceStatus, Severity};
    use crate::store::TelemetryStore;
    use crate::test_support::{send, send_raw, test_config, TestApp};
    use axum::http::{Method, StatusCode};

    fn app() -> TestApp {
        TestApp::new(MockCommandRelay::new())
    }

    #[tokio::test]
    async fn gps_fix_round_trips_with_geojson_axis_order() {
        let app = app();
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/pushgps",
            Some(json!({
                "imei": "861234567890123",
                "latitude": "-23.550520",
                "longitude": -46.633308,
                "speed": "54.5",
                "satellites": "9",
                "gpsValid": "1",
                "acc": 1,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"code": 0}));

        let (status, body) = send(
            &app.router,
            Method::GET,
            "/api/pushgps?imei=861234567890123&limit=1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fix = &body["data"][0];
        assert_eq!(fix["latitude"], -23.550520);
        assert_eq!(fix["longitude"], -46.633308);
        assert_eq!(fix["location"]["type"], "Point");
        assert_eq!(fix["location"]["coordinates"], json!([-46.633308, -23.550520]));
        assert_eq!(fix["satellites"], 9);
        assert_eq!(fix["gpsValid"], true);
        assert_eq!(fix["payload"], json!({"acc": 1}));

        let device = app.store.get_device("861234567890123").await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.last_location.unwrap()["speed"], 54.5);
    }

    #[tokio::test]
    async fn gps_requires_identifier_and_coordinates() {
        let app = app();
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/pushgps",
            Some(json!({"imei": "1", "latitude": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 1);
        assert_eq!(body["message"], "IMEI, latitude and longitude are required");
    }

    #[tokio::test]
    async fn gps_rejects_out_of_range_coordinates() {
        let app = app();
        let cases = [(json!(91), json!(0)), (json!(0), json!(-180.5)), (json!("abc"), json!(0))];
        for (lat, lng) in cases {
            let (status, body) = send(
                &app.router,
                Method::POST,
                "/api/pushgps",
                Some(json!({"imei": "1", "latitude": lat, "longitude": lng})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], "Invalid coordinates");
        }
        assert!(app.store.get_device("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gps_accepts_device_imei_alias_and_boundaries() {
        let app = app();
        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/pushgps",
            Some(json!({
                "deviceImei": "777",
                "latitude": 90,
                "longitude": -180,
                "gpsValid": false,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fixes = app.store.recent_gps_fixes(Some("777"), 1).await.unwrap();
        assert!(!fixes[0].gps_valid);
    }

    #[tokio::test]
    async fn sos_alarm_is_classified_critical() {
        let app = app();
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/pushalarm",
            Some(json!({
                "imei": "123",
                "alarmCode": "0x9999",
                "latitude": "-23.5",
                "longitude": "-46.6",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"code": 0}));

        let alarms = app
            .store
            .query_alarms(&AlarmFilter {
                imei: Some("123".into()),
                limit: 10,
                ..AlarmFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].alarm_type, "SOS");
        assert_eq!(alarms[0].severity, Severity::Critical);
        assert_eq!(alarms[0].msg_class, 0);
        let location = alarms[0].location.unwrap();
        assert_eq!(location.coordinates, [-46.6, -23.5]);
    }

    #[tokio::test]
    async fn unknown_alarm_code_defaults_to_medium() {
        let app = app();
        send(
            &app.router,
            Method::POST,
            "/api/pushalarm",
            Some(json!({"imei": "123", "alarmCode": "0xBEEF"})),
        )
        .await;

        let (_, body) = send(&app.router, Method::GET, "/api/pushalarm?type=unknown", None).await;
        assert_eq!(body["data"][0]["severity"], "medium");
        assert_eq!(body["data"][0]["description"], "Unknown alarm: 0xBEEF");
        assert!(body["data"][0]["location"].is_null());
    }

    #[tokio::test]
    async fn alarm_requires_code() {
        let app = app();
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/pushalarm",
            Some(json!({"imei": "123"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "IMEI and alarmCode are required");
    }

    #[tokio::test]
    async fn first_acknowledgement_wins() {
        let app = app();
        send(
            &app.router,
            Method::POST,
            "/api/pushalarm",
            Some(json!({"imei": "123", "alarmCode": "0x0470"})),
        )
        .await;
        let unacked = "/api/pushalarm?acknowledged=false";
        let (_, body) = send(&app.router, Method::GET, unacked, None).await;
        let alarm_id = body["data"][0]["id"].as_str().unwrap().to_string();

        let (status, first) = send(
            &app.router,
            Method::PATCH,
            "/api/pushalarm",
            Some(json!({"alarmId": alarm_id, "acknowledgedBy": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["code"], 0);
        assert_eq!(first["alarm"]["acknowledged"], true);

        let (_, second) = send(
            &app.router,
            Method::PATCH,
            "/api/pushalarm",
            Some(json!({"alarmId": alarm_id, "acknowledgedBy": "bob"})),
        )
        .await;
        assert_eq!(second["alarm"]["acknowledgedBy"], "alice");
        assert_eq!(second["alarm"]["acknowledgedAt"], first["alarm"]["acknowledgedAt"]);

        let (_, body) = send(&app.router, Method::GET, unacked, None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn acknowledging_unknown_alarm_is_not_found() {
        let app = app();
        let (status, body) = send(
            &app.router,
            Method::PATCH,
            "/api/pushalarm",
            Some(json!({"alarmId": Uuid::new_v4().to_string()})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Alarm not found");

        let (status, _) = send(
            &app.router,
            Method::PATCH,
            "/api/pushalarm",
            Some(json!({"alarmId": "not-a-uuid"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_increments_sessions_and_logout_does_not() {
        let app = app();
        for event in ["login", "logout", "login"] {
            let (status, _) = send(
                &app.router,
                Method::POST,
                "/api/pushevent",
                Some(json!({"imei": "123", "eventType": event})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let device = app.store.get_device("123").await.unwrap().unwrap();
        assert_eq!(device.total_sessions, 2);
        assert_eq!(device.status, DeviceStatus::Online);
        assert!(device.current_session_start.is_some());

        send(
            &app.router,
            Method::POST,
            "/api/pushevent",
            Some(json!({"imei": "123", "eventType": "logout"})),
        )
        .await;
        let device = app.store.get_device("123").await.unwrap().unwrap();
        assert_eq!(device.total_sessions, 2);
        assert_eq!(device.status, DeviceStatus::Offline);
        assert!(device.current_session_start.is_none());
        assert_eq!(app.store.session_events().await.len(), 4);
    }

    #[tokio::test]
    async fn heartbeat_brings_device_online() {
        let app = app();
        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/pushhb",
            Some(json!({
                "imei": "123",
                "accStatus": "1",
                "gpsValid": 0,
                "voltage": "12.6",
                "gsmSignal": "27",
                "firmware": "JC400_V2",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let heartbeats = app.store.heartbeats().await;
        assert!(heartbeats[0].acc_status);
        assert!(!heartbeats[0].gps_valid);
        assert_eq!(heartbeats[0].voltage, Some(12.6));
        assert_eq!(heartbeats[0].gsm_signal, Some(27));

        let device = app.store.get_device("123").await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.metadata["firmware"], "JC400_V2");
        assert!(device.metadata.get("lastHeartbeatAt").is_some());
    }

    #[tokio::test]
    async fn every_webhook_is_raw_logged_even_when_rejected() {
        let app = app();
        send(&app.router, Method::POST, "/api/pushhb", Some(json!({"voltage": 1}))).await;
        send(&app.router, Method::POST, "/api/pushhb", Some(json!({"imei": "9"}))).await;

        let logs = app.store.raw_logs().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].endpoint, "/api/pushhb");
        assert_eq!(logs[0].imei, None);
        assert_eq!(logs[1].imei.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn duplicates_are_kept_unless_dedup_is_enabled() {
        let body = json!({"imei": "1", "latitude": 1, "longitude": 2});

        let app = app();
        for _ in 0..2 {
            send(&app.router, Method::POST, "/api/pushgps", Some(body.clone())).await;
        }
        assert_eq!(app.store.recent_gps_fixes(None, 10).await.unwrap().len(), 2);

        let mut config = test_config();
        config.webhook_dedup = true;
        let app = TestApp::with_config(config, MockCommandRelay::new());
        for _ in 0..2 {
            let (status, reply) =
                send(&app.router, Method::POST, "/api/pushgps", Some(body.clone())).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(reply, json!({"code": 0}));
        }
        assert_eq!(app.store.recent_gps_fixes(None, 10).await.unwrap().len(), 1);
        assert_eq!(app.store.raw_logs().await.len(), 1);
    }

    #[tokio::test]
    async fn rejected_bodies_are_reprocessed_on_redelivery() {
        let mut config = test_config();
        config.webhook_dedup = true;
        let app = TestApp::with_config(config, MockCommandRelay::new());

        let invalid = json!({"imei": "1", "latitude": 95, "longitude": 2});
        for _ in 0..2 {
            let (status, reply) =
                send(&app.router, Method::POST, "/api/pushgps", Some(invalid.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(reply["message"], "Invalid coordinates");
        }
        let logs = app.store.raw_logs().await;
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|log| !log.processed));

        let valid = json!({"imei": "1", "latitude": 45, "longitude": 2});
        for _ in 0..2 {
            let (status, _) =
                send(&app.router, Method::POST, "/api/pushgps", Some(valid.clone())).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(app.store.recent_gps_fixes(None, 10).await.unwrap().len(), 1);
        let logs = app.store.raw_logs().await;
        assert_eq!(logs.len(), 3);
        assert!(logs[2].processed);
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let app = app();
        let (status, body) =
            send_raw(&app.router, Method::POST, "/api/pushgps", "{\"imei\":").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"code": 1, "message": "Malformed JSON body"}));
    }
}
