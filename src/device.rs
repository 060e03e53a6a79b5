//! Operator endpoints: raw command relay, provisioning, device state.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::commands::provisioning_plan;
use crate::error::{ApiError, ApiResult};
use crate::hub::{Instruction, DEFAULT_CHANNEL, DEFAULT_PRO_NO};
use crate::ingest::JsonBody;
use crate::normalize::{self, device_id};
use crate::relay::{self, StepOutcome, DEFAULT_SENT_BY};
use crate::AppState;

const SMS_NOTE: &str =
    "Send each command as an SMS to the device, in order, waiting for a reply before the next";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/device/sendInstruct", get(recent_commands).post(send_instruct))
        .route("/device/provision", get(provision_info).post(provision))
        .route("/devices", get(list_devices))
        .route("/devices/{imei}", get(get_device))
}

// ── Command relay ──────────────────────────────────────────────────────────

async fn send_instruct(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let cmd_content = normalize::text(body.get("cmdContent"));
    let (Some(imei), Some(cmd_content)) = (device_id(&body), cmd_content) else {
        return Err(ApiError::bad_request("IMEI and cmdContent are required"));
    };

    let instruction = Instruction::new(imei, cmd_content)
        .with_pro_no(normalize::text(body.get("proNo")).unwrap_or_else(|| DEFAULT_PRO_NO.into()))
        .with_channel(
            normalize::text(body.get("channel")).unwrap_or_else(|| DEFAULT_CHANNEL.into()),
        );
    let sent_by = normalize::text(body.get("sentBy")).unwrap_or_else(|| DEFAULT_SENT_BY.into());

    let dispatched = relay::relay_or_fail(
        &state,
        &instruction,
        &sent_by,
        "Failed to send command to IoT Hub",
    )
    .await?;

    Ok(Json(json!({
        "code": 0,
        "message": "Command sent successfully",
        "data": {
            "commandId": dispatched.command_id,
            "iotHubResponse": dispatched.reply.body,
        },
    })))
}

#[derive(Debug, Deserialize)]
struct CommandQuery {
    imei: Option<String>,
    limit: Option<i64>,
}

async fn recent_commands(
    State(state): State<AppState>,
    Query(query): Query<CommandQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 1000);
    let commands = state
        .store
        .recent_commands(query.imei.as_deref(), limit)
        .await?;
    Ok(Json(json!({"data": commands, "message": "Recent commands"})))
}

// ── Provisioning ───────────────────────────────────────────────────────────

async fn provision(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let Some(imei) = device_id(&body) else {
        return Err(ApiError::bad_request("IMEI is required"));
    };
    let method = normalize::text(body.get("method")).unwrap_or_else(|| "api".into());
    let plan = provisioning_plan(&state.config.server);

    match method.as_str() {
        "sms" => {
            let phone = normalize::text(body.get("phoneNumber")).ok_or_else(|| {
                ApiError::bad_request("phoneNumber is required for SMS provisioning")
            })?;
            let commands: Vec<StepOutcome> = plan.iter().map(StepOutcome::pending_sms).collect();

            info!(imei = %imei, steps = commands.len(), "Provisioning prepared for SMS");
            Ok(Json(json!({
                "code": 0,
                "message": "Provision commands prepared for SMS sending",
                "data": {
                    "imei": imei,
                    "method": "sms",
                    "phoneNumber": phone,
                    "commands": commands,
                    "note": SMS_NOTE,
                },
            })))
        }
        "api" => {
            let report = relay::provision(&state, &imei, &plan).await;
            Ok(Json(json!({
                "code": 0,
                "message": format!(
                    "Provision completed: {}/{} commands sent",
                    report.summary.successful, report.summary.total
                ),
                "data": {
                    "imei": imei,
                    "method": "api",
                    "commands": report.commands,
                    "summary": report.summary,
                },
            })))
        }
        _ => Err(ApiError::bad_request("Invalid method. Use \"sms\" or \"api\"")),
    }
}

async fn provision_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "JC400 provisioning",
        "serverConfig": state.config.server,
        "provisionCommands": provisioning_plan(&state.config.server),
        "methods": {
            "api": "POST {imei, method: \"api\"} sends every command through the IoT Hub",
            "sms": "POST {imei, method: \"sms\", phoneNumber} returns the commands to send by SMS",
        },
    }))
}

// ── Device state ───────────────────────────────────────────────────────────

async fn list_devices(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let devices = state.store.list_devices().await?;
    Ok(Json(json!({"data": devices})))
}

async fn get_device(
    State(state): State<AppState>,
    Path(imei): Path<String>,
) -> ApiResult<Json<Value>> {
    let device = state
        .store
        .get_device(&imei)
        .await?
        .ok_or_else(|| ApiError::not_found("Device not found"))?;
    Ok(Json(json!({"data": device})))
}
