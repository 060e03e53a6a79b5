//! Camera control: capture, live stream, recorded-file playback.

use axum::{
    extract::{OriginalUri, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::commands::{self, Camera, CaptureKind, PlaybackAction, StreamAction};
use crate::error::{ApiError, ApiResult};
use crate::hub::{Instruction, DEFAULT_CHANNEL};
use crate::ingest::{self, Admission, JsonBody};
use crate::normalize::{self, device_id};
use crate::projector::{self, DeviceDelta};
use crate::records::VideoFileList;
use crate::relay::{self, DEFAULT_SENT_BY};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/media/capture", post(capture))
        .route("/media/stream", get(stream_info).post(stream))
        .route("/media/playback", post(playback).put(receive_file_list))
        .route(
            "/media/playback/list",
            get(recent_file_lists).post(receive_file_list),
        )
}

async fn capture(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let (Some(imei), Some(kind)) = (device_id(&body), normalize::text(body.get("type"))) else {
        return Err(ApiError::bad_request("IMEI and type are required"));
    };
    let kind = CaptureKind::parse(&kind)?;
    let camera = match normalize::text(body.get("camera")) {
        Some(camera) => Camera::parse(&camera)?,
        None => Camera::default(),
    };
    let duration = normalize::text(body.get("duration"));
    let command = commands::capture(kind, camera, duration.as_deref())?;

    let instruction = Instruction::new(&imei, &command.cmd_content);
    let dispatched = relay::relay_or_fail(
        &state,
        &instruction,
        DEFAULT_SENT_BY,
        "Failed to send capture command",
    )
    .await?;

    info!(imei = %imei, command = %command.cmd_content, "Capture requested");
    Ok(Json(json!({
        "code": 0,
        "message": format!("{} - command sent", command.description),
        "data": {
            "imei": imei,
            "type": kind,
            "camera": camera,
            "duration": duration.filter(|_| kind == CaptureKind::Video),
            "command": command.cmd_content,
            "iotHubResponse": dispatched.reply.body,
        },
    })))
}

// ── Live stream ────────────────────────────────────────────────────────────

async fn stream(State(state): State<AppState>, JsonBody(body): JsonBody) -> ApiResult<Json<Value>> {
    let (Some(imei), Some(action)) = (device_id(&body), normalize::text(body.get("action"))) else {
        return Err(ApiError::bad_request("IMEI and action are required"));
    };
    let command = StreamAction::parse(&action)?.command();
    let channel = normalize::text(body.get("channel")).unwrap_or_else(|| DEFAULT_CHANNEL.into());

    let instruction = Instruction::new(&imei, &command.cmd_content).with_channel(&channel);
    let dispatched = relay::relay_or_fail(
        &state,
        &instruction,
        DEFAULT_SENT_BY,
        "Failed to send stream command",
    )
    .await?;

    info!(imei = %imei, action = %action, channel = %channel, "Stream command sent");
    Ok(Json(json!({
        "code": 0,
        "message": format!("{} - command sent", command.description),
        "data": {
            "imei": imei,
            "action": action,
            "channel": channel,
            "streamUrls": commands::stream_urls(&state.config.media, &imei, &channel),
            "command": command.cmd_content,
            "iotHubResponse": dispatched.reply.body,
        },
    })))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    imei: Option<String>,
    channel: Option<String>,
}

async fn stream_info(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Json<Value>> {
    let imei = query
        .imei
        .filter(|i| !i.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("IMEI parameter is required"))?;
    let channel = query.channel.unwrap_or_else(|| DEFAULT_CHANNEL.into());

    Ok(Json(json!({
        "code": 0,
        "message": "Stream URLs for device",
        "data": {
            "imei": imei,
            "channel": channel,
            "streamUrls": commands::stream_urls(&state.config.media, &imei, &channel),
        },
    })))
}

// ── Playback ───────────────────────────────────────────────────────────────

async fn playback(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let (Some(imei), Some(action)) = (device_id(&body), normalize::text(body.get("action"))) else {
        return Err(ApiError::bad_request("IMEI and action are required"));
    };
    let file_name = normalize::text(body.get("fileName"));
    let action = PlaybackAction::parse(&action, file_name.as_deref())?;
    let command = action.command(&state.config.server);

    let instruction = Instruction::new(&imei, &command.cmd_content);
    let dispatched = relay::relay_or_fail(
        &state,
        &instruction,
        DEFAULT_SENT_BY,
        "Failed to send playback command",
    )
    .await?;

    let playback_url = matches!(action, PlaybackAction::PlayFile(_))
        .then(|| commands::playback_url(&state.config.server, &imei));

    info!(imei = %imei, action = action.as_str(), "Playback command sent");
    Ok(Json(json!({
        "code": 0,
        "message": format!("{} - command sent", command.description),
        "data": {
            "imei": imei,
            "action": action.as_str(),
            "fileName": file_name,
            "command": command.cmd_content,
            "playbackUrl": playback_url,
            "iotHubResponse": dispatched.reply.body,
            "nextSteps": action.next_steps(),
        },
    })))
}

/// The device delivering its recorded-file list. Mounted on both playback
/// paths, and raw-logged under whichever one received it.
async fn receive_file_list(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let Admission::Fresh(receipt) = ingest::admit_at(&state, uri.path(), &body).await? else {
        return Ok(Json(json!({"code": 0})));
    };

    let files = body.get("fileNameList").and_then(Value::as_array);
    let (Some(imei), Some(files)) = (device_id(&body), files) else {
        warn!("File list delivery without imei or fileNameList");
        return Err(ApiError::bad_request(
            "Invalid data: imei and fileNameList array required",
        ));
    };

    let file_name_list: Vec<String> = files
        .iter()
        .filter_map(|f| normalize::text(Some(f)))
        .collect();
    let list = VideoFileList {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        imei,
        total_files: file_name_list.len() as i64,
        file_name_list,
    };
    state.store.insert_video_file_list(&list).await?;

    let mut meta = Map::new();
    meta.insert("lastFileListAt".into(), json!(list.timestamp));
    meta.insert("totalFiles".into(), json!(list.total_files));
    projector::project(state.store.as_ref(), &list.imei, DeviceDelta::seen(meta)).await?;

    ingest::complete(&state, receipt).await;
    info!(imei = %list.imei, files = list.total_files, "Video file list stored");
    Ok(Json(json!({"code": 0})))
}

const MAX_FILE_LISTS: i64 = 100;

#[derive(Debug, Deserialize)]
struct FileListQuery {
    imei: Option<String>,
    limit: Option<i64>,
}

async fn recent_file_lists(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(1).clamp(1, MAX_FILE_LISTS);
    let lists = state
        .store
        .recent_video_file_lists(query.imei.as_deref(), limit)
        .await?;
    Ok(Json(json!({"data": lists, "message": "Video file lists"})))
}
