//! Mapping from operator actions to JC400 command strings.
//!
//! Pure functions only; sending is done by `relay`.

use serde::Serialize;
use thiserror::Error;

use crate::config::{MediaConfig, ServerConfig};
use crate::hub::DEFAULT_PRO_NO;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Invalid type. Use \"photo\" or \"video\"")]
    InvalidCaptureType,

    #[error("Invalid camera. Use \"in\", \"out\" or \"inout\"")]
    InvalidCamera,

    #[error("Video capture supports camera \"in\" or \"out\"")]
    VideoNeedsSingleCamera,

    #[error("Duration is required for video capture (e.g., \"5s\", \"10s\")")]
    MissingDuration,

    #[error("Invalid action. Use \"start_stream\" or \"stop_stream\"")]
    InvalidStreamAction,

    #[error("Invalid action. Use \"request_list\", \"get_list\", or \"play_file\"")]
    InvalidPlaybackAction,

    #[error("fileName is required for play_file action")]
    MissingFileName,
}

/// A command string plus a human-readable summary of what it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCommand {
    pub cmd_content: String,
    pub description: String,
}

// ── Capture ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Camera {
    #[default]
    In,
    Out,
    #[serde(rename = "inout")]
    InOut,
}

impl Camera {
    pub fn parse(s: &str) -> Result<Self, CommandError> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "inout" => Ok(Self::InOut),
            _ => Err(CommandError::InvalidCamera),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InOut => "inout",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::In => "inside camera",
            Self::Out => "outside camera",
            Self::InOut => "both cameras",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Photo,
    Video,
}

impl CaptureKind {
    pub fn parse(s: &str) -> Result<Self, CommandError> {
        match s {
            "photo" => Ok(Self::Photo),
            "video" => Ok(Self::Video),
            _ => Err(CommandError::InvalidCaptureType),
        }
    }
}

/// `PICTURE,<camera>` or `VIDEO,<camera>,<duration>`.
pub fn capture(
    kind: CaptureKind,
    camera: Camera,
    duration: Option<&str>,
) -> Result<MediaCommand, CommandError> {
    match kind {
        CaptureKind::Photo => Ok(MediaCommand {
            cmd_content: format!("PICTURE,{}", camera.as_str()),
            description: format!("Capture photo from {}", camera.label()),
        }),
        CaptureKind::Video => {
            let duration = duration
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .ok_or(CommandError::MissingDuration)?;
            if camera == Camera::InOut {
                return Err(CommandError::VideoNeedsSingleCamera);
            }
            Ok(MediaCommand {
                cmd_content: format!("VIDEO,{},{duration}", camera.as_str()),
                description: format!("Record {duration} of video from {}", camera.label()),
            })
        }
    }
}

// ── Live stream ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Start,
    Stop,
}

impl StreamAction {
    pub fn parse(s: &str) -> Result<Self, CommandError> {
        match s {
            "start_stream" => Ok(Self::Start),
            "stop_stream" => Ok(Self::Stop),
            _ => Err(CommandError::InvalidStreamAction),
        }
    }

    pub fn command(self) -> MediaCommand {
        match self {
            Self::Start => MediaCommand {
                cmd_content: "RTMP,ON,INOUT".into(),
                description: "Start live video stream".into(),
            },
            Self::Stop => MediaCommand {
                cmd_content: "RTMP,OFF".into(),
                description: "Stop live video stream".into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamUrls {
    pub flv: String,
    pub hls: String,
    pub rtmp: String,
}

pub fn stream_urls(media: &MediaConfig, imei: &str, channel: &str) -> StreamUrls {
    StreamUrls {
        flv: format!("{}/live/{channel}/{imei}.flv", media.base_url),
        hls: format!("{}/live/{channel}/{imei}/index.m3u8", media.base_url),
        rtmp: format!("{}/live/{imei}_{channel}", media.rtmp_url),
    }
}

// ── Playback ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackAction {
    /// Tell the device where to deliver its file list.
    RequestList,
    /// Ask the device to send the list.
    GetList,
    PlayFile(String),
}

impl PlaybackAction {
    pub fn parse(action: &str, file_name: Option<&str>) -> Result<Self, CommandError> {
        match action {
            "request_list" => Ok(Self::RequestList),
            "get_list" => Ok(Self::GetList),
            "play_file" => file_name
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| Self::PlayFile(f.to_string()))
                .ok_or(CommandError::MissingFileName),
            _ => Err(CommandError::InvalidPlaybackAction),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestList => "request_list",
            Self::GetList => "get_list",
            Self::PlayFile(_) => "play_file",
        }
    }

    pub fn command(&self, server: &ServerConfig) -> MediaCommand {
        match self {
            Self::RequestList => MediaCommand {
                cmd_content: format!(
                    "FILELIST,A,http://{}/api/media/playback/list",
                    server.domain
                ),
                description: "Request list of recorded video files".into(),
            },
            Self::GetList => MediaCommand {
                cmd_content: "FILELIST".into(),
                description: "Fetch recorded video file list from device".into(),
            },
            Self::PlayFile(file) => MediaCommand {
                cmd_content: format!("REPLAYLIST,{file}"),
                description: format!("Start playback of {file}"),
            },
        }
    }

    pub fn next_steps(&self) -> &'static [&'static str] {
        match self {
            Self::RequestList => &[
                "Wait for the device to call /api/media/playback/list",
                "Then send get_list to fetch the list",
            ],
            Self::GetList => &["The list will be delivered to the configured webhook"],
            Self::PlayFile(_) => &["Open playbackUrl to watch the recording"],
        }
    }
}

pub fn playback_url(server: &ServerConfig, imei: &str) -> String {
    format!("http://{}:{}/live/{imei}.flv", server.domain, server.media_port)
}

// ── Provisioning ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionStep {
    pub key: &'static str,
    pub cmd_content: String,
    pub description: &'static str,
    pub pro_no: &'static str,
}

/// The four setup commands, in the order they must be sent.
pub fn provisioning_plan(server: &ServerConfig) -> Vec<ProvisionStep> {
    let step = |key: &'static str, cmd_content: String, description: &'static str| ProvisionStep {
        key,
        cmd_content,
        description,
        pro_no: DEFAULT_PRO_NO,
    };
    vec![
        step(
            "coreKitSwitch",
            "COREKITSW,0".to_string(),
            "Switch device to direct integration mode",
        ),
        step(
            "server",
            format!("SERVER,1,{},{}", server.domain, server.gateway_port),
            "Point device at the JIMI gateway",
        ),
        step(
            "upload",
            format!("UPLOAD,http://{}:{}/upload", server.domain, server.upload_port),
            "Set media upload endpoint",
        ),
        step(
            "rtmp",
            format!("RSERVICE,rtmp://{}:{}/live", server.domain, server.rtmp_port),
            "Set RTMP streaming server",
        ),
    ]
}
