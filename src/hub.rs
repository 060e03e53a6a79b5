//! IoT Hub command client.
//!
//! Every outbound command goes through a single endpoint
//! (`POST {IOT_HUB_URL}/api/device/sendInstruct`) authenticated with a Bearer
//! key. The hub's reply is passed back verbatim together with its HTTP
//! status; deciding what a non-2xx means is left to the caller. There is no
//! retry: one attempt per call, bounded by the configured timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::HubConfig;

/// Protocol number used by JC400-series devices.
pub const DEFAULT_PRO_NO: &str = "128";
pub const DEFAULT_CHANNEL: &str = "1";

/// Body of a `sendInstruct` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub imei: String,
    pub cmd_content: String,
    pub pro_no: String,
    pub channel: String,
}

impl Instruction {
    pub fn new(imei: impl Into<String>, cmd_content: impl Into<String>) -> Self {
        Self {
            imei: imei.into(),
            cmd_content: cmd_content.into(),
            pro_no: DEFAULT_PRO_NO.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_pro_no(mut self, pro_no: impl Into<String>) -> Self {
        self.pro_no = pro_no.into();
        self
    }
}

/// What the hub answered, whatever the status.
#[derive(Debug, Clone, PartialEq)]
pub struct HubReply {
    pub status: u16,
    /// Parsed JSON, or the raw text as a JSON string when the hub did not
    /// answer with JSON.
    pub body: Value,
}

impl HubReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// The request never produced an HTTP response (refused, DNS, timeout).
    #[error("IoT Hub unreachable: {0}")]
    Transport(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRelay: Send + Sync {
    async fn send_instruct(&self, instruction: &Instruction) -> Result<HubReply, RelayError>;
}

// ── Client ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct IotHubClient {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
}

impl IotHubClient {
    pub fn new(config: &HubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build IoT Hub HTTP client")?;

        Ok(Self {
            endpoint: format!("{}/api/device/sendInstruct", config.base_url),
            api_key: config.api_key.clone(),
            http,
        })
    }
}

#[async_trait]
impl CommandRelay for IotHubClient {
    async fn send_instruct(&self, instruction: &Instruction) -> Result<HubReply, RelayError> {
        debug!(
            imei = %instruction.imei,
            cmd = %instruction.cmd_content,
            pro_no = %instruction.pro_no,
            "IoT Hub request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(instruction)
            .send()
            .await
            .map_err(|e| {
                error!(imei = %instruction.imei, "IoT Hub request failed: {e}");
                RelayError::Transport(e.to_string())
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            error!(imei = %instruction.imei, "Failed to read IoT Hub response: {e}");
            RelayError::Transport(e.to_string())
        })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() {
            debug!(imei = %instruction.imei, %status, "IoT Hub response OK");
        } else {
            warn!(imei = %instruction.imei, %status, %body, "IoT Hub HTTP error");
        }

        Ok(HubReply {
            status: status.as_u16(),
            body,
        })
    }
}
