//! Outbound command path: send through the hub, record in `command_logs`.

use axum::http::StatusCode;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::commands::ProvisionStep;
use crate::error::ApiError;
use crate::hub::{HubReply, Instruction, RelayError};
use crate::records::{CommandRecord, CommandStatus};
use crate::AppState;

pub const DEFAULT_SENT_BY: &str = "system";

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub command_id: Uuid,
    pub reply: HubReply,
}

/// Send one instruction and record it. A failed log write is reported but
/// does not change the outcome; the command has already left.
pub async fn dispatch(
    state: &AppState,
    instruction: &Instruction,
    sent_by: &str,
) -> Result<Dispatched, RelayError> {
    let result = state.relay.send_instruct(instruction).await;

    let (status, response, metadata) = match &result {
        Ok(reply) => (
            if reply.is_success() {
                CommandStatus::Sent
            } else {
                CommandStatus::Failed
            },
            reply.body.clone(),
            json!({"channel": instruction.channel, "httpStatus": reply.status}),
        ),
        Err(e) => (
            CommandStatus::Failed,
            json!({"error": e.to_string()}),
            json!({"channel": instruction.channel, "error": true}),
        ),
    };

    let record = CommandRecord {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        imei: instruction.imei.clone(),
        command: instruction.cmd_content.clone(),
        pro_no: instruction.pro_no.clone(),
        status,
        response,
        sent_by: sent_by.to_string(),
        metadata,
    };
    if let Err(e) = state.store.insert_command(&record).await {
        error!(imei = %record.imei, command = %record.command, "Failed to log command: {e}");
    }

    let reply = result?;
    if reply.is_success() {
        info!(imei = %instruction.imei, command = %instruction.cmd_content, "Command relayed");
    }
    Ok(Dispatched {
        command_id: record.id,
        reply,
    })
}

/// `dispatch`, with hub failures turned into the response the operator sees:
/// 502 when the hub could not be reached, the hub's own status otherwise.
pub async fn relay_or_fail(
    state: &AppState,
    instruction: &Instruction,
    sent_by: &str,
    failure_message: &str,
) -> Result<Dispatched, ApiError> {
    let dispatched = dispatch(state, instruction, sent_by)
        .await
        .map_err(|e| ApiError::Upstream {
            status: StatusCode::BAD_GATEWAY,
            message: failure_message.to_string(),
            details: json!(e.to_string()),
        })?;

    if !dispatched.reply.is_success() {
        return Err(ApiError::Upstream {
            status: StatusCode::from_u16(dispatched.reply.status)
                .unwrap_or(StatusCode::BAD_GATEWAY),
            message: failure_message.to_string(),
            details: dispatched.reply.body,
        });
    }
    Ok(dispatched)
}

// ── Provisioning ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Sent,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    #[serde(rename = "type")]
    pub via: &'static str,
    pub command: String,
    pub description: &'static str,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    /// Step prepared for manual delivery by SMS.
    pub fn pending_sms(step: &ProvisionStep) -> Self {
        Self {
            via: "sms",
            command: step.cmd_content.clone(),
            description: step.description,
            status: StepStatus::Pending,
            response: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProvisionSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub commands: Vec<StepOutcome>,
    pub summary: ProvisionSummary,
}

/// Send every step in order, pausing between sends. A failed step is
/// recorded and the sequence continues; nothing is retried or rolled back.
pub async fn provision(state: &AppState, imei: &str, steps: &[ProvisionStep]) -> ProvisionReport {
    let mut commands = Vec::with_capacity(steps.len());

    for (i, step) in steps.iter().enumerate() {
        if i > 0 && !state.config.provision_pacing.is_zero() {
            tokio::time::sleep(state.config.provision_pacing).await;
        }

        let instruction = Instruction::new(imei, step.cmd_content.clone()).with_pro_no(step.pro_no);
        let outcome = match dispatch(state, &instruction, DEFAULT_SENT_BY).await {
            Ok(dispatched) => StepOutcome {
                via: "api",
                command: step.cmd_content.clone(),
                description: step.description,
                status: if dispatched.reply.is_success() {
                    StepStatus::Sent
                } else {
                    StepStatus::Failed
                },
                response: Some(dispatched.reply.body),
                error: None,
            },
            Err(e) => {
                warn!(imei, step = step.key, "Provisioning step failed: {e}");
                StepOutcome {
                    via: "api",
                    command: step.cmd_content.clone(),
                    description: step.description,
                    status: StepStatus::Error,
                    response: None,
                    error: Some(e.to_string()),
                }
            }
        };
        commands.push(outcome);
    }

    let successful = commands
        .iter()
        .filter(|c| c.status == StepStatus::Sent)
        .count();
    let summary = ProvisionSummary {
        total: commands.len(),
        successful,
        failed: commands.len() - successful,
    };
    info!(imei, successful, total = summary.total, "Provisioning finished");

    ProvisionReport { commands, summary }
}
