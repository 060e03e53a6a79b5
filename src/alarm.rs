//! Alarm code classification for JC400-series devices.
//!
//! The hub reports alarms as hex code strings (`"0x9999"`). Classification is
//! a total function: codes missing from the table come back as `unknown` with
//! `medium` severity and a description that carries the raw code.

use crate::records::Severity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmClass {
    pub alarm_type: String,
    pub severity: Severity,
    pub description: String,
}

struct AlarmInfo {
    code: &'static str,
    alarm_type: &'static str,
    severity: Severity,
    description: &'static str,
}

#[rustfmt::skip]
const ALARM_TABLE: &[AlarmInfo] = &[
    AlarmInfo { code: "0x9999", alarm_type: "SOS", severity: Severity::Critical, description: "SOS button pressed" },
    AlarmInfo { code: "0x0410", alarm_type: "hibernation", severity: Severity::Low, description: "Device entered hibernation" },
    AlarmInfo { code: "0x0411", alarm_type: "wake_up", severity: Severity::Low, description: "Device woke up from hibernation" },
    AlarmInfo { code: "0x0420", alarm_type: "power_off", severity: Severity::High, description: "Device was powered off" },
    AlarmInfo { code: "0x0421", alarm_type: "power_on", severity: Severity::Low, description: "Device was powered on" },
    AlarmInfo { code: "0x0430", alarm_type: "low_battery", severity: Severity::High, description: "Low battery" },
    AlarmInfo { code: "0x0440", alarm_type: "overspeed", severity: Severity::Medium, description: "Speed limit exceeded" },
    AlarmInfo { code: "0x0450", alarm_type: "geofence_enter", severity: Severity::Low, description: "Entered geofence" },
    AlarmInfo { code: "0x0451", alarm_type: "geofence_exit", severity: Severity::Medium, description: "Left geofence" },
    AlarmInfo { code: "0x0460", alarm_type: "vibration", severity: Severity::Medium, description: "Vibration detected" },
    AlarmInfo { code: "0x0470", alarm_type: "collision", severity: Severity::High, description: "Collision detected" },
    AlarmInfo { code: "0x0480", alarm_type: "fatigue_driving", severity: Severity::Medium, description: "Driver fatigue detected" },
    AlarmInfo { code: "0x0490", alarm_type: "sharp_turn", severity: Severity::Medium, description: "Sharp turn detected" },
    AlarmInfo { code: "0x0500", alarm_type: "tamper", severity: Severity::Critical, description: "Tamper detected" },
];

/// Classify an alarm code. Matching ignores surrounding whitespace and hex
/// letter case (`0X0A10` and `0x0a10` are the same code).
pub fn classify(code: &str) -> AlarmClass {
    let trimmed = code.trim();
    ALARM_TABLE
        .iter()
        .find(|info| info.code.eq_ignore_ascii_case(trimmed))
        .map(|info| AlarmClass {
            alarm_type: info.alarm_type.to_string(),
            severity: info.severity,
            description: info.description.to_string(),
        })
        .unwrap_or_else(|| AlarmClass {
            alarm_type: "unknown".to_string(),
            severity: Severity::Medium,
            description: format!("Unknown alarm: {code}"),
        })
}
