//! Runtime configuration.
//!
//! Everything is resolved from the environment once at startup (after
//! `.env` has been loaded in development) and then carried in `AppState`.
//! No connection strings or vendor credentials live in the source.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

/// Public addressing of this deployment, as seen by the devices.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub domain: String,
    pub gateway_port: u16,
    pub rtmp_port: u16,
    pub upload_port: u16,
    pub media_port: u16,
}

/// Connection settings for the vendor IoT Hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub base_url: String,
    pub rtmp_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub media: MediaConfig,
    /// Pause between consecutive provisioning commands.
    pub provision_pacing: Duration,
    pub webhook_dedup: bool,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server = ServerConfig {
            domain: lookup("SERVER_DOMAIN").unwrap_or_else(|| "localhost".to_string()),
            gateway_port: parse_or(&lookup, "GATEWAY_PORT", 21100)?,
            rtmp_port: parse_or(&lookup, "RTMP_PORT", 1936)?,
            upload_port: parse_or(&lookup, "UPLOAD_PORT", 23010)?,
            media_port: parse_or(&lookup, "MEDIA_PORT", 8881)?,
        };

        let hub = HubConfig {
            base_url: lookup("IOT_HUB_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: lookup("IOT_HUB_API_KEY").context("IOT_HUB_API_KEY must be set")?,
            timeout: Duration::from_secs(parse_or(&lookup, "IOT_HUB_TIMEOUT_SECS", 30)?),
        };

        let media = MediaConfig {
            base_url: lookup("MEDIA_SERVER_URL")
                .unwrap_or_else(|| format!("http://{}:{}", server.domain, server.media_port))
                .trim_end_matches('/')
                .to_string(),
            rtmp_url: lookup("RTMP_SERVER_URL")
                .unwrap_or_else(|| format!("rtmp://{}:{}", server.domain, server.rtmp_port))
                .trim_end_matches('/')
                .to_string(),
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "postgres:///jimi_gateway".to_string()),
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            server,
            hub,
            media,
            provision_pacing: Duration::from_millis(parse_or(
                &lookup,
                "PROVISION_PACING_MS",
                1000,
            )?),
            webhook_dedup: parse_or(&lookup, "WEBHOOK_DEDUP", false)?,
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", 1024 * 1024)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
