use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::infrastructure::error::InfraError;

const APP_JSON: &str = "app.json";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_ACTIVE_POLL_SECONDS: u64 = 30;
const DEFAULT_PENDING_WRITE_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_STALE_ECHO_TOLERANCE_SECONDS: u64 = 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub schema: u8,
}

fn default_app_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": "Worklog",
        "apiBaseUrl": DEFAULT_API_BASE_URL,
        "timezone": "UTC",
        "activePollSeconds": DEFAULT_ACTIVE_POLL_SECONDS,
        "pendingWriteTimeoutSeconds": DEFAULT_PENDING_WRITE_TIMEOUT_SECONDS,
        "staleEchoToleranceSeconds": DEFAULT_STALE_ECHO_TOLERANCE_SECONDS
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_config())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn read_api_base_url(config_dir: &Path) -> Result<String, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("apiBaseUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_API_BASE_URL)
        .to_string())
}

pub fn read_timezone(config_dir: &Path) -> Result<Tz, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let name = app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("UTC");
    Tz::from_str(name)
        .map_err(|_| InfraError::InvalidConfig(format!("unknown timezone '{name}' in app.json")))
}

fn read_seconds(config_dir: &Path, key: &str, default: u64) -> Result<u64, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let value = app.get(key).and_then(serde_json::Value::as_u64).unwrap_or(default);
    if value == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "{key} must be greater than zero in app.json"
        )));
    }
    Ok(value)
}

pub fn read_active_poll_seconds(config_dir: &Path) -> Result<u64, InfraError> {
    read_seconds(config_dir, "activePollSeconds", DEFAULT_ACTIVE_POLL_SECONDS)
}

pub fn read_pending_write_timeout_seconds(config_dir: &Path) -> Result<u64, InfraError> {
    read_seconds(
        config_dir,
        "pendingWriteTimeoutSeconds",
        DEFAULT_PENDING_WRITE_TIMEOUT_SECONDS,
    )
}

pub fn read_stale_echo_tolerance_seconds(config_dir: &Path) -> Result<u64, InfraError> {
    read_seconds(
        config_dir,
        "staleEchoToleranceSeconds",
        DEFAULT_STALE_ECHO_TOLERANCE_SECONDS,
    )
}
