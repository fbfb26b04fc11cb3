use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api/";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_NOTICE_DISMISS_SECONDS: u64 = 5;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

const API_URL_KEYS: &[&str] = &["TASKNEST_API_URL", "API_URL"];
const API_TOKEN_KEYS: &[&str] = &["TASKNEST_API_TOKEN"];
const TASK_ID_KEYS: &[&str] = &["TASKNEST_TASK_ID"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u8,
    pub api_base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_notice_dismiss_seconds")]
    pub notice_dismiss_seconds: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            task_id: None,
            log_filter: default_log_filter(),
            notice_dismiss_seconds: DEFAULT_NOTICE_DISMISS_SECONDS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_notice_dismiss_seconds() -> u64 {
    DEFAULT_NOTICE_DISMISS_SECONDS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.schema != 1 {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported schema {}",
                self.schema
            )));
        }
        url::Url::parse(&self.api_base_url).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid apiBaseUrl '{}': {error}",
                self.api_base_url
            ))
        })?;
        if self.tick_interval_ms == 0 {
            return Err(InfraError::InvalidConfig(
                "tickIntervalMs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Environment values win over the file so secrets never need to live on disk.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_base_url) = optional_lookup_value(&lookup, API_URL_KEYS) {
            self.api_base_url = api_base_url;
        }
        if let Some(api_token) = optional_lookup_value(&lookup, API_TOKEN_KEYS) {
            self.api_token = Some(api_token);
        }
        if let Some(task_id) = optional_lookup_value(&lookup, TASK_ID_KEYS) {
            self.task_id = Some(task_id);
        }
        self
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let raw = fs::read_to_string(&path)?;
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
    let config: AppConfig = serde_json::from_value(parsed)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config_from_env(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let config = load_config(config_dir)?.with_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
