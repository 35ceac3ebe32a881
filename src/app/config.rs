use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolSettings {
    pub adb_path: String,
    pub fastboot_path: String,
    pub scrcpy_path: String,
    pub serial: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    pub output_dir: String,
    pub batch_max_lines: usize,
    pub flush_interval_ms: u64,
    pub pump_interval_ms: u64,
    pub pump_max_lines: usize,
    pub idle_sleep_ms: u64,
    pub keyword_history_path: String,
    pub keyword_history_limit: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: data_dir().join("logs").to_string_lossy().to_string(),
            batch_max_lines: 100,
            flush_interval_ms: 500,
            pump_interval_ms: 50,
            pump_max_lines: 50,
            idle_sleep_ms: 100,
            keyword_history_path: data_dir()
                .join("keyword_history.txt")
                .to_string_lossy()
                .to_string(),
            keyword_history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlashConfig {
    pub fastboot_wait_secs: u64,
    pub reboot_settle_secs: u64,
    pub path_history_limit: usize,
    pub file_history_path: String,
    pub target_history_path: String,
    pub partition_map: BTreeMap<String, String>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            fastboot_wait_secs: 30,
            reboot_settle_secs: 20,
            path_history_limit: 10,
            file_history_path: data_dir()
                .join("file_history.json")
                .to_string_lossy()
                .to_string(),
            target_history_path: data_dir()
                .join("target_history.json")
                .to_string_lossy()
                .to_string(),
            partition_map: default_partition_map(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tools: ToolSettings::default(),
            capture: CaptureConfig::default(),
            flash: FlashConfig::default(),
            logging: LoggingSettings::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub fn default_partition_map() -> BTreeMap<String, String> {
    [
        ("boot.img", "boot_a"),
        ("system.img", "system_a"),
        ("vendor.img", "vendor_a"),
        ("vbmeta.img", "vbmeta_a"),
        ("dtbo.img", "dtbo_a"),
        ("recovery.img", "recovery"),
    ]
    .into_iter()
    .map(|(file, partition)| (file.to_string(), partition.to_string()))
    .collect()
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("adb_toolbox")
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ADB_TOOLBOX_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".adb_toolbox_config.json")
}

pub fn backup_config_path() -> PathBuf {
    config_path().with_extension("backup.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &AppConfig, trace_id: &str) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(&validate_config(config.clone()))
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

pub fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = CaptureConfig::default();
    if config.capture.output_dir.trim().is_empty() {
        config.capture.output_dir = defaults.output_dir;
    }
    if config.capture.batch_max_lines == 0 || config.capture.batch_max_lines > 10_000 {
        config.capture.batch_max_lines = 100;
    }
    if config.capture.flush_interval_ms < 10 || config.capture.flush_interval_ms > 60_000 {
        config.capture.flush_interval_ms = 500;
    }
    if config.capture.pump_interval_ms < 10 || config.capture.pump_interval_ms > 5_000 {
        config.capture.pump_interval_ms = 50;
    }
    if config.capture.pump_max_lines == 0 {
        config.capture.pump_max_lines = 50;
    }
    if config.capture.idle_sleep_ms == 0 || config.capture.idle_sleep_ms > 5_000 {
        config.capture.idle_sleep_ms = 100;
    }
    if config.capture.keyword_history_path.trim().is_empty() {
        config.capture.keyword_history_path = defaults.keyword_history_path;
    }
    if config.capture.keyword_history_limit == 0 {
        config.capture.keyword_history_limit = 20;
    }

    let flash_defaults = FlashConfig::default();
    if config.flash.fastboot_wait_secs == 0 {
        config.flash.fastboot_wait_secs = 30;
    }
    if config.flash.path_history_limit == 0 {
        config.flash.path_history_limit = 10;
    }
    if config.flash.file_history_path.trim().is_empty() {
        config.flash.file_history_path = flash_defaults.file_history_path;
    }
    if config.flash.target_history_path.trim().is_empty() {
        config.flash.target_history_path = flash_defaults.target_history_path;
    }
    if config.flash.partition_map.is_empty() {
        config.flash.partition_map = flash_defaults.partition_map;
    }
    config.flash.partition_map = config
        .flash
        .partition_map
        .into_iter()
        .map(|(file, partition)| (file.trim().to_lowercase(), partition.trim().to_string()))
        .filter(|(file, partition)| !file.is_empty() && !partition.is_empty())
        .collect();

    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = "info".to_string();
    }
    config
}
