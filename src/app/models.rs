use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

/// Which device-side stream a capture session reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogSourceKind {
    Logcat,
    Kmsg,
    QseeLog,
}

impl LogSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logcat => "logcat",
            Self::Kmsg => "kmsg",
            Self::QseeLog => "qsee_log",
        }
    }

    pub fn default_file_name(self) -> String {
        format!("{}.txt", self.as_str())
    }

    /// Arguments passed to adb after the optional `-s <serial>`.
    pub fn device_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Logcat => &["shell", "logcat"],
            Self::Kmsg => &["shell", "cat", "/proc/kmsg"],
            Self::QseeLog => &["shell", "cat", "/proc/tzdbg/qsee_log"],
        };
        args.iter().map(|arg| arg.to_string()).collect()
    }
}

impl fmt::Display for LogSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "logcat" => Ok(Self::Logcat),
            "kmsg" => Ok(Self::Kmsg),
            "qsee_log" | "qsee" => Ok(Self::QseeLog),
            other => Err(format!("Unknown log source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string().chars().take(8).collect()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

/// One enabled log source as entered by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureRequest {
    pub kind: LogSourceKind,
    pub keyword: String,
    pub path: String,
    pub case_sensitive: bool,
}

impl CaptureRequest {
    pub fn new(kind: LogSourceKind, keyword: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind,
            keyword: keyword.into(),
            path: path.into(),
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self, value: bool) -> Self {
        self.case_sensitive = value;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub kind: LogSourceKind,
    pub keywords: Vec<String>,
    pub case_sensitive: bool,
    pub path: String,
    pub started_at: String,
}

impl SessionInfo {
    pub fn title(&self) -> String {
        let file_name = std::path::Path::new(&self.path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.clone());
        format!("{} log - {}", self.kind, file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub adb_connected: bool,
    pub fastboot_connected: bool,
    pub adb_devices: Vec<DeviceSummary>,
    pub fastboot_serials: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCheck {
    pub program: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub adb: ToolCheck,
    pub fastboot: ToolCheck,
}

impl EnvironmentReport {
    pub fn is_ready(&self) -> bool {
        self.adb.available && self.fastboot.available
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashResult {
    pub file: FileInfo,
    pub destination: String,
    pub steps: Vec<FlashStepResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashStepResult {
    pub command: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HistorySnapshot {
    pub keywords: Vec<String>,
    pub files: Vec<String>,
    pub targets: Vec<String>,
}

/// Progress of a flash workflow, streamed while the steps run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlashEvent {
    StepStarted { command: String },
    Output { line: String },
    StepFinished { command: String, exit_code: Option<i32> },
    Notice { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrcpyLaunch {
    pub program: String,
    pub serial: String,
    pub pid: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_source_kinds_map_to_device_commands() {
        assert_eq!(LogSourceKind::Logcat.device_args(), vec!["shell", "logcat"]);
        assert_eq!(
            LogSourceKind::Kmsg.device_args(),
            vec!["shell", "cat", "/proc/kmsg"]
        );
        assert_eq!(
            LogSourceKind::QseeLog.device_args(),
            vec!["shell", "cat", "/proc/tzdbg/qsee_log"]
        );
        assert_eq!(LogSourceKind::QseeLog.default_file_name(), "qsee_log.txt");
    }

    #[test]
    fn log_source_kind_parses_names() {
        assert_eq!("logcat".parse::<LogSourceKind>(), Ok(LogSourceKind::Logcat));
        assert_eq!(" KMSG ".parse::<LogSourceKind>(), Ok(LogSourceKind::Kmsg));
        assert_eq!("qsee".parse::<LogSourceKind>(), Ok(LogSourceKind::QseeLog));
        assert!("radio".parse::<LogSourceKind>().is_err());
    }

    #[test]
    fn session_ids_are_unique_and_round_trip_through_text() {
        let first = SessionId::new();
        let second = SessionId::new();
        assert_ne!(first, second);
        let parsed: SessionId = first.to_string().parse().expect("parse");
        assert_eq!(parsed, first);
        assert_eq!(first.short().len(), 8);
    }

    #[test]
    fn session_title_uses_file_name() {
        let info = SessionInfo {
            session_id: SessionId::new(),
            kind: LogSourceKind::Kmsg,
            keywords: vec![],
            case_sensitive: false,
            path: "/tmp/logs/kmsg.txt".to_string(),
            started_at: String::new(),
        };
        assert_eq!(info.title(), "kmsg log - kmsg.txt");
    }
}
