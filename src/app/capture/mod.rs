pub mod desk;
pub mod filter;
pub mod pump;
pub mod registry;
pub mod worker;
pub mod writer;

use std::time::Duration;

use crate::app::config::CaptureConfig;
use crate::app::capture::writer::FlushPolicy;

pub use desk::CaptureDesk;
pub use filter::{KeywordSet, LineFilter};
pub use pump::{ConsoleView, DisplayPump, LogView, MemoryView};
pub use registry::{adb_spawner, spawn_capture_process, SessionRegistry, Spawner, StartedSession};

/// Timing knobs of the capture pipeline, resolved from [`CaptureConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub batch_max_lines: usize,
    pub flush_interval: Duration,
    pub pump_interval: Duration,
    pub pump_max_lines: usize,
    pub idle_sleep: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            batch_max_lines: config.batch_max_lines.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            pump_interval: Duration::from_millis(config.pump_interval_ms.max(1)),
            pump_max_lines: config.pump_max_lines.max(1),
            idle_sleep: Duration::from_millis(config.idle_sleep_ms.max(1)),
        }
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            max_lines: self.batch_max_lines,
            max_delay: self.flush_interval,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}
