use std::sync::{Arc, Mutex, RwLock};

use crate::app::adb::locator::resolve_adb_program;
use crate::app::capture::{spawn_capture_process, CaptureSettings, SessionRegistry, Spawner};
use crate::app::config::AppConfig;
use crate::app::history::{KeywordHistory, PathHistory};
use crate::app::models::LogSourceKind;

/// Process-wide state shared by the commands.
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub registry: Arc<SessionRegistry>,
    pub file_history: Mutex<PathHistory>,
    pub target_history: Mutex<PathHistory>,
}

impl AppState {
    /// Capture processes pick up the adb path and serial current at spawn time.
    pub fn new(config: AppConfig) -> Self {
        let config = Arc::new(RwLock::new(config));
        let tools_source = Arc::clone(&config);
        let spawner: Spawner = Arc::new(move |kind: LogSourceKind| {
            let tools = tools_source
                .read()
                .map(|config| config.tools.clone())
                .unwrap_or_default();
            spawn_capture_process(&resolve_adb_program(&tools), &tools.serial, kind)
        });
        Self::with_spawner(config, spawner)
    }

    pub fn with_spawner(config: Arc<RwLock<AppConfig>>, spawner: Spawner) -> Self {
        let snapshot = config
            .read()
            .map(|config| config.clone())
            .unwrap_or_default();
        let registry = SessionRegistry::new(
            spawner,
            KeywordHistory::load(
                &snapshot.capture.keyword_history_path,
                snapshot.capture.keyword_history_limit,
            ),
            CaptureSettings::from_config(&snapshot.capture),
        );
        Self {
            registry: Arc::new(registry),
            file_history: Mutex::new(PathHistory::load(
                &snapshot.flash.file_history_path,
                snapshot.flash.path_history_limit,
            )),
            target_history: Mutex::new(PathHistory::load(
                &snapshot.flash.target_history_path,
                snapshot.flash.path_history_limit,
            )),
            config,
        }
    }

    pub fn config(&self) -> AppConfig {
        self.config
            .read()
            .map(|config| config.clone())
            .unwrap_or_default()
    }

    pub fn replace_config(&self, config: AppConfig) {
        if let Ok(mut guard) = self.config.write() {
            *guard = config;
        }
    }
}
