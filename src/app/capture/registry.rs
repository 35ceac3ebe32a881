use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::app::adb::locator::serial_args;
use crate::app::capture::filter::{KeywordSet, LineFilter};
use crate::app::capture::worker::{
    CaptureWorker, ChildLineSource, ProcessSlot, SinkSlot, WorkerExit,
};
use crate::app::capture::writer::open_file_sink;
use crate::app::capture::CaptureSettings;
use crate::app::error::AppError;
use crate::app::history::KeywordHistory;
use crate::app::models::{CaptureRequest, LogSourceKind, SessionId, SessionInfo};

/// Launches the external producer for a log source. Stdout must be piped.
pub type Spawner = Arc<dyn Fn(LogSourceKind) -> io::Result<Child> + Send + Sync>;

/// Runs `<adb> [-s serial] shell ...` for a source kind with stdout piped.
pub fn spawn_capture_process(
    adb_program: &str,
    serial: &str,
    kind: LogSourceKind,
) -> io::Result<Child> {
    Command::new(adb_program)
        .args(serial_args(serial))
        .args(kind.device_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

/// Spawner bound to a fixed adb program and serial.
pub fn adb_spawner(adb_program: String, serial: String) -> Spawner {
    Arc::new(move |kind: LogSourceKind| spawn_capture_process(&adb_program, &serial, kind))
}

struct SessionRecord {
    info: SessionInfo,
    running: Arc<AtomicBool>,
    process: ProcessSlot,
    sink: SinkSlot,
}

/// What the foreground side needs to display a freshly started session.
pub struct StartedSession {
    pub info: SessionInfo,
    pub relay: Receiver<String>,
    pub running: Arc<AtomicBool>,
}

/// Everything the background thread of one session owns.
struct WorkerLaunch {
    info: SessionInfo,
    trace_id: String,
    filter: LineFilter,
    relay: Sender<String>,
    running: Arc<AtomicBool>,
    process: ProcessSlot,
    sink: SinkSlot,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    history: Mutex<KeywordHistory>,
    spawner: Spawner,
    settings: CaptureSettings,
}

impl SessionRegistry {
    pub fn new(spawner: Spawner, history: KeywordHistory, settings: CaptureSettings) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            history: Mutex::new(history),
            spawner,
            settings,
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Validates, opens the sink, registers the session as running and launches
    /// its capture thread. The caller schedules the display side.
    pub fn start(
        self: &Arc<Self>,
        request: &CaptureRequest,
        trace_id: &str,
    ) -> Result<StartedSession, AppError> {
        let path = request.path.trim();
        if path.is_empty() {
            return Err(AppError::configuration(
                format!("Destination path is required for {}", request.kind),
                trace_id,
            ));
        }

        let keywords = KeywordSet::parse(&request.keyword);
        let sink = open_file_sink(&PathBuf::from(path), self.settings.flush_policy())
            .map_err(|err| {
                AppError::stream(format!("Failed to open {path}: {err}"), trace_id)
            })?;

        let (relay_tx, relay_rx) = mpsc::channel::<String>();
        let running = Arc::new(AtomicBool::new(true));
        let process: ProcessSlot = Arc::new(Mutex::new(None));
        let sink: SinkSlot = Arc::new(Mutex::new(Some(sink)));

        let info = {
            let mut guard = self
                .sessions
                .lock()
                .map_err(|_| AppError::system("Session registry locked", trace_id))?;
            let mut session_id = SessionId::new();
            while guard.contains_key(&session_id) {
                session_id = SessionId::new();
            }
            let info = SessionInfo {
                session_id,
                kind: request.kind,
                keywords: keywords.as_slice().to_vec(),
                case_sensitive: request.case_sensitive,
                path: path.to_string(),
                started_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            };
            guard.insert(
                session_id,
                SessionRecord {
                    info: info.clone(),
                    running: Arc::clone(&running),
                    process: Arc::clone(&process),
                    sink: Arc::clone(&sink),
                },
            );
            info
        };

        self.remember_keyword(&request.keyword, trace_id);

        let launch = WorkerLaunch {
            info: info.clone(),
            trace_id: trace_id.to_string(),
            filter: LineFilter::new(keywords, request.case_sensitive),
            relay: relay_tx,
            running: Arc::clone(&running),
            process,
            sink,
        };
        let registry = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}-{}", info.kind, info.session_id.short()))
            .spawn(move || registry.run_session(launch));
        if let Err(err) = spawned {
            self.stop(&info.session_id, trace_id);
            return Err(AppError::system(
                format!("Failed to start capture thread: {err}"),
                trace_id,
            ));
        }

        info!(
            trace_id = %trace_id,
            session_id = %info.session_id,
            kind = %info.kind,
            path = %info.path,
            keywords = info.keywords.len(),
            "capture session started"
        );
        Ok(StartedSession {
            info,
            relay: relay_rx,
            running,
        })
    }

    /// Starts one session per request. Every request is validated up front, so
    /// a missing path starts nothing.
    pub fn start_all(
        self: &Arc<Self>,
        requests: &[CaptureRequest],
        trace_id: &str,
    ) -> Result<Vec<StartedSession>, AppError> {
        if requests.is_empty() {
            return Err(AppError::configuration(
                "Select at least one log source",
                trace_id,
            ));
        }
        if let Some(missing) = requests.iter().find(|r| r.path.trim().is_empty()) {
            return Err(AppError::configuration(
                format!("Destination path is required for {}", missing.kind),
                trace_id,
            ));
        }
        let mut started = Vec::with_capacity(requests.len());
        for request in requests {
            match self.start(request, trace_id) {
                Ok(session) => started.push(session),
                Err(err) => {
                    for session in &started {
                        self.stop(&session.info.session_id, trace_id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(started)
    }

    /// Tears a session down. Safe to call any number of times from any thread;
    /// only the first call for an id does work. Returns whether it did.
    pub fn stop(&self, session_id: &SessionId, trace_id: &str) -> bool {
        let record = match self.sessions.lock() {
            Ok(mut guard) => guard.remove(session_id),
            Err(poisoned) => poisoned.into_inner().remove(session_id),
        };
        let Some(record) = record else {
            return false;
        };

        let child = match record.process.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut child) = child {
            let _ = child.kill();
            let _ = child.wait();
        }

        let sink = match record.sink.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let mut written = 0;
        if let Some(writer) = sink {
            written = writer.lines_written() + writer.pending_len() as u64;
            if let Err(err) = writer.finish() {
                warn!(
                    trace_id = %trace_id,
                    session_id = %session_id,
                    error = %err,
                    "failed to flush capture file on close"
                );
            }
        }

        // Cleared last: the display side treats it as "file complete".
        record.running.store(false, Ordering::SeqCst);

        info!(
            trace_id = %trace_id,
            session_id = %session_id,
            kind = %record.info.kind,
            lines = written,
            "capture session stopped"
        );
        true
    }

    pub fn stop_all(&self, trace_id: &str) -> usize {
        let ids: Vec<SessionId> = match self.sessions.lock() {
            Ok(guard) => guard.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        };
        ids.iter().filter(|id| self.stop(id, trace_id)).count()
    }

    pub fn is_running(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .map(|guard| {
                guard
                    .get(session_id)
                    .map(|record| record.running.load(Ordering::SeqCst))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn is_registered(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .map(|guard| guard.contains_key(session_id))
            .unwrap_or(false)
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .lock()
            .map(|guard| guard.values().map(|record| record.info.clone()).collect())
            .unwrap_or_default();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.path.cmp(&b.path)));
        sessions
    }

    pub fn keyword_history(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|guard| guard.entries().to_vec())
            .unwrap_or_default()
    }

    fn remember_keyword(&self, keyword: &str, trace_id: &str) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        if history.remember(keyword) {
            if let Err(err) = history.save(trace_id) {
                warn!(trace_id = %trace_id, error = %err, "failed to persist keyword history");
            }
        }
    }

    /// Body of a session's background thread. Every exit path ends in `stop`.
    fn run_session(self: Arc<Self>, launch: WorkerLaunch) {
        let WorkerLaunch {
            info,
            trace_id,
            filter,
            relay,
            running,
            process,
            sink,
        } = launch;
        let session_id = info.session_id;

        let exit = match (self.spawner)(info.kind) {
            Err(err) => WorkerExit::Failed(AppError::spawn(
                format!("Failed to start {} capture: {err}", info.kind),
                trace_id.clone(),
            )),
            Ok(mut child) => match child.stdout.take() {
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    WorkerExit::Failed(AppError::spawn(
                        "Failed to capture process stdout",
                        trace_id.clone(),
                    ))
                }
                Some(stdout) => {
                    // Checked under the slot lock, so a concurrent stop
                    // either finds the child in the slot or we kill it here.
                    let adopted = match process.lock() {
                        Ok(mut slot) if self.is_registered(&session_id) => {
                            *slot = Some(child);
                            true
                        }
                        _ => {
                            let _ = child.kill();
                            let _ = child.wait();
                            false
                        }
                    };
                    if adopted {
                        let source = ChildLineSource::new(stdout);
                        let mut worker = CaptureWorker::new(
                            session_id,
                            trace_id.clone(),
                            source,
                            filter,
                            relay.clone(),
                            Arc::clone(&sink),
                            Arc::clone(&running),
                            self.settings.idle_sleep,
                        );
                        worker.run()
                    } else {
                        WorkerExit::Stopped
                    }
                }
            },
        };

        match exit {
            // A stop that killed the child also ends the source; only an exit
            // nobody asked for is reported as one.
            WorkerExit::SourceFinished if self.is_registered(&session_id) => {
                info!(trace_id = %trace_id, session_id = %session_id, "capture process exited");
            }
            WorkerExit::Stopped | WorkerExit::SourceFinished => {
                debug!(trace_id = %trace_id, session_id = %session_id, "capture worker stopped");
            }
            WorkerExit::Failed(err) => {
                warn!(
                    trace_id = %trace_id,
                    session_id = %session_id,
                    code = %err.code,
                    error = %err.error,
                    "capture session failed"
                );
                let _ = relay.send(format!("Error: {}", err.error));
            }
        }
        self.stop(&session_id, &trace_id);
    }
}
