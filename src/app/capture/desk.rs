use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::app::capture::pump::{DisplayPump, LogView};
use crate::app::capture::registry::SessionRegistry;
use crate::app::error::AppError;
use crate::app::models::{CaptureRequest, SessionId, SessionInfo};
use crate::app::scheduler::ForegroundScheduler;

pub type ViewFactory = Box<dyn FnMut(&SessionInfo) -> Box<dyn LogView>>;

/// Foreground side of capturing: owns every open view and its pump. Not `Send`;
/// it lives on whichever thread drives the display.
pub struct CaptureDesk {
    registry: Arc<SessionRegistry>,
    scheduler: ForegroundScheduler<DisplayPump>,
    make_view: ViewFactory,
}

impl CaptureDesk {
    pub fn new(
        registry: Arc<SessionRegistry>,
        make_view: impl FnMut(&SessionInfo) -> Box<dyn LogView> + 'static,
    ) -> Self {
        Self {
            registry,
            scheduler: ForegroundScheduler::new(),
            make_view: Box::new(make_view),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Starts a session per request and opens a view for each. The first pump
    /// tick is due immediately.
    pub fn start(
        &mut self,
        requests: &[CaptureRequest],
        trace_id: &str,
    ) -> Result<Vec<SessionInfo>, AppError> {
        let started = self.registry.start_all(requests, trace_id)?;
        let settings = *self.registry.settings();
        let now = Instant::now();
        let mut infos = Vec::with_capacity(started.len());
        for session in started {
            let view = (self.make_view)(&session.info);
            let pump = DisplayPump::new(
                session.info.session_id,
                session.relay,
                session.running,
                view,
                settings.pump_interval,
                settings.pump_max_lines,
            );
            self.scheduler.schedule(pump, now);
            infos.push(session.info);
        }
        Ok(infos)
    }

    /// The user closed a view: stop delivering to it and tear its session down.
    pub fn close_view(&mut self, session_id: &SessionId, trace_id: &str) -> bool {
        let found = match self
            .scheduler
            .find_mut(|pump| pump.session_id() == *session_id)
        {
            Some(pump) => {
                pump.close_view();
                true
            }
            None => false,
        };
        self.registry.stop(session_id, trace_id);
        found
    }

    pub fn tick(&mut self, now: Instant) -> usize {
        self.scheduler.run_due(now)
    }

    pub fn open_views(&self) -> usize {
        self.scheduler.len()
    }

    /// Drives the pumps until every view closed or `deadline` passed. Returns
    /// true when no view is left open.
    pub fn run_until(&mut self, deadline: Option<Instant>) -> bool {
        loop {
            let now = Instant::now();
            self.scheduler.run_due(now);
            if self.scheduler.is_empty() {
                return true;
            }
            if deadline.is_some_and(|deadline| now >= deadline) {
                return false;
            }
            let mut wake = self
                .scheduler
                .next_deadline()
                .unwrap_or(now + Duration::from_millis(50));
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }
            std::thread::sleep(wake.saturating_duration_since(Instant::now()));
        }
    }

    /// Window teardown: stops every session, then lets each pump flush what it
    /// already received and close its view.
    pub fn shutdown(&mut self, trace_id: &str) -> usize {
        let stopped = self.registry.stop_all(trace_id);
        while !self.scheduler.is_empty() {
            self.scheduler.run_all(Instant::now());
        }
        info!(trace_id = %trace_id, sessions = stopped, "capture desk shut down");
        stopped
    }
}
