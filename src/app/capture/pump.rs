use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::app::models::{SessionId, SessionInfo};
use crate::app::scheduler::{ForegroundTask, TaskControl};

/// A live view of one session. Only ever touched from the foreground context.
pub trait LogView {
    fn append_lines(&mut self, lines: &[String]);
    fn close(&mut self);
}

/// Moves lines from a session's relay queue into its view, a bounded number per tick.
pub struct DisplayPump {
    session_id: SessionId,
    relay: Receiver<String>,
    running: Arc<AtomicBool>,
    view: Box<dyn LogView>,
    interval: Duration,
    max_lines: usize,
    view_closed: bool,
}

impl DisplayPump {
    pub fn new(
        session_id: SessionId,
        relay: Receiver<String>,
        running: Arc<AtomicBool>,
        view: Box<dyn LogView>,
        interval: Duration,
        max_lines: usize,
    ) -> Self {
        Self {
            session_id,
            relay,
            running,
            view,
            interval,
            max_lines: max_lines.max(1),
            view_closed: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The user dismissed the view; nothing more is delivered to it.
    pub fn close_view(&mut self) {
        if !self.view_closed {
            self.view_closed = true;
            self.view.close();
        }
    }

    /// One pump invocation. While the session runs, delivers up to `max_lines`
    /// and reschedules. After the session stopped, keeps delivering the
    /// leftovers at the same rate and closes the view once the queue is empty.
    pub fn pump(&mut self) -> TaskControl {
        if self.view_closed {
            return TaskControl::Done;
        }
        let running = self.running.load(Ordering::SeqCst);
        let (batch, drained) = self.take_batch();
        if !batch.is_empty() {
            self.view.append_lines(&batch);
        }
        if running {
            return TaskControl::Reschedule;
        }
        if drained {
            self.close_view();
            return TaskControl::Done;
        }
        TaskControl::Reschedule
    }

    /// Returns the batch and whether the queue was observed empty (or disconnected).
    fn take_batch(&mut self) -> (Vec<String>, bool) {
        let mut batch = Vec::new();
        while batch.len() < self.max_lines {
            match self.relay.try_recv() {
                Ok(line) => batch.push(line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return (batch, true);
                }
            }
        }
        (batch, false)
    }
}

impl ForegroundTask for DisplayPump {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&mut self) -> TaskControl {
        self.pump()
    }
}

/// Shared transcript behind a [`MemoryView`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ViewTranscript {
    pub lines: Vec<String>,
    pub appends: Vec<usize>,
    pub closed: u32,
}

/// Keeps everything in memory; the transcript stays readable through the shared handle.
#[derive(Clone, Default)]
pub struct MemoryView {
    transcript: Rc<RefCell<ViewTranscript>>,
}

impl MemoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> ViewTranscript {
        self.transcript.borrow().clone()
    }
}

impl LogView for MemoryView {
    fn append_lines(&mut self, lines: &[String]) {
        let mut transcript = self.transcript.borrow_mut();
        transcript.appends.push(lines.len());
        transcript.lines.extend_from_slice(lines);
    }

    fn close(&mut self) {
        self.transcript.borrow_mut().closed += 1;
    }
}

/// Writes each line to stdout prefixed by the session's source.
pub struct ConsoleView {
    prefix: String,
    title: String,
}

impl ConsoleView {
    pub fn new(info: &SessionInfo) -> Self {
        Self {
            prefix: format!("[{}:{}]", info.kind, info.session_id.short()),
            title: info.title(),
        }
    }
}

impl LogView for ConsoleView {
    fn append_lines(&mut self, lines: &[String]) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in lines {
            let _ = writeln!(out, "{} {}", self.prefix, line);
        }
        let _ = out.flush();
    }

    fn close(&mut self) {
        println!("{} closed ({})", self.prefix, self.title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn pump_with(
        max_lines: usize,
    ) -> (DisplayPump, mpsc::Sender<String>, Arc<AtomicBool>, MemoryView) {
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let view = MemoryView::new();
        let pump = DisplayPump::new(
            SessionId::new(),
            rx,
            Arc::clone(&running),
            Box::new(view.clone()),
            Duration::from_millis(50),
            max_lines,
        );
        (pump, tx, running, view)
    }

    #[test]
    fn delivers_at_most_cap_per_invocation_in_order() {
        let (mut pump, tx, _running, view) = pump_with(50);
        for i in 0..500 {
            tx.send(format!("line {i}")).expect("send");
        }

        for _ in 0..10 {
            assert_eq!(pump.pump(), TaskControl::Reschedule);
        }
        let transcript = view.transcript();
        assert_eq!(transcript.appends, vec![50; 10]);
        let expected: Vec<String> = (0..500).map(|i| format!("line {i}")).collect();
        assert_eq!(transcript.lines, expected);

        assert_eq!(pump.pump(), TaskControl::Reschedule);
        assert_eq!(view.transcript().appends.len(), 10);
    }

    #[test]
    fn stopped_session_drains_leftovers_then_closes_view() {
        let (mut pump, tx, running, view) = pump_with(50);
        for i in 0..70 {
            tx.send(format!("line {i}")).expect("send");
        }
        tx.send("Error: device offline".to_string()).expect("send");
        running.store(false, Ordering::SeqCst);

        assert_eq!(pump.pump(), TaskControl::Reschedule);
        assert_eq!(view.transcript().closed, 0);
        assert_eq!(pump.pump(), TaskControl::Done);

        let transcript = view.transcript();
        assert_eq!(transcript.appends, vec![50, 21]);
        assert_eq!(transcript.lines.last().map(String::as_str), Some("Error: device offline"));
        assert_eq!(transcript.closed, 1);
    }

    #[test]
    fn user_closed_view_receives_nothing_more() {
        let (mut pump, tx, _running, view) = pump_with(50);
        tx.send("before".to_string()).expect("send");
        pump.close_view();
        pump.close_view();
        tx.send("after".to_string()).expect("send");

        assert_eq!(pump.pump(), TaskControl::Done);
        let transcript = view.transcript();
        assert!(transcript.lines.is_empty());
        assert_eq!(transcript.closed, 1);
    }

    #[test]
    fn disconnected_queue_counts_as_drained() {
        let (mut pump, tx, running, view) = pump_with(5);
        tx.send("only".to_string()).expect("send");
        drop(tx);
        running.store(false, Ordering::SeqCst);

        assert_eq!(pump.pump(), TaskControl::Done);
        assert_eq!(view.transcript().lines, vec!["only"]);
    }
}
