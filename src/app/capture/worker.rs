use std::io::{self, BufRead, BufReader, Read};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::capture::filter::LineFilter;
use crate::app::capture::writer::FileSink;
use crate::app::error::AppError;
use crate::app::models::SessionId;

/// Child process shared between the worker and the registry. Whoever closes it
/// takes it out of the slot.
pub type ProcessSlot = Arc<Mutex<Option<Child>>>;

/// File sink shared between the worker and the registry, same discipline as [`ProcessSlot`].
pub type SinkSlot = Arc<Mutex<Option<FileSink>>>;

/// Where a capture worker pulls raw lines from.
pub trait LineSource {
    /// Waits at most `wait` for the next line. `Ok(None)` means nothing arrived.
    fn next_line(&mut self, wait: Duration) -> io::Result<Option<String>>;

    /// True once the producer is gone and no more lines will arrive.
    fn is_finished(&mut self) -> bool;
}

/// Reads newline-terminated output of a child process on a dedicated thread,
/// decoding lossily as UTF-8.
pub struct ChildLineSource {
    lines: Receiver<io::Result<String>>,
    finished: bool,
}

impl ChildLineSource {
    pub fn new<R: Read + Send + 'static>(stdout: R) -> Self {
        let (tx, rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("capture-reader".to_string())
            .spawn(move || forward_lines(stdout, tx));
        Self {
            lines: rx,
            // Without a reader thread the sender is already gone.
            finished: spawned.is_err(),
        }
    }
}

fn forward_lines<R: Read>(stdout: R, tx: Sender<io::Result<String>>) {
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::with_capacity(512);
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => return,
            Ok(_) => {
                if tx.send(Ok(decode_line(&buffer))).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        }
    }
}

impl LineSource for ChildLineSource {
    fn next_line(&mut self, wait: Duration) -> io::Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }
        match self.lines.recv_timeout(wait) {
            Ok(line) => line.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn is_finished(&mut self) -> bool {
        self.finished
    }
}

/// Strips the line terminator (`\n` or `\r\n`) and replaces invalid UTF-8.
pub fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[derive(Debug)]
pub enum WorkerExit {
    /// Teardown began: the running flag was cleared or the sink was closed.
    Stopped,
    /// The producer ended on its own.
    SourceFinished,
    Failed(AppError),
}

pub struct CaptureWorker<S: LineSource> {
    session_id: SessionId,
    trace_id: String,
    source: S,
    filter: LineFilter,
    relay: Sender<String>,
    sink: SinkSlot,
    running: Arc<AtomicBool>,
    idle_sleep: Duration,
    matched: u64,
}

impl<S: LineSource> CaptureWorker<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        trace_id: impl Into<String>,
        source: S,
        filter: LineFilter,
        relay: Sender<String>,
        sink: SinkSlot,
        running: Arc<AtomicBool>,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            session_id,
            trace_id: trace_id.into(),
            source,
            filter,
            relay,
            sink,
            running,
            idle_sleep,
            matched: 0,
        }
    }

    pub fn matched(&self) -> u64 {
        self.matched
    }

    /// Reads until stopped, until the source finishes, or until an I/O error.
    /// Matched lines go to the sink, then to the relay queue, in read order.
    pub fn run(&mut self) -> WorkerExit {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return WorkerExit::Stopped;
            }
            match self.source.next_line(self.idle_sleep) {
                Ok(Some(line)) => {
                    if !self.filter.matches(&line) {
                        continue;
                    }
                    self.matched += 1;
                    match self.persist(line.clone()) {
                        Ok(true) => {}
                        Ok(false) => return WorkerExit::Stopped,
                        Err(err) => return WorkerExit::Failed(err),
                    }
                    // A closed receiver only means nobody is watching anymore.
                    let _ = self.relay.send(line);
                }
                Ok(None) => {
                    if self.source.is_finished() {
                        debug!(
                            trace_id = %self.trace_id,
                            session_id = %self.session_id,
                            matched = self.matched,
                            "capture source finished"
                        );
                        return WorkerExit::SourceFinished;
                    }
                    match self.flush_if_due() {
                        Ok(true) => {}
                        Ok(false) => return WorkerExit::Stopped,
                        Err(err) => return WorkerExit::Failed(err),
                    }
                }
                Err(err) => {
                    if !self.running.load(Ordering::SeqCst) {
                        return WorkerExit::Stopped;
                    }
                    warn!(
                        trace_id = %self.trace_id,
                        session_id = %self.session_id,
                        error = %err,
                        "failed to read capture output"
                    );
                    return WorkerExit::Failed(AppError::stream(
                        format!("Failed to read log output: {err}"),
                        self.trace_id.clone(),
                    ));
                }
            }
        }
    }

    /// Quiet period: writes out buffered lines once the flush interval passed.
    /// Returns false when the sink is gone.
    fn flush_if_due(&mut self) -> Result<bool, AppError> {
        let mut guard = self
            .sink
            .lock()
            .map_err(|_| AppError::system("Capture sink lock poisoned", self.trace_id.clone()))?;
        let Some(writer) = guard.as_mut() else {
            return Ok(false);
        };
        writer.flush_if_due().map(|_| true).map_err(|err| {
            warn!(
                trace_id = %self.trace_id,
                session_id = %self.session_id,
                error = %err,
                "failed to flush capture file"
            );
            AppError::stream(
                format!("Failed to write log file: {err}"),
                self.trace_id.clone(),
            )
        })
    }

    /// Returns false when the sink is gone, i.e. teardown already closed it.
    fn persist(&mut self, line: String) -> Result<bool, AppError> {
        let mut guard = self
            .sink
            .lock()
            .map_err(|_| AppError::system("Capture sink lock poisoned", self.trace_id.clone()))?;
        let Some(writer) = guard.as_mut() else {
            return Ok(false);
        };
        writer.push(line).map(|_| true).map_err(|err| {
            warn!(
                trace_id = %self.trace_id,
                session_id = %self.session_id,
                error = %err,
                "failed to write capture file"
            );
            AppError::stream(
                format!("Failed to write log file: {err}"),
                self.trace_id.clone(),
            )
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedSource;
    use super::*;
    use crate::app::capture::filter::KeywordSet;
    use crate::app::capture::writer::{open_file_sink, FlushPolicy};
    use std::sync::mpsc;

    struct Harness {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        sink: SinkSlot,
        running: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("capture.txt");
            let sink = open_file_sink(&path, FlushPolicy::default()).expect("sink");
            Self {
                _dir: dir,
                path,
                sink: Arc::new(Mutex::new(Some(sink))),
                running: Arc::new(AtomicBool::new(true)),
            }
        }

        fn worker(
            &self,
            source: ScriptedSource,
            keywords: &str,
            case_sensitive: bool,
            relay: Sender<String>,
        ) -> CaptureWorker<ScriptedSource> {
            CaptureWorker::new(
                SessionId::new(),
                "trace-worker",
                source,
                LineFilter::new(KeywordSet::parse(keywords), case_sensitive),
                relay,
                Arc::clone(&self.sink),
                Arc::clone(&self.running),
                Duration::from_millis(1),
            )
        }

        fn close_and_read(&self) -> Vec<String> {
            if let Some(writer) = self.sink.lock().expect("sink").take() {
                writer.finish().expect("finish");
            }
            std::fs::read_to_string(&self.path)
                .expect("read")
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn relays_and_persists_matches_in_read_order() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel();
        let source = ScriptedSource::lines(&["info: ok", "ERR: boom", "error: x"]);
        let mut worker = harness.worker(source, "ERR", false, tx);

        assert!(matches!(worker.run(), WorkerExit::SourceFinished));
        assert_eq!(worker.matched(), 2);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["ERR: boom", "error: x"]);
        assert_eq!(harness.close_and_read(), vec!["ERR: boom", "error: x"]);
    }

    #[test]
    fn persisted_lines_equal_filtered_input() {
        let harness = Harness::new();
        let (tx, _rx) = mpsc::channel();
        let input: Vec<String> = (0..1_000)
            .map(|i| {
                if i % 3 == 0 {
                    format!("{i} W/wifi: scan")
                } else {
                    format!("{i} I/ui: draw")
                }
            })
            .collect();
        let refs: Vec<&str> = input.iter().map(String::as_str).collect();
        let mut worker = harness.worker(ScriptedSource::lines(&refs), "wifi", true, tx);

        assert!(matches!(worker.run(), WorkerExit::SourceFinished));
        let expected: Vec<String> = input.iter().filter(|l| l.contains("wifi")).cloned().collect();
        assert_eq!(harness.close_and_read(), expected);
    }

    #[test]
    fn idle_reads_do_not_end_the_loop() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel();
        let source = ScriptedSource::lines(&["a"])
            .then(Ok(None))
            .then(Ok(None))
            .then(Ok(Some("b".to_string())));
        let mut worker = harness.worker(source, "", false, tx);

        assert!(matches!(worker.run(), WorkerExit::SourceFinished));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn cleared_flag_stops_before_reading() {
        let harness = Harness::new();
        harness.running.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        let mut worker = harness.worker(ScriptedSource::lines(&["never"]), "", false, tx);

        assert!(matches!(worker.run(), WorkerExit::Stopped));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn read_error_is_reported_as_stream_error() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel();
        let source = ScriptedSource::lines(&["before"])
            .then(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone")));
        let mut worker = harness.worker(source, "", false, tx);

        match worker.run() {
            WorkerExit::Failed(err) => {
                assert_eq!(err.code, crate::app::error::ERR_STREAM);
                assert!(err.error.contains("pipe gone"));
            }
            other => panic!("unexpected exit: {other:?}"),
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["before"]);
        assert_eq!(harness.close_and_read(), vec!["before"]);
    }

    #[test]
    fn missing_sink_after_teardown_stops_quietly() {
        let harness = Harness::new();
        harness.close_and_read();
        let (tx, rx) = mpsc::channel();
        let mut worker = harness.worker(ScriptedSource::lines(&["late"]), "", false, tx);

        assert!(matches!(worker.run(), WorkerExit::Stopped));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn decode_line_strips_terminators_and_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[test]
    fn child_source_reads_real_process_output() {
        if cfg!(windows) {
            return;
        }
        let mut child = std::process::Command::new("sh")
            .args(["-c", "printf 'one\\ntwo\\r\\nthree'"])
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let stdout = child.stdout.take().expect("stdout");
        let mut source = ChildLineSource::new(stdout);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while !source.is_finished() {
            assert!(std::time::Instant::now() < deadline, "reader never finished");
            if let Some(line) = source.next_line(Duration::from_millis(20)).expect("read") {
                seen.push(line);
            }
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
        let _ = child.wait();
    }

    #[test]
    fn quiet_producer_still_gets_flushed() {
        if cfg!(windows) {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logcat.txt");
        let policy = FlushPolicy {
            max_lines: 100,
            max_delay: Duration::from_millis(50),
        };
        let sink: SinkSlot = Arc::new(Mutex::new(Some(open_file_sink(&path, policy).expect("sink"))));
        let running = Arc::new(AtomicBool::new(true));
        let mut child = std::process::Command::new("sh")
            .args(["-c", "echo 'ERR one'; exec sleep 5"])
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let stdout = child.stdout.take().expect("stdout");
        let (tx, rx) = mpsc::channel();
        let mut worker = CaptureWorker::new(
            SessionId::new(),
            "trace-quiet",
            ChildLineSource::new(stdout),
            LineFilter::new(KeywordSet::parse("ERR"), false),
            tx,
            Arc::clone(&sink),
            Arc::clone(&running),
            Duration::from_millis(10),
        );
        let handle = std::thread::spawn(move || worker.run());

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("relayed"), "ERR one");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::fs::read_to_string(&path).expect("read") != "ERR one\n" {
            assert!(std::time::Instant::now() < deadline, "line never reached the file");
            std::thread::sleep(Duration::from_millis(20));
        }

        running.store(false, Ordering::SeqCst);
        assert!(matches!(handle.join().expect("join"), WorkerExit::Stopped));
        let _ = child.kill();
        let _ = child.wait();
    }
}
