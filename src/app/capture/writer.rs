use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_lines: usize,
    pub max_delay: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_lines: 100,
            max_delay: Duration::from_millis(500),
        }
    }
}

/// Buffers matched lines and writes them out in chunks.
///
/// A flush happens after a push once the buffer holds `max_lines` lines or
/// `max_delay` has passed since the previous flush. Callers that go quiet call
/// `flush_if_due` so a buffered line never waits longer than `max_delay` plus one
/// idle tick. `finish` writes whatever is left, so only an abrupt kill of the
/// host process can lose the pending chunk.
pub struct BatchedWriter<W: Write, C: Clock = SystemClock> {
    sink: W,
    pending: Vec<String>,
    policy: FlushPolicy,
    clock: C,
    last_flush: Instant,
    written: u64,
}

pub type FileSink = BatchedWriter<File, SystemClock>;

impl<W: Write> BatchedWriter<W, SystemClock> {
    pub fn new(sink: W, policy: FlushPolicy) -> Self {
        Self::with_clock(sink, policy, SystemClock)
    }
}

impl<W: Write, C: Clock> BatchedWriter<W, C> {
    pub fn with_clock(sink: W, policy: FlushPolicy, clock: C) -> Self {
        let last_flush = clock.now();
        Self {
            sink,
            pending: Vec::with_capacity(policy.max_lines.min(1024)),
            policy,
            clock,
            last_flush,
            written: 0,
        }
    }

    /// Buffers one line; returns `true` when this push triggered a flush.
    pub fn push(&mut self, line: String) -> io::Result<bool> {
        self.pending.push(line);
        if self.pending.len() >= self.policy.max_lines
            || self.clock.now().duration_since(self.last_flush) >= self.policy.max_delay
        {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Time-based flush for when no push arrives. Returns `true` when it wrote.
    pub fn flush_if_due(&mut self) -> io::Result<bool> {
        if self.pending.is_empty()
            || self.clock.now().duration_since(self.last_flush) < self.policy.max_delay
        {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let mut chunk = String::with_capacity(self.pending.iter().map(|l| l.len() + 1).sum());
            for line in &self.pending {
                chunk.push_str(line);
                chunk.push('\n');
            }
            self.sink.write_all(chunk.as_bytes())?;
            self.written += self.pending.len() as u64;
            self.pending.clear();
        }
        self.sink.flush()?;
        self.last_flush = self.clock.now();
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn lines_written(&self) -> u64 {
        self.written
    }

    /// Flushes the remainder and hands back the sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.sink)
    }
}

/// Opens `path` for appending, creating parent directories and the file as needed.
pub fn open_file_sink(path: &Path, policy: FlushPolicy) -> io::Result<FileSink> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BatchedWriter::new(file, policy))
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualClock;
    use super::*;

    fn lines(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("line {i}")).collect()
    }

    fn text(writer: &BatchedWriter<Vec<u8>, ManualClock>) -> String {
        String::from_utf8(writer.sink.clone()).expect("utf8")
    }

    #[test]
    fn flushes_when_count_threshold_is_reached() {
        let clock = ManualClock::new();
        let mut writer = BatchedWriter::with_clock(Vec::new(), FlushPolicy::default(), clock);

        for (index, line) in lines(0..99).into_iter().enumerate() {
            assert!(!writer.push(line).expect("push"), "flushed early at {index}");
        }
        assert_eq!(writer.pending_len(), 99);
        assert!(text(&writer).is_empty());

        assert!(writer.push("line 99".to_string()).expect("push"));
        assert_eq!(writer.pending_len(), 0);
        assert_eq!(writer.lines_written(), 100);
        assert_eq!(text(&writer).lines().count(), 100);
    }

    #[test]
    fn flushes_when_interval_elapses() {
        let clock = ManualClock::new();
        let mut writer =
            BatchedWriter::with_clock(Vec::new(), FlushPolicy::default(), clock.clone());

        assert!(!writer.push("a".to_string()).expect("push"));
        clock.advance(Duration::from_millis(499));
        assert!(!writer.push("b".to_string()).expect("push"));
        clock.advance(Duration::from_millis(1));
        assert!(writer.push("c".to_string()).expect("push"));
        assert_eq!(text(&writer), "a\nb\nc\n");

        // The interval restarts at the flush.
        clock.advance(Duration::from_millis(300));
        assert!(!writer.push("d".to_string()).expect("push"));
        assert_eq!(writer.pending_len(), 1);
    }

    #[test]
    fn idle_gap_flushes_without_another_push() {
        let clock = ManualClock::new();
        let mut writer =
            BatchedWriter::with_clock(Vec::new(), FlushPolicy::default(), clock.clone());

        assert!(!writer.flush_if_due().expect("idle"));
        assert!(!writer.push("ERR one".to_string()).expect("push"));
        clock.advance(Duration::from_millis(200));
        assert!(!writer.flush_if_due().expect("early"));
        assert!(text(&writer).is_empty());

        clock.advance(Duration::from_millis(300));
        assert!(writer.flush_if_due().expect("due"));
        assert_eq!(text(&writer), "ERR one\n");
        assert_eq!(writer.pending_len(), 0);

        clock.advance(Duration::from_secs(5));
        assert!(!writer.flush_if_due().expect("nothing pending"));
    }

    #[test]
    fn finish_writes_the_remainder_in_order() {
        let clock = ManualClock::new();
        let mut writer = BatchedWriter::with_clock(Vec::new(), FlushPolicy::default(), clock);
        for line in lines(0..150) {
            writer.push(line).expect("push");
        }
        assert_eq!(writer.pending_len(), 50);
        let sink = writer.finish().expect("finish");
        let written = String::from_utf8(sink).expect("utf8");
        let expected: Vec<String> = lines(0..150);
        assert_eq!(written.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn file_sink_appends_and_creates_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("logcat.txt");

        let mut first = open_file_sink(&path, FlushPolicy::default()).expect("open");
        first.push("first".to_string()).expect("push");
        first.finish().expect("finish");

        let mut second = open_file_sink(&path, FlushPolicy::default()).expect("reopen");
        second.push("second".to_string()).expect("push");
        second.finish().expect("finish");

        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content, "first\nsecond\n");
    }
}
