//! Buffered, durable, rotating file sink

use super::{Sink, SinkMetrics};
use crate::config::{FileSettings, LogLevel};
use crate::error::{LogError, LogResult};
use crate::format::{LogEntry, LogFormatter};
use crate::rotation::LogRotator;
use crate::telemetry::{last_resort, ErrorCategory, ErrorReport, ErrorTracker};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// File sink that batches lines in memory.
///
/// A flush happens when the pending bytes reach the byte threshold or when
/// the time since the last flush reaches the interval; both are checked on
/// each write. A flush writes the batch in order, syncs the file, and
/// rotates between lines whenever the next line would push a non-empty
/// file past the size limit. Lines are never split across files.
///
/// Write failures never reach the caller. They are reported to the error
/// tracker (`file-io` or `rotation`) and the affected lines are dropped and
/// counted.
pub struct BufferedFileSink {
    /// Sink name
    name: String,

    /// Minimum log level
    min_level: LogLevel,

    /// Formatter
    formatter: Box<dyn LogFormatter>,

    /// Live file path
    path: PathBuf,

    /// Flush once this many bytes are pending
    flush_threshold: usize,

    /// Flush once this long has passed since the last flush
    flush_interval: Duration,

    /// Everything that changes, behind one lock
    state: Mutex<FileState>,

    /// Where write failures go
    reporter: Option<Arc<ErrorTracker>>,
}

struct FileState {
    rotator: LogRotator,
    buffer: Vec<String>,
    pending_bytes: usize,
    last_flush: Instant,
    metrics: SinkMetrics,
    closed: bool,
}

impl BufferedFileSink {
    /// Open the file (creating parent directories) and build the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(
        name: impl Into<String>,
        settings: FileSettings,
        min_level: LogLevel,
        formatter: Box<dyn LogFormatter>,
        reporter: Option<Arc<ErrorTracker>>,
    ) -> LogResult<Self> {
        let rotator = LogRotator::new(&settings.path, settings.max_size, settings.backup_count)?;

        Ok(Self {
            name: name.into(),
            min_level,
            formatter,
            path: settings.path,
            flush_threshold: settings.flush_threshold,
            flush_interval: settings.flush_interval,
            state: Mutex::new(FileState {
                rotator,
                buffer: Vec::new(),
                pending_bytes: 0,
                last_flush: Instant::now(),
                metrics: SinkMetrics::default(),
                closed: false,
            }),
            reporter,
        })
    }

    /// Live file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes waiting for the next flush
    pub fn pending_bytes(&self) -> usize {
        self.lock().pending_bytes
    }

    /// Lines waiting for the next flush
    pub fn buffered_lines(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer one already-formatted line, flushing if a threshold is hit.
    /// Ignored once the sink is closed.
    pub fn write_line(&self, line: String) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        state.pending_bytes += line.len() + 1;
        state.buffer.push(line);
        state.metrics.writes += 1;

        if state.pending_bytes >= self.flush_threshold || state.last_flush.elapsed() >= self.flush_interval {
            self.flush_locked(&mut state);
        }
    }

    fn flush_locked(&self, state: &mut FileState) {
        state.last_flush = Instant::now();
        if state.buffer.is_empty() {
            return;
        }

        let lines = std::mem::take(&mut state.buffer);
        state.pending_bytes = 0;
        let total = lines.len();
        // Lines handed to the rotator but not yet in the file
        let mut unflushed = 0u64;

        for (index, line) in lines.iter().enumerate() {
            let incoming = line.len() as u64 + 1;
            if state.rotator.needs_rotation(incoming) {
                // Land everything before this line in the file being rotated out
                match state.rotator.flush() {
                    Ok(flushed) => state.metrics.bytes_written += flushed,
                    Err(err) => self.drop_lines(state, unflushed, err),
                }
                unflushed = 0;

                match state.rotator.rotate() {
                    Ok(()) => state.metrics.rotations += 1,
                    Err(err) => self.report(ErrorReport::new(ErrorCategory::Rotation, err)),
                }
            }

            if let Err(err) = state.rotator.write_line(line) {
                let dropped = unflushed + (total - index) as u64;
                self.drop_lines(state, dropped, err);
                return;
            }
            unflushed += 1;
        }

        match state.rotator.flush() {
            Ok(flushed) => {
                state.metrics.bytes_written += flushed;
                state.metrics.flushes += 1;
            },
            Err(err) => {
                self.drop_lines(state, unflushed, err);
                return;
            },
        }

        if let Err(err) = state.rotator.sync_data() {
            self.report(ErrorReport::new(ErrorCategory::FileIo, err));
        }
    }

    fn drop_lines(&self, state: &mut FileState, dropped: u64, err: LogError) {
        state.metrics.dropped_lines += dropped;
        self.report(ErrorReport::new(ErrorCategory::FileIo, err).context("dropped_lines", dropped));
    }

    fn report(&self, report: ErrorReport) {
        let report = report
            .component("BufferedFileSink")
            .context("path", self.path.display());
        match &self.reporter {
            Some(tracker) => tracker.track(report),
            None => last_resort(&format!("{}: {}", report.category, report.message)),
        }
    }
}

impl Sink for BufferedFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn emit(&self, entry: &LogEntry) -> LogResult<()> {
        if !self.should_log(entry.level) {
            return Ok(());
        }
        let formatted = self.formatter.format(entry)?;
        self.write_line(formatted);
        Ok(())
    }

    fn flush(&self) -> LogResult<()> {
        let mut state = self.lock();
        if !state.closed {
            self.flush_locked(&mut state);
        }
        Ok(())
    }

    fn close(&self) -> LogResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        self.flush_locked(&mut state);
        if let Err(err) = state.rotator.close() {
            self.report(ErrorReport::new(ErrorCategory::FileIo, err));
        }
        state.closed = true;
        Ok(())
    }

    fn metrics(&self) -> SinkMetrics {
        self.lock().metrics
    }
}

impl Drop for BufferedFileSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvOverrides;
    use crate::format::TextFormatter;
    use crate::rotation::existing_backups;
    use crate::telemetry::ErrorTrackerConfig;
    use std::fs;
    use tempfile::tempdir;

    fn formatter() -> Box<dyn LogFormatter> {
        let layout = EnvOverrides {
            message_format: "{message}".to_string(),
            ..EnvOverrides::default()
        };
        Box::new(TextFormatter::new(Arc::new(layout)))
    }

    fn settings(path: &Path) -> FileSettings {
        FileSettings {
            flush_interval: Duration::from_secs(3600),
            ..FileSettings::new(path)
        }
    }

    fn open(settings: FileSettings) -> BufferedFileSink {
        BufferedFileSink::open("test", settings, LogLevel::Debug, formatter(), None).unwrap()
    }

    fn info(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, "test", message)
    }

    #[test]
    fn test_lines_buffer_until_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(FileSettings {
            flush_threshold: 32,
            ..settings(&path)
        });

        sink.emit(&info("0123456789")).unwrap();
        assert_eq!(sink.buffered_lines(), 1);
        assert_eq!(sink.pending_bytes(), 11);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        sink.emit(&info("0123456789")).unwrap();
        sink.emit(&info("0123456789")).unwrap();
        assert_eq!(sink.buffered_lines(), 0);
        assert_eq!(sink.pending_bytes(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
        assert_eq!(sink.metrics().flushes, 1);
    }

    #[test]
    fn test_oversized_line_flushes_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(FileSettings {
            flush_threshold: 8,
            ..settings(&path)
        });

        sink.emit(&info(&"x".repeat(100))).unwrap();
        assert_eq!(sink.buffered_lines(), 0);
        assert_eq!(sink.pending_bytes(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap().len(), 101);
    }

    #[test]
    fn test_elapsed_interval_flushes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(FileSettings {
            flush_interval: Duration::ZERO,
            ..settings(&path)
        });

        sink.emit(&info("short")).unwrap();
        assert_eq!(sink.buffered_lines(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "short\n");
    }

    #[test]
    fn test_rotation_keeps_lines_whole() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(FileSettings {
            max_size: 64,
            backup_count: 10,
            flush_threshold: 0,
            ..settings(&path)
        });

        let lines: Vec<String> = (0..20).map(|i| format!("line-{i:04}-padding")).collect();
        for line in &lines {
            sink.emit(&info(line)).unwrap();
        }
        sink.close().unwrap();

        let mut files = existing_backups(&path);
        files.reverse();
        files.push(path.clone());

        let mut seen = Vec::new();
        for file in &files {
            let content = fs::read_to_string(file).unwrap();
            assert!(content.len() <= 64, "{} is {} bytes", file.display(), content.len());
            seen.extend(content.lines().map(str::to_string));
        }
        assert_eq!(seen, lines);
        assert!(sink.metrics().rotations > 0);
    }

    #[test]
    fn test_rotation_bounded_by_backup_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(FileSettings {
            max_size: 20,
            backup_count: 2,
            flush_threshold: 0,
            ..settings(&path)
        });

        for i in 0..20 {
            sink.emit(&info(&format!("entry-{i:02}"))).unwrap();
        }
        sink.close().unwrap();
        assert_eq!(existing_backups(&path).len(), 2);
    }

    #[test]
    fn test_close_flushes_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(settings(&path));

        sink.emit(&info("pending")).unwrap();
        assert_eq!(sink.buffered_lines(), 1);
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.is_closed());

        sink.emit(&info("after close")).unwrap();
        sink.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "pending\n");
    }

    #[test]
    fn test_metrics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(FileSettings {
            flush_threshold: 0,
            ..settings(&path)
        });

        sink.emit(&info("abc")).unwrap();
        sink.emit(&LogEntry::new(LogLevel::Debug, "test", "de")).unwrap();
        let metrics = sink.metrics();
        assert_eq!(metrics.writes, 2);
        assert_eq!(metrics.flushes, 2);
        assert_eq!(metrics.bytes_written, 7);
        assert_eq!(metrics.dropped_lines, 0);
    }

    #[test]
    fn test_level_filter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink =
            BufferedFileSink::open("test", settings(&path), LogLevel::Error, formatter(), None).unwrap();

        sink.emit(&info("ignored")).unwrap();
        assert_eq!(sink.metrics().writes, 0);
    }

    #[test]
    fn test_unwritable_location_fails_open() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file").unwrap();

        let result = BufferedFileSink::open(
            "test",
            settings(&blocker.join("app.log")),
            LogLevel::Debug,
            formatter(),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rotation_failure_is_tracked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let tracker = ErrorTracker::new(
            ErrorTrackerConfig::default()
                .with_panic_capture(false)
                .with_backtrace(false),
        );
        let sink = BufferedFileSink::open(
            "test",
            FileSettings {
                max_size: 10,
                backup_count: 1,
                flush_threshold: 0,
                ..settings(&path)
            },
            LogLevel::Debug,
            formatter(),
            Some(Arc::clone(&tracker)),
        )
        .unwrap();

        // A directory where the first backup should go blocks the rename
        fs::create_dir(dir.path().join("app.log.1")).unwrap();
        fs::write(dir.path().join("app.log.1").join("keep"), "x").unwrap();

        sink.emit(&info("0123456789")).unwrap();
        sink.emit(&info("0123456789")).unwrap();
        sink.close().unwrap();

        assert_eq!(tracker.stats().by_category["rotation"], 1);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
        assert_eq!(sink.metrics().dropped_lines, 0);
    }

    #[test]
    fn test_multiline_message_stays_one_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = open(FileSettings {
            flush_threshold: 0,
            ..settings(&path)
        });

        sink.emit(&info("first\nINFO [app] forged")).unwrap();
        sink.emit(&info("second\r\n")).unwrap();
        sink.close().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(content, "first\\nINFO [app] forged\nsecond\\r\\n\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_flush_counts_lines_as_dropped() {
        let tracker = ErrorTracker::new(
            ErrorTrackerConfig::default()
                .with_panic_capture(false)
                .with_backtrace(false),
        );
        let sink = BufferedFileSink::open(
            "test",
            FileSettings {
                flush_threshold: 0,
                ..settings(Path::new("/dev/full"))
            },
            LogLevel::Debug,
            formatter(),
            Some(Arc::clone(&tracker)),
        )
        .unwrap();

        for i in 0..5 {
            sink.emit(&info(&format!("lost-{i}"))).unwrap();
        }

        let metrics = sink.metrics();
        assert_eq!(metrics.writes, 5);
        assert_eq!(metrics.bytes_written, 0);
        assert_eq!(metrics.flushes, 0);
        assert_eq!(metrics.dropped_lines, 5);
        assert!(tracker.stats().by_category["file-io"] >= 5);
    }
}
