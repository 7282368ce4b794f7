//! Centralized error tracking
//!
//! Logging infrastructure failures (a file that cannot be written, a sink
//! that cannot be built, a panic) are reported here instead of being
//! raised to the application. The tracker counts them by category and
//! writes a line for each to its own error log.

use crate::config::{EnvOverrides, FileSettings, LogLevel};
use crate::format::{LogEntry, TextFormatter};
use crate::sink::{BufferedFileSink, Sink};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

static SHARED: Mutex<Option<Arc<ErrorTracker>>> = Mutex::new(None);

/// Id of the tracker whose hook is currently installed (0 for none)
static HOOK_OWNER: Mutex<u64> = Mutex::new(0);

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Set while this thread is inside `track`
    static REPORTING: Cell<bool> = const { Cell::new(false) };

    /// Depth of `scoped` calls on this thread
    static SCOPED_DEPTH: Cell<usize> = const { Cell::new(0) };
}

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Layer name written on error log lines
const ERROR_LAYER: &str = "error-tracker";

/// Write straight to stderr; used when the tracker itself cannot report.
pub(crate) fn last_resort(message: &str) {
    let _ = writeln!(std::io::stderr().lock(), "layerlog: {message}");
}

/// Error tracker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTrackerConfig {
    /// Error log file; no file is written when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Also print each report to stderr
    #[serde(default)]
    pub echo_to_console: bool,

    /// Attach a backtrace when `RUST_BACKTRACE` enables one
    #[serde(default = "default_true")]
    pub capture_backtrace: bool,

    /// Install a process-wide panic hook
    #[serde(default = "default_true")]
    pub capture_panics: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ErrorTrackerConfig {
    fn default() -> Self {
        Self {
            path: None,
            echo_to_console: false,
            capture_backtrace: true,
            capture_panics: true,
        }
    }
}

impl ErrorTrackerConfig {
    /// Settings writing to `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Builder: toggle stderr echo
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_to_console = echo;
        self
    }

    /// Builder: toggle the panic hook
    pub fn with_panic_capture(mut self, capture: bool) -> Self {
        self.capture_panics = capture;
        self
    }

    /// Builder: toggle backtraces
    pub fn with_backtrace(mut self, capture: bool) -> Self {
        self.capture_backtrace = capture;
        self
    }
}

/// What kind of failure was tracked
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid configuration
    Configuration,
    /// A sink could not be built
    HandlerCreation,
    /// A file sink failed to write or flush
    FileIo,
    /// A file sink failed to rotate
    Rotation,
    /// An entry could not be formatted
    Formatting,
    /// A sink failed to write an entry
    SinkWrite,
    /// A sink extension failed
    Plugin,
    /// An operation wrapped in [`ErrorTracker::scoped`] failed
    ScopedOperation,
    /// A panic reached the panic hook
    UnhandledPanic,
    /// Application-defined category
    Custom(String),
}

impl ErrorCategory {
    /// Stable name used as the statistics key
    pub fn as_str(&self) -> &str {
        match self {
            Self::Configuration => "configuration",
            Self::HandlerCreation => "handler-creation",
            Self::FileIo => "file-io",
            Self::Rotation => "rotation",
            Self::Formatting => "formatting",
            Self::SinkWrite => "sink-write",
            Self::Plugin => "plugin",
            Self::ScopedOperation => "scoped-operation-error",
            Self::UnhandledPanic => "unhandled-panic",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure to track
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    /// Category
    pub category: ErrorCategory,
    /// Error text
    pub message: String,
    /// Reporting component
    pub component: String,
    /// Severity written to the error log
    pub severity: LogLevel,
    /// Extra context
    pub context: BTreeMap<String, String>,
}

impl ErrorReport {
    /// Create a report at ERROR severity
    pub fn new(category: ErrorCategory, error: impl fmt::Display) -> Self {
        Self {
            category,
            message: error.to_string(),
            component: "layerlog".to_string(),
            severity: LogLevel::Error,
            context: BTreeMap::new(),
        }
    }

    /// Builder: set the component
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    /// Builder: set the severity
    pub fn severity(mut self, severity: LogLevel) -> Self {
        self.severity = severity;
        self
    }

    /// Builder: add a context entry
    pub fn context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// `[component] category: message | Context: k=v, ...`
    fn render(&self) -> String {
        let mut line = format!("[{}] {}: {}", self.component, self.category, self.message);
        if !self.context.is_empty() {
            let pairs: Vec<String> = self.context.iter().map(|(k, v)| format!("{k}={v}")).collect();
            line.push_str(" | Context: ");
            line.push_str(&pairs.join(", "));
        }
        line
    }
}

/// Error counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    /// Reports tracked
    pub total_errors: u64,
    /// Reports per category name
    pub by_category: BTreeMap<String, u64>,
    /// When the latest report was tracked
    pub last_error: Option<DateTime<Local>>,
    /// Error log file, if any
    pub error_log_path: Option<PathBuf>,
}

/// Tracks logging infrastructure failures.
///
/// Tracking never fails: counts are always updated, and when writing the
/// report fails the report goes to stderr instead.
pub struct ErrorTracker {
    /// Settings
    config: ErrorTrackerConfig,

    /// Dedicated error log
    sink: Option<BufferedFileSink>,

    /// Counts
    stats: Mutex<ErrorStats>,

    /// Identifies this tracker's panic hook
    id: u64,

    /// Whether the installed hook still tracks panics
    capturing: AtomicBool,

    /// What our hook replaced, restored by `close`
    hook_link: Mutex<Option<HookLink>>,
}

struct HookLink {
    previous: Arc<PanicHook>,
    previous_owner: u64,
}

impl fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ErrorTracker {
    /// Build a tracker and, if configured, install its panic hook.
    ///
    /// An error log that cannot be opened is reported on stderr and the
    /// tracker continues without one.
    pub fn new(config: ErrorTrackerConfig) -> Arc<Self> {
        let sink = config.path.as_ref().and_then(|path| {
            let settings = FileSettings {
                flush_threshold: 0,
                flush_interval: Duration::ZERO,
                ..FileSettings::new(path)
            };
            let formatter = Box::new(TextFormatter::new(Arc::new(EnvOverrides::default())));
            match BufferedFileSink::open(ERROR_LAYER, settings, LogLevel::Debug, formatter, None) {
                Ok(sink) => Some(sink),
                Err(err) => {
                    last_resort(&format!("cannot open error log {}: {err}", path.display()));
                    None
                },
            }
        });

        let stats = ErrorStats {
            error_log_path: config.path.clone(),
            ..ErrorStats::default()
        };

        let tracker = Arc::new(Self {
            config,
            sink,
            stats: Mutex::new(stats),
            id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
            capturing: AtomicBool::new(false),
            hook_link: Mutex::new(None),
        });

        if tracker.config.capture_panics {
            tracker.install_panic_hook();
        }
        tracker
    }

    /// The process-wide tracker, created with default settings on first use
    pub fn shared() -> Arc<Self> {
        Self::shared_with(ErrorTrackerConfig::default())
    }

    /// The process-wide tracker; `config` is used only if it does not exist yet
    pub fn shared_with(config: ErrorTrackerConfig) -> Arc<Self> {
        let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(shared.get_or_insert_with(|| Self::new(config)))
    }

    /// Close and drop the process-wide tracker
    pub fn reset_shared() {
        let previous = SHARED.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tracker) = previous {
            tracker.close();
        }
    }

    /// Settings in use
    pub fn config(&self) -> &ErrorTrackerConfig {
        &self.config
    }

    fn lock_stats(&self) -> MutexGuard<'_, ErrorStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure. Never panics and never returns an error.
    pub fn track(&self, report: ErrorReport) {
        {
            let mut stats = self.lock_stats();
            stats.total_errors += 1;
            *stats
                .by_category
                .entry(report.category.as_str().to_string())
                .or_insert(0) += 1;
            stats.last_error = Some(Local::now());
        }

        // A failure while writing a report must not recurse into the tracker
        if REPORTING.with(|flag| flag.replace(true)) {
            last_resort(&report.render());
            return;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.write_report(&report)));
        REPORTING.with(|flag| flag.set(false));

        if outcome.is_err() {
            last_resort(&format!("error tracker failed while reporting: {}", report.render()));
        }
    }

    fn write_report(&self, report: &ErrorReport) {
        let mut line = report.render();
        if self.config.capture_backtrace {
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                line.push('\n');
                line.push_str(&backtrace.to_string());
            }
        }

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.emit(&LogEntry::new(report.severity, ERROR_LAYER, line.as_str())) {
                last_resort(&format!("cannot write error log: {err}: {line}"));
            }
        }
        if self.config.echo_to_console {
            last_resort(&line);
        }
    }

    /// Run `f`, tracking an `Err` or a panic as a scoped-operation error.
    ///
    /// The result is returned unchanged and a panic resumes unwinding once
    /// it has been tracked.
    pub fn scoped<T, E, F>(&self, component: &str, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let start = Instant::now();
        SCOPED_DEPTH.with(|depth| depth.set(depth.get() + 1));
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        SCOPED_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));

        let scoped_report = |message: String| {
            ErrorReport::new(ErrorCategory::ScopedOperation, message)
                .component(component)
                .context("operation", operation)
                .context("duration_ms", format!("{:.3}", start.elapsed().as_secs_f64() * 1000.0))
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.track(scoped_report(err.to_string()));
                Err(err)
            },
            Err(payload) => {
                self.track(scoped_report(format!("panic: {}", panic_message(payload.as_ref()))));
                panic::resume_unwind(payload)
            },
        }
    }

    /// Current counts
    pub fn stats(&self) -> ErrorStats {
        self.lock_stats().clone()
    }

    /// Zero the counts
    pub fn clear_stats(&self) {
        let mut stats = self.lock_stats();
        let path = stats.error_log_path.take();
        *stats = ErrorStats {
            error_log_path: path,
            ..ErrorStats::default()
        };
    }

    /// Flush the error log
    pub fn flush(&self) {
        if let Some(sink) = &self.sink {
            let _ = sink.flush();
        }
    }

    /// Restore the previous panic hook and close the error log; idempotent
    pub fn close(&self) {
        self.restore_panic_hook();
        if let Some(sink) = &self.sink {
            let _ = sink.close();
        }
    }

    fn install_panic_hook(self: &Arc<Self>) {
        if std::thread::panicking() {
            return;
        }
        let mut owner = HOOK_OWNER.lock().unwrap_or_else(PoisonError::into_inner);

        let previous: Arc<PanicHook> = Arc::new(panic::take_hook());
        let chained = Arc::clone(&previous);
        let tracker: Weak<Self> = Arc::downgrade(self);

        panic::set_hook(Box::new(move |info| {
            let in_scope = SCOPED_DEPTH.with(|depth| depth.get() > 0);
            let active = tracker
                .upgrade()
                .filter(|tracker| tracker.capturing.load(Ordering::Acquire) && !in_scope);
            if let Some(tracker) = active {
                let mut report = ErrorReport::new(ErrorCategory::UnhandledPanic, panic_message(info.payload()))
                    .component("panic-hook")
                    .severity(LogLevel::Critical);
                if let Some(location) = info.location() {
                    report = report.context("location", location);
                }
                if let Some(name) = std::thread::current().name() {
                    report = report.context("thread", name);
                }
                tracker.track(report);
            }
            (**chained)(info);
        }));

        *self.hook_link.lock().unwrap_or_else(PoisonError::into_inner) = Some(HookLink {
            previous,
            previous_owner: *owner,
        });
        *owner = self.id;
        self.capturing.store(true, Ordering::Release);
    }

    /// Stop tracking panics. The previous hook is put back only while ours
    /// is still the installed one; a hook installed on top of ours keeps
    /// working and ours stays in its chain as a pass-through.
    fn restore_panic_hook(&self) {
        if std::thread::panicking() {
            return;
        }
        let link = self.hook_link.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(link) = link else {
            return;
        };
        self.capturing.store(false, Ordering::Release);

        let mut owner = HOOK_OWNER.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == self.id {
            drop(panic::take_hook());
            let previous = link.previous;
            panic::set_hook(Box::new(move |info| (**previous)(info)));
            *owner = link.previous_owner;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
