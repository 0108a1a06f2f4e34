//! Pluggable log sink.
//!
//! The bridge reports through the `log` facade. [`init`] installs a logger
//! that forwards those records to a process-wide [`LogSink`], which starts
//! as a no-op and can be replaced at any time: by a stderr or `tracing`
//! sink on the native side, or by [`ManagedLogSink`] to route messages into
//! the managed application's own logger.

use std::cell::Cell;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::member::StaticMethod;

/// Severity of a sink message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Single-letter indicator used in sink output.
    pub fn indicator(self) -> char {
        match self {
            LogLevel::Debug => 'D',
            LogLevel::Info => 'I',
            LogLevel::Warn => 'W',
            LogLevel::Error => 'E',
        }
    }

    /// Integer level used across the managed boundary.
    pub fn as_raw(self) -> i32 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }

    /// Converts a managed-side level. Out-of-range values clamp.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            i32::MIN..=0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }

    /// Parses a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Destination for bridge log messages.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, tag: &str, message: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn log(&self, _level: LogLevel, _tag: &str, _message: &str) {}
}

/// Writes `tag [L]: message` lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{} [{}]: {}", tag, level.indicator(), message);
    }
}

/// Forwards messages as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(tag, "{}", message),
            LogLevel::Info => tracing::info!(tag, "{}", message),
            LogLevel::Warn => tracing::warn!(tag, "{}", message),
            LogLevel::Error => tracing::error!(tag, "{}", message),
        }
    }
}

/// Signature of the managed logging entry point.
pub const MANAGED_LOG_SIGNATURE: &str = "(ILjava/lang/String;)V";

/// Forwards messages to a static managed method taking `(int, String)`.
///
/// The tag is prepended to the message as `tag: message`. If the call
/// fails the message goes to stderr instead.
pub struct ManagedLogSink {
    bridge: Arc<Bridge>,
    method: StaticMethod<()>,
}

impl ManagedLogSink {
    pub fn new(bridge: Arc<Bridge>, class: &str, method: &str) -> Self {
        Self {
            bridge,
            method: StaticMethod::new(class, method, MANAGED_LOG_SIGNATURE),
        }
    }
}

impl LogSink for ManagedLogSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str) {
        let text = format!("{}: {}", tag, message);
        let result = self.bridge.with_attached_thread(|env| {
            self.method
                .call(env, &[level.as_raw().into(), text.as_str().into()])
        });
        if let Err(e) = result {
            StderrSink.log(level, tag, message);
            StderrSink.log(LogLevel::Warn, tag, &format!("managed log sink failed: {}", e));
        }
    }
}

static SINK: Lazy<RwLock<Arc<dyn LogSink>>> = Lazy::new(|| RwLock::new(Arc::new(NoopSink)));
static TAG: Lazy<RwLock<String>> =
    Lazy::new(|| RwLock::new(crate::config::defaults::LOG_TAG.to_string()));
static MIN_LEVEL: AtomicU8 = AtomicU8::new(0);

thread_local! {
    // Set while a sink runs; a sink that logs through the bridge must not
    // feed back into itself.
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

/// Replaces the process-wide sink.
pub fn set_sink(sink: Arc<dyn LogSink>) {
    *SINK.write() = sink;
}

/// Returns the current sink.
pub fn sink() -> Arc<dyn LogSink> {
    SINK.read().clone()
}

/// Restores the no-op sink.
pub fn reset_sink() {
    set_sink(Arc::new(NoopSink));
}

/// Sets the tag passed to the sink for bridge diagnostics.
pub fn set_tag(tag: &str) {
    *TAG.write() = tag.to_string();
}

pub fn tag() -> String {
    TAG.read().clone()
}

/// Drops messages below `level`.
pub fn set_min_level(level: LogLevel) {
    MIN_LEVEL.store(level.as_raw() as u8, Ordering::Relaxed);
}

pub fn min_level() -> LogLevel {
    LogLevel::from_raw(MIN_LEVEL.load(Ordering::Relaxed) as i32)
}

/// Marks the current thread as inside a sink until dropped, including
/// when the sink unwinds.
struct SinkGuard;

impl SinkGuard {
    fn enter() -> Option<Self> {
        (!IN_SINK.with(|f| f.replace(true))).then_some(SinkGuard)
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        IN_SINK.with(|f| f.set(false));
    }
}

/// Sends one message to the current sink, subject to the level filter.
pub fn log(level: LogLevel, tag: &str, message: &str) {
    if level < min_level() {
        return;
    }
    let Some(_guard) = SinkGuard::enter() else {
        return;
    };
    let current = sink();
    current.log(level, tag, message);
}

/// `log` facade adapter that feeds records into the sink.
struct SinkLogger;

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        LogLevel::from(metadata.level()) >= min_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            log(record.level().into(), &tag(), &record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Routes the crate's `log` output into the sink.
///
/// Fails if another `log` implementation is already installed.
pub fn init() -> BridgeResult<()> {
    log::set_boxed_logger(Box::new(SinkLogger))
        .map_err(|e| BridgeError::config("logger", e.to_string()))?;
    log::set_max_level(log::LevelFilter::Debug);
    Ok(())
}
