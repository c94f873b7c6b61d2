//! # Logging Utilities
//!
//! Logging bootstrap for programs built on `crashscope-core`, using `tracing`.
//!
//! Analysis reports go to stdout, so log output goes to stderr (and
//! optionally a file) where it cannot interleave with a report.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crashscope_utils::init_logging;
//!
//! // Keep the guard alive for as long as logs should be written
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("opened dump");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter directives (`RUST_LOG=debug`, `RUST_LOG=crashscope_core::list=trace`)
//! - `CRASHSCOPE_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `CRASHSCOPE_LOG_FILE`: Also write logs to this file. If it names a
//!   directory, a dated `YYYY-MM-DD-crashscope.log` is created inside it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const FORMAT_VAR: &str = "CRASHSCOPE_LOG_FORMAT";
const FILE_VAR: &str = "CRASHSCOPE_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Human-readable, for interactive analysis
    Pretty,
    /// One JSON object per event, for collecting logs from batch runs
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    /// Includes one event per list node visited; very verbose on large dumps
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the background file writer running
///
/// Dropping it flushes and stops file logging. Console logging is unaffected.
#[must_use = "file logging stops when the guard is dropped"]
#[derive(Debug, Default)]
pub struct LoggingGuard
{
    _worker: Option<WorkerGuard>,
    path: Option<PathBuf>,
}

impl LoggingGuard
{
    /// Log file in use, if file logging is enabled
    pub fn log_file(&self) -> Option<&Path>
    {
        self.path.as_deref()
    }
}

/// Initialize logging from the environment
///
/// Without `RUST_LOG`, only warnings and errors are shown: a corrupt list or
/// a failed version probe is worth seeing, routine resolution is not.
///
/// ## Errors
///
/// - `InvalidFormat` for an unknown `CRASHSCOPE_LOG_FORMAT`
/// - `FileError` if the log file cannot be created
/// - `InitializationFailed` if a global subscriber is already installed
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(FORMAT_VAR) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::Pretty,
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::WARN.to_string()));
    install(format, filter, env::var(FILE_VAR).ok().map(PathBuf::from))
}

/// Initialize logging with an explicit level and format
///
/// `CRASHSCOPE_LOG_FILE` is still honoured; `RUST_LOG` is not.
///
/// ```rust,no_run
/// use crashscope_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Same as [`init_logging`].
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let filter = || EnvFilter::new(Level::from(level).to_string());
    install(format, filter, env::var(FILE_VAR).ok().map(PathBuf::from))
}

/// Route logs into the test harness's captured output
///
/// Safe to call from every test: only the first call installs a subscriber.
pub fn init_test_logging()
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::DEBUG.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// `filter` is called once per layer; each layer filters independently
fn install(format: LogFormat, filter: impl Fn() -> EnvFilter, file: Option<PathBuf>) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(format, filter())];
    let mut guard = LoggingGuard::default();

    if let Some(requested) = file {
        let path = resolve_log_file(&requested);
        let directory = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::fs::create_dir_all(&directory)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| LoggingError::InitializationFailed(format!("{} has no file name", path.display())))?;

        let appender = tracing_appender::rolling::never(&directory, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        let base = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false);
        let layer: BoxedLayer = match format {
            LogFormat::Pretty => base.with_filter(filter()).boxed(),
            LogFormat::Json => base.json().with_current_span(true).with_filter(filter()).boxed(),
        };
        layers.push(layer);
        guard = LoggingGuard {
            _worker: Some(worker),
            path: Some(path),
        };
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    if let Some(path) = guard.log_file() {
        tracing::debug!(path = %path.display(), "file logging enabled");
    }
    Ok(guard)
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    let base = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339());
    match format {
        LogFormat::Pretty => base.with_ansi(true).with_filter(filter).boxed(),
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// A directory becomes `<dir>/YYYY-MM-DD-crashscope.log`
fn resolve_log_file(requested: &Path) -> PathBuf
{
    if requested.is_dir() {
        requested.join(format!("{}-crashscope.log", Utc::now().format("%Y-%m-%d")))
    } else {
        requested.to_path_buf()
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A subscriber is already installed, or the log file path is unusable
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
