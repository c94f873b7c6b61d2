//! # crashscope utilities
//!
//! Shared helpers for programs built on `crashscope-core`. Currently this is
//! the logging bootstrap: a `tracing` subscriber configured from the
//! environment, with optional file output.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with_level, init_test_logging, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
