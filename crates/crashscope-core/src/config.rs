//! Session limits.
//!
//! A crash dump is untrusted input: a corrupted list can loop forever and a
//! smashed string can run across a whole page. Every unbounded walk in the
//! crate is capped by one of these limits.

use std::env;

/// Default ceiling for intrusive list walks
pub const DEFAULT_MAX_LIST_STEPS: usize = 1 << 20;

/// Default ceiling for decoder chains
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 64;

/// Default ceiling for NUL-terminated string reads through a pointer
pub const DEFAULT_MAX_STRING_LEN: usize = 4096;

const LIST_LIMIT_VAR: &str = "CRASHSCOPE_LIST_LIMIT";
const CHAIN_LIMIT_VAR: &str = "CRASHSCOPE_CHAIN_LIMIT";
const STRING_LIMIT_VAR: &str = "CRASHSCOPE_STRING_LIMIT";

/// Limits applied to every traversal in a session
///
/// ## Example
///
/// ```rust
/// use crashscope_core::config::SessionConfig;
///
/// let config = SessionConfig::default().with_max_list_steps(16);
/// assert_eq!(config.max_list_steps, 16);
/// assert_eq!(config.max_chain_depth, 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig
{
    /// Maximum number of nodes a single list walk may yield
    pub max_list_steps: usize,
    /// Maximum number of entries in a single decoder chain
    pub max_chain_depth: usize,
    /// Maximum number of bytes read for a `char *` string
    pub max_string_len: usize,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        Self {
            max_list_steps: DEFAULT_MAX_LIST_STEPS,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

impl SessionConfig
{
    /// Defaults, overridden by `CRASHSCOPE_LIST_LIMIT`,
    /// `CRASHSCOPE_CHAIN_LIMIT` and `CRASHSCOPE_STRING_LIMIT`
    ///
    /// Values that are not positive integers are ignored with a warning.
    pub fn from_env() -> Self
    {
        let defaults = Self::default();
        Self {
            max_list_steps: limit_from_env(LIST_LIMIT_VAR, defaults.max_list_steps),
            max_chain_depth: limit_from_env(CHAIN_LIMIT_VAR, defaults.max_chain_depth),
            max_string_len: limit_from_env(STRING_LIMIT_VAR, defaults.max_string_len),
        }
    }

    #[must_use]
    pub fn with_max_list_steps(mut self, steps: usize) -> Self
    {
        self.max_list_steps = steps;
        self
    }

    #[must_use]
    pub fn with_max_chain_depth(mut self, depth: usize) -> Self
    {
        self.max_chain_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_string_len(mut self, len: usize) -> Self
    {
        self.max_string_len = len;
        self
    }
}

fn limit_from_env(var: &str, default: usize) -> usize
{
    match env::var(var) {
        Ok(raw) => parse_limit(&raw).unwrap_or_else(|| {
            tracing::warn!(var, value = %raw, default, "ignoring invalid limit");
            default
        }),
        Err(_) => default,
    }
}

fn parse_limit(raw: &str) -> Option<usize>
{
    raw.trim().parse::<usize>().ok().filter(|&value| value > 0)
}
