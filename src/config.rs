//! Configuration module for the replace-response filter
//!
//! CRITICAL: Configuration is loaded from Envoy plugin configuration,
//! NOT from external files. This avoids file I/O in the Wasm sandbox.

use serde::Deserialize;
use thiserror::Error;

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FilterConfig {
    /// Ordered replacements applied to every response body
    #[serde(default)]
    pub replacements: Vec<ReplacementConfig>,

    /// Replace while streaming instead of buffering the whole body.
    /// Streaming drops the content-length header.
    #[serde(default)]
    pub stream: bool,

    /// Longest span a regex replacement may hold back between chunks
    #[serde(default = "default_max_match_size")]
    pub max_match_size: usize,

    /// Maximum body size to buffer (prevent OOM)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Whether to log a structured event per transformed response
    #[serde(default = "default_log_replacements")]
    pub log_replacements: bool,
}

/// One substring or regular expression replacement.
///
/// Exactly one of `search` and `search_regexp` must be set; an empty
/// string counts as unset.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ReplacementConfig {
    /// A substring to search for. Mutually exclusive with `search_regexp`.
    #[serde(default)]
    pub search: String,

    /// A regular expression to search for. Mutually exclusive with `search`.
    #[serde(default)]
    pub search_regexp: String,

    /// The replacement text. For regex searches `$1` / `${name}` expand
    /// to capture groups.
    #[serde(default)]
    pub replace: String,
}

impl ReplacementConfig {
    /// Substring replacement
    pub fn literal(search: &str, replace: &str) -> Self {
        Self {
            search: search.to_string(),
            replace: replace.to_string(),
            ..Default::default()
        }
    }

    /// Regular expression replacement
    pub fn regex(search_regexp: &str, replace: &str) -> Self {
        Self {
            search_regexp: search_regexp.to_string(),
            replace: replace.to_string(),
            ..Default::default()
        }
    }
}

/// Default regex lookahead bound (2KB)
pub const DEFAULT_MAX_MATCH_SIZE: usize = 2 * 1024;

fn default_max_match_size() -> usize {
    DEFAULT_MAX_MATCH_SIZE
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_log_replacements() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            replacements: Vec::new(),
            stream: false,
            max_match_size: default_max_match_size(),
            max_body_size: default_max_body_size(),
            log_replacements: default_log_replacements(),
        }
    }
}

impl FilterConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str =
            std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }

    /// Config with the given replacements and every other field defaulted
    pub fn with_replacements(replacements: Vec<ReplacementConfig>) -> Self {
        Self {
            replacements,
            ..Default::default()
        }
    }
}

/// Configuration errors. All of them are fatal at setup time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("no replacements configured")]
    NoReplacements,

    #[error("replacement {index}: no search or search_regexp configured")]
    MissingSearch { index: usize },

    #[error("replacement {index}: cannot specify both search and search_regexp in same replacement")]
    ConflictingSearch { index: usize },

    #[error("replacement {index}: {source}")]
    InvalidRegex {
        index: usize,
        #[source]
        source: regex::Error,
    },

    #[error("max_match_size must be greater than zero")]
    ZeroMaxMatchSize,
}

impl ConfigError {
    /// Index of the offending replacement, if the error is about one
    pub fn rule_index(&self) -> Option<usize> {
        match self {
            ConfigError::MissingSearch { index }
            | ConfigError::ConflictingSearch { index }
            | ConfigError::InvalidRegex { index, .. } => Some(*index),
            _ => None,
        }
    }
}
