//! Content filtering with regex patterns.
//!
//! Blocks messages matching configurable patterns, and messages that are bot
//! commands typed into a relayed channel, from being mirrored.

use fancy_regex::Regex;
use tracing::warn;

use crate::config::types::{FiltersConfig, RelayConfig};

/// Content filter applied before fan-out.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    /// Compiled block patterns.
    patterns: Vec<CompiledPattern>,
    /// Command prefixes; messages starting with one are not relayed.
    ignore_prefixes: Vec<String>,
}

/// A compiled regex pattern with its original string for debugging.
#[derive(Debug, Clone)]
struct CompiledPattern {
    original: String,
    regex: Regex,
}

impl ContentFilter {
    /// Create a new filter from pattern strings and command prefixes.
    ///
    /// Invalid regex patterns are logged and skipped.
    pub fn new(patterns: Vec<String>, ignore_prefixes: Vec<String>) -> Self {
        Self {
            patterns: compile_patterns(patterns),
            ignore_prefixes: ignore_prefixes
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Create an empty filter that allows all messages.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the filter from configuration.
    pub fn from_config(relay: &RelayConfig, filters: Option<&FiltersConfig>) -> Self {
        let patterns = match filters {
            Some(f) if f.enabled => f.patterns.clone().unwrap_or_default(),
            _ => Vec::new(),
        };
        Self::new(patterns, relay.ignore_prefixes.clone())
    }

    /// Check if a message should be blocked.
    ///
    /// Returns `true` if the message is a command or matches any pattern.
    pub fn should_filter(&self, message: &str) -> bool {
        let trimmed = message.trim_start();
        if self
            .ignore_prefixes
            .iter()
            .any(|prefix| trimmed.starts_with(prefix.as_str()))
        {
            return true;
        }

        self.patterns.iter().any(|p| {
            p.regex.is_match(message).unwrap_or_else(|e| {
                warn!("Regex match error for pattern '{}': {}", p.original, e);
                false
            })
        })
    }
}

/// Compile a list of regex pattern strings, skipping invalid ones.
fn compile_patterns(patterns: Vec<String>) -> Vec<CompiledPattern> {
    patterns
        .into_iter()
        .filter_map(|pattern| match Regex::new(&pattern) {
            Ok(regex) => Some(CompiledPattern {
                original: pattern,
                regex,
            }),
            Err(e) => {
                warn!("Invalid filter regex pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}
