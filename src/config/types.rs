//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

use crate::common::types::ChannelRef;

/// Default attribution format for relayed messages.
pub const DEFAULT_RELAY_FORMAT: &str = "[%origin] %user: %message";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub relay: RelayConfig,
    #[serde(default)]
    pub log_relay: LogRelayConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    pub filters: Option<FiltersConfig>,
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    /// Longest message the destination accepts, in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

fn default_max_message_length() -> usize {
    2000
}

/// Relay group configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Attribution format. Placeholders: %origin, %group, %user, %message.
    #[serde(default = "default_relay_format")]
    pub format: String,
    /// Messages starting with any of these are treated as bot commands and not relayed.
    #[serde(default)]
    pub ignore_prefixes: Vec<String>,
    #[serde(default)]
    pub groups: Vec<RelayGroupConfig>,
}

fn default_relay_format() -> String {
    DEFAULT_RELAY_FORMAT.to_string()
}

/// A named set of channels that mirror each other.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayGroupConfig {
    pub name: String,
    pub channels: Vec<ChannelEntry>,
}

/// One channel in a relay group or log feed.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    pub server: u64,
    pub channel: u64,
    /// Name shown in attribution when messages originate here.
    pub label: Option<String>,
}

impl ChannelEntry {
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef::new(self.server, self.channel)
    }
}

/// Relaying of the process's own log output into chat channels.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRelayConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Lowest severity relayed ("error", "warn", "info", "debug", "trace").
    #[serde(default = "default_min_level")]
    pub min_level: String,
    /// Logging sources never relayed. Matches the source itself and its submodules.
    #[serde(default = "default_excluded_sources")]
    pub excluded_sources: Vec<String>,
    /// Attribution label of the log feed.
    #[serde(default = "default_log_label")]
    pub label: String,
    #[serde(default)]
    pub destinations: Vec<ChannelEntry>,
}

impl Default for LogRelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_level: default_min_level(),
            excluded_sources: default_excluded_sources(),
            label: default_log_label(),
            destinations: Vec::new(),
        }
    }
}

fn default_min_level() -> String {
    "warn".to_string()
}

fn default_excluded_sources() -> Vec<String> {
    vec!["serenity".to_string()]
}

fn default_log_label() -> String {
    "log".to_string()
}

/// Retention of edit/delete correlation data.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl CorrelationConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

/// Message filtering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FiltersConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Regex patterns; matching messages are not relayed.
    pub patterns: Option<Vec<String>>,
}
