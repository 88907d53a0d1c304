//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `RELAYBOT_DISCORD_TOKEN` - Discord bot token
//! - `RELAYBOT_LOG_RELAY_LEVEL` - Minimum severity relayed to the log feed
//! - `RELAYBOT_CONFIG` - Path of the config file itself

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "RELAYBOT";

/// Apply environment variable overrides to a config.
///
/// This allows the bot token to be provided via the environment
/// instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.token = token;
    }

    if let Ok(level) = env::var(format!("{}_LOG_RELAY_LEVEL", ENV_PREFIX)) {
        config.log_relay.min_level = level;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `RELAYBOT_CONFIG` environment variable, otherwise returns "relaybot.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "relaybot.conf".to_string())
}
