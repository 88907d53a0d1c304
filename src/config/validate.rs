//! Configuration validation.
//!
//! Everything the relay engine assumes about its configuration is checked
//! here, before the engine starts: groups have at least two members, no
//! channel belongs to two groups, ids are real, patterns compile.

use std::collections::HashMap;
use std::str::FromStr;

use fancy_regex::Regex;
use tracing::level_filters::LevelFilter;

use crate::common::error::ConfigError;
use crate::common::types::ChannelRef;
use crate::config::types::{ChannelEntry, Config};

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.discord.token.is_empty() {
        errors.push("discord.token is required".to_string());
    }
    if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push("discord.token has not been configured (still using placeholder)".to_string());
    }
    if config.discord.max_message_length < 64 {
        errors.push(format!(
            "discord.max_message_length must be at least 64 (got {})",
            config.discord.max_message_length
        ));
    }

    if !config.relay.format.contains("%message") {
        errors.push("relay.format must contain %message".to_string());
    }

    // Channel -> name of the group that claimed it first
    let mut owners: HashMap<ChannelRef, &str> = HashMap::new();

    for (i, group) in config.relay.groups.iter().enumerate() {
        if group.name.is_empty() {
            errors.push(format!("relay.groups[{}].name is required", i));
        }
        if group.channels.len() < 2 {
            errors.push(format!(
                "relay.groups[{}] '{}' must contain at least two channels (got {})",
                i,
                group.name,
                group.channels.len()
            ));
        }

        for (j, entry) in group.channels.iter().enumerate() {
            let field = format!("relay.groups[{}].channels[{}]", i, j);
            check_entry(&field, entry, &mut errors);

            match owners.get(&entry.channel_ref()) {
                Some(owner) if *owner == group.name => errors.push(format!(
                    "{} lists channel {} twice in group '{}'",
                    field,
                    entry.channel_ref(),
                    group.name
                )),
                Some(owner) => errors.push(format!(
                    "{} channel {} is already a member of group '{}' (groups must not overlap)",
                    field,
                    entry.channel_ref(),
                    owner
                )),
                None => {
                    owners.insert(entry.channel_ref(), &group.name);
                }
            }
        }
    }

    if config.log_relay.enabled {
        if LevelFilter::from_str(&config.log_relay.min_level).is_err() {
            errors.push(format!(
                "log_relay.min_level '{}' is invalid (use: error, warn, info, debug, trace, off)",
                config.log_relay.min_level
            ));
        }
        if config.log_relay.destinations.is_empty() {
            errors.push("log_relay.destinations is empty but log relay is enabled".to_string());
        }
        for (i, entry) in config.log_relay.destinations.iter().enumerate() {
            check_entry(&format!("log_relay.destinations[{}]", i), entry, &mut errors);
        }
    }

    if config.correlation.sweep_interval_secs == 0 {
        errors.push("correlation.sweep_interval_secs must be greater than zero".to_string());
    }

    if let Some(ref filters) = config.filters {
        if let Some(ref patterns) = filters.patterns {
            for (i, pattern) in patterns.iter().enumerate() {
                if Regex::new(pattern).is_err() {
                    errors.push(format!(
                        "filters.patterns[{}] is not a valid regex: '{}'",
                        i, pattern
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

fn check_entry(field: &str, entry: &ChannelEntry, errors: &mut Vec<String>) {
    if entry.channel_ref().is_synthetic() {
        errors.push(format!(
            "{}.server {} is reserved and cannot be relayed",
            field, entry.server
        ));
    }
    if entry.channel == 0 {
        errors.push(format!("{}.channel must be non-zero", field));
    }
}
