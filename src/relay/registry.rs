//! Channel group registry.
//!
//! Static, config-derived mapping from a channel to the other members of its
//! relay group. Read-only after startup, shared without locking.
//!
//! Besides mutual groups, the registry holds receive-only feeds: a synthetic
//! source (the log relay channel) mapped to the channels that receive it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::common::types::ChannelRef;
use crate::config::types::{ChannelEntry, Config};

/// A named set of channels that mutually relay to one another.
#[derive(Debug, Clone)]
pub struct RelayGroup {
    pub name: String,
    /// Members in configuration order.
    pub members: Vec<ChannelRef>,
}

/// Lookup of relay destinations.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    groups: Vec<RelayGroup>,
    /// Index: channel -> position in `groups`.
    membership: HashMap<ChannelRef, usize>,
    /// Index: synthetic source -> receive-only destinations.
    feeds: HashMap<ChannelRef, Vec<ChannelRef>>,
    /// Attribution labels by channel.
    labels: HashMap<ChannelRef, String>,
}

impl ChannelRegistry {
    /// Build a registry from already validated groups.
    ///
    /// A channel listed in a second group is ignored there; validation rejects
    /// such configs before this point.
    pub fn new(groups: Vec<RelayGroup>) -> Self {
        let mut membership = HashMap::new();
        let mut kept = Vec::with_capacity(groups.len());

        for mut group in groups {
            let idx = kept.len();
            group.members.retain(|member| {
                if membership.contains_key(member) {
                    warn!(
                        group = %group.name,
                        channel = %member,
                        "Channel already belongs to another relay group, skipping"
                    );
                    false
                } else {
                    membership.insert(*member, idx);
                    true
                }
            });
            kept.push(group);
        }

        Self {
            groups: kept,
            membership,
            feeds: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    /// Build the registry from configuration, including the log feed.
    pub fn from_config(config: &Config) -> Self {
        let groups = config
            .relay
            .groups
            .iter()
            .map(|group| RelayGroup {
                name: group.name.clone(),
                members: group.channels.iter().map(ChannelEntry::channel_ref).collect(),
            })
            .collect();

        let mut registry = Self::new(groups);

        let log_destinations: &[ChannelEntry] = if config.log_relay.enabled {
            config.log_relay.destinations.as_slice()
        } else {
            &[]
        };
        let labelled = config
            .relay
            .groups
            .iter()
            .flat_map(|g| g.channels.iter())
            .chain(log_destinations);
        for entry in labelled {
            if let Some(ref label) = entry.label {
                registry = registry.with_label(entry.channel_ref(), label.clone());
            }
        }

        if config.log_relay.enabled {
            let destinations = log_destinations.iter().map(ChannelEntry::channel_ref).collect();
            registry = registry
                .with_feed(ChannelRef::log_relay(), destinations)
                .with_label(ChannelRef::log_relay(), config.log_relay.label.clone());
        }

        info!(
            "Relay registry: {} groups, {} channels, {} feeds",
            registry.groups.len(),
            registry.membership.len(),
            registry.feeds.len()
        );

        registry
    }

    /// Add a receive-only feed from a synthetic source.
    pub fn with_feed(mut self, source: ChannelRef, destinations: Vec<ChannelRef>) -> Self {
        let destinations = destinations
            .into_iter()
            .filter(|d| !d.is_synthetic() && *d != source)
            .collect();
        self.feeds.insert(source, destinations);
        self
    }

    /// Set the attribution label of a channel.
    pub fn with_label(mut self, channel: ChannelRef, label: impl Into<String>) -> Self {
        self.labels.insert(channel, label.into());
        self
    }

    /// All other members of the group containing `channel`, in configuration order.
    ///
    /// Empty when the channel is in no group. Synthetic channels are never
    /// returned as destinations.
    pub fn groups_containing(&self, channel: &ChannelRef) -> Vec<ChannelRef> {
        if let Some(&idx) = self.membership.get(channel) {
            return self.groups[idx]
                .members
                .iter()
                .filter(|member| *member != channel && !member.is_synthetic())
                .copied()
                .collect();
        }

        self.feeds.get(channel).cloned().unwrap_or_default()
    }

    /// Whether the channel is a relay source (a group member or a feed source).
    pub fn is_grouped(&self, channel: &ChannelRef) -> bool {
        self.membership.contains_key(channel) || self.feeds.contains_key(channel)
    }

    /// Name of the group containing the channel.
    pub fn group_name(&self, channel: &ChannelRef) -> Option<&str> {
        self.membership
            .get(channel)
            .map(|&idx| self.groups[idx].name.as_str())
    }

    /// Configured attribution label of the channel.
    pub fn label(&self, channel: &ChannelRef) -> Option<&str> {
        self.labels.get(channel).map(String::as_str)
    }
}

/// Shared registry reference for use across async tasks.
pub type SharedRegistry = Arc<ChannelRegistry>;
