//! Shared identity types used across the application.

use std::fmt;

use serde::Deserialize;

/// Identifier of a chat server (a Discord guild).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u64);

impl ServerId {
    /// Sentinel for direct messages and anything outside a server.
    pub const DIRECT: ServerId = ServerId(0);
    /// Sentinel for the process's own log stream.
    pub const INTERNAL: ServerId = ServerId(u64::MAX);

    /// Whether this is one of the reserved sentinel identities.
    pub fn is_sentinel(&self) -> bool {
        *self == Self::DIRECT || *self == Self::INTERNAL
    }
}

/// Identifier of a channel within a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

/// Backend-assigned message identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthorId(pub u64);

impl AuthorId {
    /// Author used for synthetic events produced inside the process.
    pub const SYSTEM: AuthorId = AuthorId(0);
}

/// A resolved (server, channel) pair. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelRef {
    pub server: ServerId,
    pub channel: ChannelId,
}

impl ChannelRef {
    pub fn new(server: u64, channel: u64) -> Self {
        Self {
            server: ServerId(server),
            channel: ChannelId(channel),
        }
    }

    /// Channel reference for a direct message conversation.
    pub fn direct(channel: u64) -> Self {
        Self {
            server: ServerId::DIRECT,
            channel: ChannelId(channel),
        }
    }

    /// The synthetic origin used for log records promoted to relay events.
    pub fn log_relay() -> Self {
        Self {
            server: ServerId::INTERNAL,
            channel: ChannelId(0),
        }
    }

    /// Whether this reference names something other than a real server channel.
    pub fn is_synthetic(&self) -> bool {
        self.server.is_sentinel()
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.server {
            ServerId::DIRECT => write!(f, "dm/{}", self.channel.0),
            ServerId::INTERNAL => write!(f, "internal/{}", self.channel.0),
            ServerId(server) => write!(f, "{}/{}", server, self.channel.0),
        }
    }
}

/// Author of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: AuthorId,
    /// Display name shown in attribution.
    pub name: String,
}

impl Author {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: AuthorId(id),
            name: name.into(),
        }
    }
}

/// Reference to a file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
}
