//! Loop guard.
//!
//! Decides from the event alone whether it may be relayed. Every outbound
//! payload ends with [`LOOP_MARKER`], and every relayed send is authored by the
//! bot's own identity, so a copy that comes back in as an inbound event is
//! recognised by either signal and dropped.

use crate::common::messages::{EventKind, InboundEvent};
use crate::common::types::AuthorId;
use crate::relay::registry::SharedRegistry;

/// Invisible suffix carried by every relayed copy.
pub const LOOP_MARKER: &str = "\u{2063}\u{200B}";

/// Why an event must not be relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Origin channel is in no relay group.
    Ungrouped,
    /// Content carries the loop marker.
    RelayedCopy,
    /// Authored by the bot's relay identity.
    OwnMessage,
}

/// Stateless loop-prevention check.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    registry: SharedRegistry,
    relay_identity: AuthorId,
}

impl LoopGuard {
    pub fn new(registry: SharedRegistry, relay_identity: AuthorId) -> Self {
        Self {
            registry,
            relay_identity,
        }
    }

    /// Classify an event, naming the rule that rejects it.
    ///
    /// Delete events carry no author or content, so only group membership
    /// applies to them.
    pub fn check(&self, event: &InboundEvent) -> Result<(), Rejection> {
        if !self.registry.is_grouped(&event.origin) {
            return Err(Rejection::Ungrouped);
        }

        let body = match &event.kind {
            EventKind::Created(body) => body,
            EventKind::Edited { body, .. } => body,
            EventKind::Deleted => return Ok(()),
        };

        if body.author.id == self.relay_identity {
            return Err(Rejection::OwnMessage);
        }
        if is_marked(&body.content) {
            return Err(Rejection::RelayedCopy);
        }

        Ok(())
    }

    /// Whether the event may be fanned out.
    pub fn should_relay(&self, event: &InboundEvent) -> bool {
        self.check(event).is_ok()
    }
}

/// Whether content ends with the loop marker.
pub fn is_marked(content: &str) -> bool {
    content.trim_end_matches(char::is_whitespace).ends_with(LOOP_MARKER)
}
