//! Message transformer.
//!
//! Turns an inbound message into the payload posted in one destination:
//! attribution prefix, sanitized and length-limited content, attachment links,
//! and the loop marker. Output depends only on the event, the destination and
//! static configuration.
//!
//! Format placeholders: %origin, %group, %user, %message

use crate::common::messages::{InboundEvent, MessageBody, OutboundPayload};
use crate::common::types::ChannelRef;
use crate::config::types::{Config, DEFAULT_RELAY_FORMAT};
use crate::relay::guard::LOOP_MARKER;
use crate::relay::registry::SharedRegistry;

/// Appended to content cut short to fit the destination.
const ELLIPSIS: &str = "…";

/// Placeholder names recognised in format strings.
const PLACEHOLDERS: [&str; 4] = ["origin", "group", "user", "message"];

/// Message formatter that substitutes placeholders in format strings.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    format: String,
}

impl MessageFormatter {
    /// Create a new formatter with the given format string.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Format a message with the given context.
    ///
    /// Substitution is single pass, so placeholder text inside a user name or
    /// message is left alone.
    pub fn format(&self, ctx: &FormatContext) -> String {
        let mut out = String::with_capacity(self.format.len() + ctx.message.len());
        let mut rest = self.format.as_str();

        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            match PLACEHOLDERS.iter().find(|name| after.starts_with(*name)) {
                Some(name) => {
                    out.push_str(ctx.value(name));
                    rest = &after[name.len()..];
                }
                None => {
                    out.push('%');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Characters of formatted text excluding the message itself.
    pub fn overhead(&self, ctx: &FormatContext) -> usize {
        let empty = FormatContext {
            message: String::new(),
            ..ctx.clone()
        };
        self.format(&empty).chars().count()
    }
}

/// Context for message formatting.
#[derive(Debug, Clone, Default)]
pub struct FormatContext {
    /// Origin channel label.
    pub origin: String,
    /// Relay group name.
    pub group: String,
    /// The sender's name.
    pub user: String,
    /// The message content.
    pub message: String,
}

impl FormatContext {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    fn value(&self, name: &str) -> &str {
        match name {
            "origin" => &self.origin,
            "group" => &self.group,
            "user" => &self.user,
            "message" => &self.message,
            _ => "",
        }
    }
}

/// Builds destination payloads for relayed messages.
#[derive(Debug, Clone)]
pub struct MessageTransformer {
    registry: SharedRegistry,
    formatter: MessageFormatter,
    /// Destination limit in characters, marker included.
    max_length: usize,
}

impl MessageTransformer {
    pub fn new(registry: SharedRegistry, format: impl Into<String>, max_length: usize) -> Self {
        Self {
            registry,
            formatter: MessageFormatter::new(format),
            max_length,
        }
    }

    pub fn from_config(registry: SharedRegistry, config: &Config) -> Self {
        Self::new(
            registry,
            config.relay.format.clone(),
            config.discord.max_message_length,
        )
    }

    /// Create a transformer with the default format and Discord's length limit.
    pub fn with_defaults(registry: SharedRegistry) -> Self {
        Self::new(registry, DEFAULT_RELAY_FORMAT, 2000)
    }

    /// Build the payload for `destination`.
    ///
    /// Returns `None` for delete events, which need no payload.
    pub fn transform(&self, event: &InboundEvent, destination: &ChannelRef) -> Option<OutboundPayload> {
        let body = event.body()?;
        Some(self.transform_body(&event.origin, body, destination))
    }

    fn transform_body(
        &self,
        origin: &ChannelRef,
        body: &MessageBody,
        _destination: &ChannelRef,
    ) -> OutboundPayload {
        let ctx = FormatContext::new(body.author.name.as_str(), "")
            .with_origin(self.origin_label(origin, body))
            .with_group(self.registry.group_name(origin).unwrap_or(""));

        let attachments: String = body
            .attachments
            .iter()
            .map(|a| format!("\n{}", a.url))
            .collect();

        let limit = self.max_length.saturating_sub(LOOP_MARKER.chars().count());
        let budget = limit
            .saturating_sub(self.formatter.overhead(&ctx))
            .saturating_sub(attachments.chars().count());

        let message = truncate_message(&neutralize_mentions(&body.content), budget);
        let mut text = self.formatter.format(&FormatContext { message, ..ctx });
        text.push_str(&attachments);

        if text.chars().count() > limit {
            text = truncate_message(&text, limit);
        }
        text.push_str(LOOP_MARKER);

        OutboundPayload { content: text }
    }

    /// Configured label, then the backend's channel name, then the raw reference.
    fn origin_label(&self, origin: &ChannelRef, body: &MessageBody) -> String {
        self.registry
            .label(origin)
            .map(str::to_string)
            .or_else(|| body.origin_label.clone())
            .unwrap_or_else(|| origin.to_string())
    }
}

/// Break mass mentions so a relayed copy cannot ping a whole server.
pub fn neutralize_mentions(content: &str) -> String {
    content
        .replace("@everyone", "@\u{200B}everyone")
        .replace("@here", "@\u{200B}here")
}

/// Truncate a message to at most `max_chars` characters, marking the cut with an ellipsis.
///
/// Discord counts characters, not bytes, so multi-byte text keeps its full allowance.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    // Keep max_chars - 1 characters and spend the last one on the ellipsis
    let cut = message
        .char_indices()
        .nth(max_chars - 1)
        .map_or(message.len(), |(index, _)| index);
    let mut out = message[..cut].trim_end().to_string();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::common::types::{Attachment, Author, MessageId};
    use crate::relay::registry::{ChannelRegistry, RelayGroup};

    fn registry() -> SharedRegistry {
        Arc::new(
            ChannelRegistry::new(vec![RelayGroup {
                name: "lobby".to_string(),
                members: vec![ChannelRef::new(1, 10), ChannelRef::new(2, 20)],
            }])
            .with_label(ChannelRef::new(1, 10), "A"),
        )
    }

    fn body(content: &str) -> MessageBody {
        MessageBody {
            author: Author::new(5, "bob"),
            content: content.to_string(),
            attachments: Vec::new(),
            origin_label: Some("server-one #general".to_string()),
        }
    }

    #[test]
    fn test_format_substitution() {
        let formatter = MessageFormatter::new("[%origin/%group] %user: %message");
        let ctx = FormatContext::new("bob", "hello")
            .with_origin("A")
            .with_group("lobby");
        assert_eq!(formatter.format(&ctx), "[A/lobby] bob: hello");
    }

    #[test]
    fn test_format_is_single_pass() {
        let formatter = MessageFormatter::new("%user: %message (100%)");
        let ctx = FormatContext::new("%message", "%user");
        assert_eq!(formatter.format(&ctx), "%message: %user (100%)");
    }

    #[test]
    fn test_transform_attribution_and_marker() {
        let transformer = MessageTransformer::with_defaults(registry());
        let event = InboundEvent::created(ChannelRef::new(1, 10), MessageId(1), body("hello"));

        let payload = transformer.transform(&event, &ChannelRef::new(2, 20)).unwrap();
        assert_eq!(payload.content, format!("[A] bob: hello{}", LOOP_MARKER));
    }

    #[test]
    fn test_transform_falls_back_to_backend_label() {
        let transformer = MessageTransformer::with_defaults(registry());
        let event = InboundEvent::created(ChannelRef::new(2, 20), MessageId(1), body("hi"));

        let payload = transformer.transform(&event, &ChannelRef::new(1, 10)).unwrap();
        assert!(payload.content.starts_with("[server-one #general] bob: hi"));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let transformer = MessageTransformer::with_defaults(registry());
        let event = InboundEvent::created(ChannelRef::new(1, 10), MessageId(1), body("same"));
        let dest = ChannelRef::new(2, 20);

        assert_eq!(transformer.transform(&event, &dest), transformer.transform(&event, &dest));
    }

    #[test]
    fn test_transform_attachments_and_mentions() {
        let transformer = MessageTransformer::with_defaults(registry());
        let mut b = body("look @everyone");
        b.attachments.push(Attachment {
            url: "https://cdn.example/cat.png".to_string(),
        });
        let event = InboundEvent::created(ChannelRef::new(1, 10), MessageId(1), b);

        let payload = transformer.transform(&event, &ChannelRef::new(2, 20)).unwrap();
        assert_eq!(
            payload.content,
            format!("[A] bob: look @\u{200B}everyone\nhttps://cdn.example/cat.png{}", LOOP_MARKER)
        );
    }

    #[test]
    fn test_transform_truncates_to_limit() {
        let transformer = MessageTransformer::new(registry(), "[%origin] %user: %message", 100);
        let long = "é".repeat(200);
        let event = InboundEvent::created(ChannelRef::new(1, 10), MessageId(1), body(&long));

        let payload = transformer.transform(&event, &ChannelRef::new(2, 20)).unwrap();
        assert_eq!(payload.content.chars().count(), 100);
        assert!(payload.content.starts_with("[A] bob: é"));
        assert!(payload.content.ends_with(&format!("…{}", LOOP_MARKER)));
    }

    #[test]
    fn test_transform_counts_characters_not_bytes() {
        let transformer = MessageTransformer::with_defaults(registry());
        // 1000 characters, 2000 bytes: well inside Discord's 2000 character limit
        let accented = "é".repeat(1000);
        let event = InboundEvent::created(ChannelRef::new(1, 10), MessageId(1), body(&accented));

        let payload = transformer.transform(&event, &ChannelRef::new(2, 20)).unwrap();
        assert_eq!(payload.content, format!("[A] bob: {}{}", accented, LOOP_MARKER));
    }

    #[test]
    fn test_transform_delete_has_no_payload() {
        let transformer = MessageTransformer::with_defaults(registry());
        let event = InboundEvent::deleted(ChannelRef::new(1, 10), MessageId(1));
        assert!(transformer.transform(&event, &ChannelRef::new(2, 20)).is_none());
    }

    #[test]
    fn test_truncate_message_boundaries() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("hello world", 8), "hello w…");
        assert_eq!(truncate_message("hello", 2), "h…");
        assert_eq!(truncate_message("hello", 0), "");
        assert_eq!(truncate_message("ééé", 3), "ééé");
        assert_eq!(truncate_message("ééé", 2), "é…");
    }
}
