//! Canonical message types flowing through the relay.
//!
//! Inbound events come from the chat backend, log records come from the
//! process's own tracing output, and outbound payloads go to the send
//! capability.

use tracing::Level;

use crate::common::types::{Attachment, Author, AuthorId, ChannelRef, MessageId};

/// Content of a created or edited message.
#[derive(Debug, Clone)]
pub struct MessageBody {
    /// Message author.
    pub author: Author,
    /// Raw message content.
    pub content: String,
    /// Attachment references.
    pub attachments: Vec<Attachment>,
    /// Human readable name of the origin channel, if the backend knows it.
    pub origin_label: Option<String>,
}

/// What happened to the message.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A new message was posted.
    Created(MessageBody),
    /// An existing message was edited.
    Edited {
        body: MessageBody,
        previous_content: Option<String>,
    },
    /// A message was removed. Backends do not report author or content here.
    Deleted,
}

/// A chat event delivered by the backend connection.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Channel the event happened in.
    pub origin: ChannelRef,
    /// Identity of the affected message.
    pub message_id: MessageId,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn created(origin: ChannelRef, message_id: MessageId, body: MessageBody) -> Self {
        Self {
            origin,
            message_id,
            kind: EventKind::Created(body),
        }
    }

    pub fn edited(
        origin: ChannelRef,
        message_id: MessageId,
        body: MessageBody,
        previous_content: Option<String>,
    ) -> Self {
        Self {
            origin,
            message_id,
            kind: EventKind::Edited {
                body,
                previous_content,
            },
        }
    }

    pub fn deleted(origin: ChannelRef, message_id: MessageId) -> Self {
        Self {
            origin,
            message_id,
            kind: EventKind::Deleted,
        }
    }

    /// Message body for created and edited events.
    pub fn body(&self) -> Option<&MessageBody> {
        match &self.kind {
            EventKind::Created(body) => Some(body),
            EventKind::Edited { body, .. } => Some(body),
            EventKind::Deleted => None,
        }
    }

    /// Short name of the event kind for logging.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Created(_) => "created",
            EventKind::Edited { .. } => "edited",
            EventKind::Deleted => "deleted",
        }
    }
}

/// A record captured from the process logging subsystem.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    /// Logging source (the tracing target).
    pub source: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: Level, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            source: source.into(),
            message: message.into(),
        }
    }

    /// Wrap this record into a created-message event on the log relay channel.
    pub fn into_event(self, message_id: MessageId, label: &str) -> InboundEvent {
        let body = MessageBody {
            author: Author {
                id: AuthorId::SYSTEM,
                name: format!("{} / {}", self.source, self.level),
            },
            content: self.message,
            attachments: Vec::new(),
            origin_label: Some(label.to_string()),
        };
        InboundEvent::created(ChannelRef::log_relay(), message_id, body)
    }
}

/// Input accepted by the dispatcher entry point.
#[derive(Debug, Clone)]
pub enum RelayInput {
    Event(InboundEvent),
    Log(LogRecord),
}

/// Destination-bound message produced by the transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPayload {
    /// Final text, including attribution, attachment links and the loop marker.
    pub content: String,
}
