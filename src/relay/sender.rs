//! Send capability consumed by the dispatcher.
//!
//! Implemented by the chat backend. The relay core never retries; any retry
//! policy belongs to the implementation.

use async_trait::async_trait;

use crate::common::error::RelayResult;
use crate::common::messages::OutboundPayload;
use crate::common::types::{ChannelRef, MessageId};

/// Trait for outbound chat actions.
#[async_trait]
pub trait RelaySender: Send + Sync {
    /// Post a payload, returning the identity of the new message.
    async fn send_message(
        &self,
        destination: &ChannelRef,
        payload: &OutboundPayload,
    ) -> RelayResult<MessageId>;

    /// Replace the content of a previously sent message.
    async fn edit_message(
        &self,
        destination: &ChannelRef,
        message_id: MessageId,
        payload: &OutboundPayload,
    ) -> RelayResult<()>;

    /// Remove a previously sent message.
    async fn delete_message(&self, destination: &ChannelRef, message_id: MessageId)
        -> RelayResult<()>;
}
