//! Discord implementation of the send capability.
//!
//! Relayed copies are plain bot messages posted over the REST API with every
//! mention type disabled, so a mirrored ping never notifies anyone.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateAllowedMentions, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId as DiscordChannelId, MessageId as DiscordMessageId};
use tracing::debug;

use crate::common::error::{RelayError, RelayResult, SendAction};
use crate::common::messages::OutboundPayload;
use crate::common::types::{ChannelRef, MessageId, ServerId};
use crate::relay::log_relay::TRANSPORT_TARGET;
use crate::relay::sender::RelaySender;

/// Sends, edits and deletes relayed copies through the Discord HTTP client.
pub struct DiscordSender {
    http: Arc<Http>,
}

impl DiscordSender {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Discord channel id for a destination. Serenity ids must be non-zero.
fn discord_channel(action: SendAction, destination: &ChannelRef) -> RelayResult<DiscordChannelId> {
    if destination.server == ServerId::INTERNAL || destination.channel.0 == 0 {
        return Err(RelayError::transport(
            action,
            *destination,
            "not a Discord channel",
        ));
    }
    Ok(DiscordChannelId::new(destination.channel.0))
}

fn discord_message(
    action: SendAction,
    destination: &ChannelRef,
    message_id: MessageId,
) -> RelayResult<DiscordMessageId> {
    if message_id.0 == 0 {
        return Err(RelayError::transport(action, *destination, "invalid message id 0"));
    }
    Ok(DiscordMessageId::new(message_id.0))
}

#[async_trait]
impl RelaySender for DiscordSender {
    async fn send_message(
        &self,
        destination: &ChannelRef,
        payload: &OutboundPayload,
    ) -> RelayResult<MessageId> {
        let channel_id = discord_channel(SendAction::Send, destination)?;
        let builder = CreateMessage::new()
            .content(&payload.content)
            .allowed_mentions(CreateAllowedMentions::new());

        let message = channel_id
            .send_message(&self.http, builder)
            .await
            .map_err(|e| RelayError::transport(SendAction::Send, *destination, e))?;

        debug!(
            target: TRANSPORT_TARGET,
            destination = %destination,
            "Sent relayed message {}",
            message.id
        );
        Ok(MessageId(message.id.get()))
    }

    async fn edit_message(
        &self,
        destination: &ChannelRef,
        message_id: MessageId,
        payload: &OutboundPayload,
    ) -> RelayResult<()> {
        let channel_id = discord_channel(SendAction::Edit, destination)?;
        let msg_id = discord_message(SendAction::Edit, destination, message_id)?;
        let builder = EditMessage::new()
            .content(&payload.content)
            .allowed_mentions(CreateAllowedMentions::new());

        channel_id
            .edit_message(&self.http, msg_id, builder)
            .await
            .map_err(|e| RelayError::transport(SendAction::Edit, *destination, e))?;

        debug!(
            target: TRANSPORT_TARGET,
            destination = %destination,
            "Edited relayed message {}",
            message_id
        );
        Ok(())
    }

    async fn delete_message(
        &self,
        destination: &ChannelRef,
        message_id: MessageId,
    ) -> RelayResult<()> {
        let channel_id = discord_channel(SendAction::Delete, destination)?;
        let msg_id = discord_message(SendAction::Delete, destination, message_id)?;

        channel_id
            .delete_message(&self.http, msg_id)
            .await
            .map_err(|e| RelayError::transport(SendAction::Delete, *destination, e))?;

        debug!(
            target: TRANSPORT_TARGET,
            destination = %destination,
            "Deleted relayed message {}",
            message_id
        );
        Ok(())
    }
}
