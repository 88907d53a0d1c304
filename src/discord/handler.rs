//! Discord gateway event handling.
//!
//! Converts serenity message events into [`InboundEvent`]s and hands them to
//! the dispatcher. No relay decisions are made here: DMs, the bot's own
//! messages and unlinked channels are all filtered downstream.

use serenity::async_trait;
use serenity::model::channel::{Attachment as DiscordAttachment, Message};
use serenity::model::event::MessageUpdateEvent;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId as DiscordChannelId, GuildId, MessageId as DiscordMessageId};
use serenity::model::user::User;
use serenity::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::common::messages::{InboundEvent, MessageBody, RelayInput};
use crate::common::types::{Attachment, Author, ChannelRef, MessageId};
use crate::relay::log_relay::TRANSPORT_TARGET;

/// Serenity event handler feeding the dispatcher input channel.
pub struct RelayHandler {
    input_tx: mpsc::UnboundedSender<RelayInput>,
}

impl RelayHandler {
    pub fn new(input_tx: mpsc::UnboundedSender<RelayInput>) -> Self {
        Self { input_tx }
    }

    fn push(&self, event: InboundEvent) {
        debug!(
            target: TRANSPORT_TARGET,
            origin = %event.origin,
            "Discord {} event for message {}",
            event.kind_name(),
            event.message_id
        );
        if let Err(e) = self.input_tx.send(RelayInput::Event(event)) {
            debug!(target: TRANSPORT_TARGET, "Dispatcher input closed: {}", e);
        }
    }

    /// One delete event per message, in the order Discord listed them.
    fn push_deletes(&self, origin: ChannelRef, ids: impl IntoIterator<Item = MessageId>) {
        for id in ids {
            self.push(InboundEvent::deleted(origin, id));
        }
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            "Discord bot connected as {} ({} guilds)",
            ready.user.name,
            ready.guilds.len()
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let nick = msg.member.as_ref().and_then(|m| m.nick.as_deref());
        let body = MessageBody {
            author: author_of(&msg.author, nick),
            content: msg.content.clone(),
            attachments: attachments_of(&msg.attachments),
            origin_label: channel_label(&ctx, msg.guild_id, msg.channel_id),
        };

        self.push(InboundEvent::created(
            channel_ref(msg.guild_id, msg.channel_id),
            MessageId(msg.id.get()),
            body,
        ));
    }

    async fn message_update(
        &self,
        ctx: Context,
        old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        // Embed unfurls and pins arrive as updates without content
        let Some(content) = event.content.clone() else {
            return;
        };

        let nick = new
            .as_ref()
            .and_then(|m| m.member.as_ref())
            .and_then(|m| m.nick.as_deref());
        let author = match (event.author.as_ref(), new.as_ref()) {
            (Some(user), _) => author_of(user, nick),
            (None, Some(message)) => author_of(&message.author, nick),
            (None, None) => {
                debug!(
                    target: TRANSPORT_TARGET,
                    "Ignoring edit of message {} without author",
                    event.id
                );
                return;
            }
        };

        let attachments = event
            .attachments
            .as_deref()
            .or_else(|| new.as_ref().map(|m| m.attachments.as_slice()))
            .map(attachments_of)
            .unwrap_or_default();

        let body = MessageBody {
            author,
            content,
            attachments,
            origin_label: channel_label(&ctx, event.guild_id, event.channel_id),
        };

        self.push(InboundEvent::edited(
            channel_ref(event.guild_id, event.channel_id),
            MessageId(event.id.get()),
            body,
            old_if_available.map(|m| m.content),
        ));
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: DiscordChannelId,
        deleted_message_id: DiscordMessageId,
        guild_id: Option<GuildId>,
    ) {
        self.push(InboundEvent::deleted(
            channel_ref(guild_id, channel_id),
            MessageId(deleted_message_id.get()),
        ));
    }

    async fn message_delete_bulk(
        &self,
        _ctx: Context,
        channel_id: DiscordChannelId,
        multiple_deleted_messages_ids: Vec<DiscordMessageId>,
        guild_id: Option<GuildId>,
    ) {
        self.push_deletes(
            channel_ref(guild_id, channel_id),
            multiple_deleted_messages_ids
                .into_iter()
                .map(|id| MessageId(id.get())),
        );
    }
}

/// Guild channels map to (guild, channel); anything without a guild is a DM.
pub fn channel_ref(guild_id: Option<GuildId>, channel_id: DiscordChannelId) -> ChannelRef {
    match guild_id {
        Some(guild_id) => ChannelRef::new(guild_id.get(), channel_id.get()),
        None => ChannelRef::direct(channel_id.get()),
    }
}

/// Server nickname, then global display name, then username.
pub fn display_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    nick.or(global_name).unwrap_or(username).to_string()
}

fn author_of(user: &User, nick: Option<&str>) -> Author {
    Author::new(
        user.id.get(),
        display_name(nick, user.global_name.as_deref(), &user.name),
    )
}

fn attachments_of(attachments: &[DiscordAttachment]) -> Vec<Attachment> {
    attachments
        .iter()
        .map(|a| Attachment { url: a.url.clone() })
        .collect()
}

/// "guild #channel" from the cache, if the guild has been received.
fn channel_label(
    ctx: &Context,
    guild_id: Option<GuildId>,
    channel_id: DiscordChannelId,
) -> Option<String> {
    let guild = ctx.cache.guild(guild_id?)?;
    let channel = guild.channels.get(&channel_id)?;
    Some(format!("{} #{}", guild.name, channel.name))
}
