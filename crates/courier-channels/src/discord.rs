//! Outbound bot identity using Serenity

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use courier_core::identity::OutboundIdentity;
use courier_core::types::{ChannelInfo, OutboundPayload, RichItem};
use serenity::builder::{
    CreateAttachment, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter, CreateMessage,
};
use serenity::http::Http;
use serenity::{model::gateway::Ready, model::prelude::*, prelude::*};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::is_fatal_gateway_error;

/// A bot account that owns destination channels
pub struct DiscordIdentity {
    http: Arc<Http>,
    identity_id: u64,
    label: String,
}

impl DiscordIdentity {
    /// Authenticate over REST and learn the bot's own user id.
    pub async fn login(token: &str, label: &str) -> Result<Self> {
        let http = Arc::new(Http::new(token));
        let me = http
            .get_current_user()
            .await
            .with_context(|| format!("Failed to log in bot '{}'", label))?;
        info!("Bot '{}' authenticated as {} ({})", label, me.name, me.id);
        Ok(Self {
            http,
            identity_id: me.id.get(),
            label: label.to_string(),
        })
    }

    pub fn identity_id(&self) -> u64 {
        self.identity_id
    }
}

#[async_trait]
impl OutboundIdentity for DiscordIdentity {
    async fn send(&self, channel_id: u64, payload: OutboundPayload) -> Result<()> {
        let channel = ChannelId::new(channel_id);
        let builder = match payload {
            OutboundPayload::Message { text, rich_items } => {
                let mut builder =
                    CreateMessage::new().embeds(rich_items.iter().map(to_embed).collect());
                if let Some(text) = text {
                    builder = builder.content(text);
                }
                builder
            }
            OutboundPayload::Attachment { filename, data } => {
                CreateMessage::new().add_file(CreateAttachment::bytes(data, filename))
            }
        };
        channel
            .send_message(&self.http, builder)
            .await
            .with_context(|| format!("Failed to send to channel {} as '{}'", channel_id, self.label))?;
        Ok(())
    }

    async fn get_channel(&self, channel_id: u64) -> Result<Option<ChannelInfo>> {
        match self.http.get_channel(ChannelId::new(channel_id)).await {
            Ok(channel) => Ok(Some(ChannelInfo {
                id: channel_id,
                name: channel.guild().map(|c| c.name),
            })),
            Err(e) => {
                debug!("Channel {} not visible to '{}': {}", channel_id, self.label, e);
                Ok(None)
            }
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

fn to_embed(item: &RichItem) -> CreateEmbed {
    let mut embed = CreateEmbed::new();
    if let Some(title) = &item.title {
        embed = embed.title(title.as_str());
    }
    if let Some(description) = &item.description {
        embed = embed.description(description.as_str());
    }
    if let Some(url) = &item.url {
        embed = embed.url(url.as_str());
    }
    if let Some(color) = item.color {
        embed = embed.colour(color);
    }
    if let Some(image) = &item.image_url {
        embed = embed.image(image.as_str());
    }
    if let Some(thumbnail) = &item.thumbnail_url {
        embed = embed.thumbnail(thumbnail.as_str());
    }
    if let Some(footer) = &item.footer_text {
        embed = embed.footer(CreateEmbedFooter::new(footer.as_str()));
    }
    if let Some(author) = &item.author_name {
        embed = embed.author(CreateEmbedAuthor::new(author.as_str()));
    }
    embed.fields(
        item.fields
            .iter()
            .map(|f| (f.name.clone(), f.value.clone(), f.inline)),
    )
}

/// Event handler for a bot's own gateway stream: answers `ping`
struct BotHandler {
    identity_id: u64,
    label: String,
}

#[async_trait]
impl EventHandler for BotHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.id.get() == self.identity_id {
            return;
        }
        if msg.content == "ping" {
            if let Err(e) = msg.channel_id.say(&ctx.http, "pong").await {
                warn!("'{}' failed to answer ping: {}", self.label, e);
            }
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Bot '{}' gateway ready as {}", self.label, ready.user.name);
    }
}

/// Connect a bot's gateway in the background.
pub fn spawn_gateway(token: String, identity_id: u64, label: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let handler = BotHandler {
            identity_id,
            label: label.clone(),
        };

        let mut client = match Client::builder(&token, intents).event_handler(handler).await {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to create gateway client for '{}': {}", label, e);
                return;
            }
        };

        match client.start().await {
            Ok(()) => info!("Gateway for '{}' stopped cleanly", label),
            Err(e) if is_fatal_gateway_error(&e) => {
                error!("Gateway for '{}' hit a fatal error: {}", label, e);
            }
            Err(e) => error!("Gateway for '{}' stopped: {}", label, e),
        }
    })
}
