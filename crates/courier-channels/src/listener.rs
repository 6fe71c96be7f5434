//! Listening adapter: turns gateway message events on watched channels into
//! `InboundEvent`s on a queue drained by the relay loop.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use courier_core::types::InboundEvent;
use serenity::{model::gateway::Ready, model::prelude::*, prelude::*};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::is_fatal_gateway_error;

/// Type key for storing the event sender in Serenity's TypeMap
struct EventSender;

impl TypeMapKey for EventSender {
    type Value = mpsc::Sender<InboundEvent>;
}

/// Type key for the set of source channels worth converting
struct WatchedChannels;

impl TypeMapKey for WatchedChannels {
    type Value = Arc<HashSet<u64>>;
}

struct ListenerHandler;

#[async_trait]
impl EventHandler for ListenerHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        let data = ctx.data.read().await;
        let Some(watched) = data.get::<WatchedChannels>() else {
            error!("WatchedChannels not initialized in TypeMap");
            return;
        };
        if !watched.contains(&msg.channel_id.get()) {
            return;
        }
        let Some(tx) = data.get::<EventSender>().cloned() else {
            error!("EventSender not initialized in TypeMap");
            return;
        };
        drop(data);

        let event = match to_event(&msg) {
            Ok(event) => event,
            Err(e) => {
                warn!("Could not read message {} in {}: {:#}", msg.id, msg.channel_id, e);
                return;
            }
        };
        debug!(
            "Queued message {} from channel {} ({} rich item(s))",
            event.message_id,
            event.channel_id,
            event.body.embeds.len()
        );
        if let Err(e) = tx.send(event).await {
            error!("Failed to queue inbound message: {}", e);
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Listener connected as {}", ready.user.name);
        info!("Watching source channels...");
    }
}

/// Serialize the gateway message and read it back as an event, so optional
/// payload parts survive whether or not the model type names them.
fn to_event(msg: &Message) -> Result<InboundEvent> {
    let value = serde_json::to_value(msg).context("Failed to serialize gateway message")?;
    InboundEvent::from_gateway_json(&value)
}

/// The passive listening identity
pub struct ListenerChannel {
    token: String,
    watched: Arc<HashSet<u64>>,
}

impl ListenerChannel {
    pub fn new(token: String, watched: impl IntoIterator<Item = u64>) -> Self {
        Self {
            token,
            watched: Arc::new(watched.into_iter().collect()),
        }
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Connect and start pushing events onto `tx`. The connection runs in its
    /// own task; the queue closes when it ends.
    pub async fn start(&self, tx: mpsc::Sender<InboundEvent>) -> Result<()> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(&self.token, intents)
            .event_handler(ListenerHandler)
            .await
            .context("Failed to create listener client")?;

        {
            let mut data = client.data.write().await;
            data.insert::<EventSender>(tx);
            data.insert::<WatchedChannels>(self.watched.clone());
        }

        tokio::spawn(async move {
            match client.start().await {
                Ok(()) => info!("Listener stopped cleanly"),
                Err(e) => {
                    if is_fatal_gateway_error(&e) {
                        error!("Listener fatal error: {}", e);
                        error!("Check listener_token in the courier config");
                    } else {
                        error!("Listener connection ended: {}", e);
                    }
                }
            }
        });

        info!("Listener started on {} channel(s)", self.watched.len());
        Ok(())
    }
}
