//! The relay pipeline: normalize → filter → replace → translate → forward

use std::sync::Arc;
use tracing::{debug, info};

use crate::filter::ContentFilter;
use crate::forward::Forwarder;
use crate::normalize::Normalizer;
use crate::routing::RoutingTable;
use crate::translate::{Translate, translate_message};
use crate::types::InboundEvent;

pub struct Relay {
    routing: Arc<RoutingTable>,
    normalizer: Normalizer,
    filter: ContentFilter,
    translator: Option<Arc<dyn Translate>>,
    forwarder: Forwarder,
}

impl Relay {
    /// `translator` is `None` when no translation API key is configured.
    pub fn new(
        routing: Arc<RoutingTable>,
        normalizer: Normalizer,
        filter: ContentFilter,
        translator: Option<Arc<dyn Translate>>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            routing,
            normalizer,
            filter,
            translator,
            forwarder,
        }
    }

    /// Run one event through the whole pipeline. Failures are logged, never returned.
    pub async fn handle(&self, event: InboundEvent) {
        let channel_id = event.channel_id;
        let Some(mapping) = self.routing.mapping(channel_id) else {
            debug!("Ignoring message from unmapped channel {}", channel_id);
            return;
        };

        let normalized = self.normalizer.normalize(&event).await;
        let mut message = normalized.message;

        if !self.filter.should_forward(&message.text, event.author_id) {
            info!(
                "Filtered out message {} from {} in channel {}",
                event.message_id, event.author_id, channel_id
            );
            return;
        }
        message.text = self.filter.apply_replacements(&message.text);

        if let (Some(settings), Some(translator)) =
            (mapping.active_translation(), self.translator.as_deref())
        {
            message = translate_message(translator, message, settings).await;
        }

        info!(
            "Message from channel {} by {} ({}): {}{}",
            channel_id,
            event.author_name,
            event.author_id,
            message.text.chars().take(50).collect::<String>(),
            if message.attachments.is_empty() {
                String::new()
            } else {
                format!(" [{} attachment(s)]", message.attachments.len())
            }
        );

        self.forwarder.forward(channel_id, message).await;
    }
}
