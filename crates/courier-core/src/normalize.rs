//! Rich-content normalization.
//!
//! Decides what the real content of an inbound event is. Gateway payloads
//! for quoted, forwarded, or snapshotted messages are sometimes incomplete or
//! collapse a structured message into an opaque nested blob. In those cases
//! the channel's latest message is re-read over HTTP and parsed directly from
//! the API response. The re-fetch is only a fallback and never the default path.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::rich::convert_items;
use crate::types::{InboundEvent, MessageBody, NormalizedMessage, RichItem};

/// Source of the most recent message in a channel
#[async_trait]
pub trait LatestMessageSource: Send + Sync {
    /// Raw message object, or `None` when the channel has none or the read failed softly
    async fn latest_message(&self, channel_id: u64) -> Result<Option<Value>>;
}

/// Which path produced the final content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    Local,
    Refetched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub message: NormalizedMessage,
    pub source: ContentSource,
}

impl Normalized {
    fn local(message: NormalizedMessage) -> Self {
        Self {
            message,
            source: ContentSource::Local,
        }
    }

    fn refetched(message: NormalizedMessage) -> Self {
        Self {
            message,
            source: ContentSource::Refetched,
        }
    }
}

pub struct Normalizer {
    source: Arc<dyn LatestMessageSource>,
}

impl Normalizer {
    pub fn new(source: Arc<dyn LatestMessageSource>) -> Self {
        Self { source }
    }

    /// Never fails; degrades to the best content it has.
    pub async fn normalize(&self, event: &InboundEvent) -> Normalized {
        let channel_id = event.channel_id;
        let (mut local, mut suspect_nested) = from_body(&event.body, "primary");

        if !local.has_text() {
            let recovery = match (&event.referenced, event.snapshots.first()) {
                (Some(referenced), _) => Some((referenced.as_ref(), "reference")),
                (None, Some(snapshot)) => Some((snapshot, "snapshot")),
                (None, None) => None,
            };
            if let Some((body, origin)) = recovery {
                debug!("Empty content in channel {}, recovering from {}", channel_id, origin);
                let (recovered, recovered_suspect) = from_body(body, origin);
                local = recovered;
                suspect_nested |= recovered_suspect;
            }
        }

        if suspect_nested {
            info!(
                "Suspect nested rich content in channel {}, re-fetching latest message",
                channel_id
            );
            return match self.refetch(channel_id).await {
                Some(fetched) => {
                    info!("Adopted re-fetched content for channel {}", channel_id);
                    Normalized::refetched(fetched)
                }
                None => Normalized::local(local),
            };
        }

        if !local.has_text() && local.all_image_only() {
            info!(
                "Image-only rich content in channel {}, re-fetching latest message",
                channel_id
            );
            if let Some(fetched) = self.refetch(channel_id).await {
                if fetched.has_text() || fetched.rich_items.iter().any(RichItem::has_text) {
                    info!("Adopted richer re-fetched content for channel {}", channel_id);
                    return Normalized::refetched(fetched);
                }
                debug!(
                    "Re-fetched content for channel {} is no richer, keeping local items",
                    channel_id
                );
            }
        }

        Normalized::local(local)
    }

    async fn refetch(&self, channel_id: u64) -> Option<NormalizedMessage> {
        match self.source.latest_message(channel_id).await {
            Ok(Some(raw)) => Some(parse_api_message(&raw)),
            Ok(None) => {
                warn!("No latest message available for channel {}", channel_id);
                None
            }
            Err(e) => {
                warn!("Latest message fetch for channel {} failed: {:#}", channel_id, e);
                None
            }
        }
    }
}

/// Locally derived content of one body, plus whether it looked nested.
///
/// A conversion failure counts as suspect and leaves no rich items.
fn from_body(body: &MessageBody, origin: &str) -> (NormalizedMessage, bool) {
    let mut message = NormalizedMessage {
        text: body.content.clone(),
        rich_items: Vec::new(),
        attachments: body.attachments.clone(),
    };
    if body.embeds.is_empty() {
        return (message, false);
    }
    match convert_items(&body.embeds) {
        Ok(conversion) => {
            if conversion.suspect_nested {
                info!("Detected nested rich content in {} message", origin);
            }
            message.rich_items = conversion.items;
            (message, conversion.suspect_nested)
        }
        Err(e) => {
            warn!("Rich content conversion failed for {} message: {}", origin, e);
            (message, true)
        }
    }
}

/// Parse an API message object straight into normalized content.
///
/// Items that cannot be converted are skipped; nesting is not checked here.
pub fn parse_api_message(raw: &Value) -> NormalizedMessage {
    let body = MessageBody::from_json(raw);
    let rich_items = body
        .embeds
        .iter()
        .filter_map(|embed| match RichItem::from_raw(embed) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping unparseable rich item from API message: {}", e);
                None
            }
        })
        .collect();
    NormalizedMessage {
        text: body.content,
        rich_items,
        attachments: body.attachments,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves one canned response and counts calls
    #[derive(Default)]
    pub struct MockLatest {
        pub response: Option<Value>,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl MockLatest {
        pub fn returning(response: Value) -> Self {
            Self {
                response: Some(response),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LatestMessageSource for MockLatest {
        async fn latest_message(&self, _channel_id: u64) -> Result<Option<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("connection reset");
            }
            Ok(self.response.clone())
        }
    }
}
