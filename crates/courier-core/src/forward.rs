//! Dispatch of normalized messages to the identity owning each destination

use anyhow::{Context, Result, bail};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::identity::IdentityRegistry;
use crate::routing::{RoutingTable, token_prefix};
use crate::types::{AttachmentRef, NormalizedMessage, OutboundPayload};

/// Text sent alongside pure-image rich items; the platform rejects them without any
pub const IMAGE_ONLY_PLACEHOLDER: &str = ".";

pub struct Forwarder {
    routing: Arc<RoutingTable>,
    identities: IdentityRegistry,
    http: Client,
}

impl Forwarder {
    pub fn new(routing: Arc<RoutingTable>, identities: IdentityRegistry) -> Self {
        Self {
            routing,
            identities,
            http: Client::new(),
        }
    }

    /// Decide the text + rich item request, if there is anything to send.
    pub fn build_payload(message: &NormalizedMessage) -> Option<OutboundPayload> {
        let text = if message.has_text() {
            Some(message.text.clone())
        } else if message.all_image_only() {
            Some(IMAGE_ONLY_PLACEHOLDER.to_string())
        } else {
            None
        };

        if text.is_none() && message.rich_items.is_empty() {
            return None;
        }
        Some(OutboundPayload::Message {
            text,
            rich_items: message.rich_items.clone(),
        })
    }

    pub async fn forward(&self, source_channel_id: u64, message: NormalizedMessage) {
        let Some(target) = self.routing.target_for(source_channel_id) else {
            debug!("Channel {} is not mapped, not forwarding", source_channel_id);
            return;
        };
        let Some(owner) = self.routing.owner_of(target) else {
            error!("No bot owns target channel {}", target);
            return;
        };
        let Some(identity) = self.identities.resolve(&owner.owning_token) else {
            error!(
                "Bot '{}' ({}) is not logged in, dropping message for channel {}",
                owner.remark,
                token_prefix(&owner.owning_token),
                target
            );
            return;
        };

        let payload = Self::build_payload(&message);
        info!(
            "Forwarding {} -> {} via {}: text={:?} rich_items={} attachments={}",
            source_channel_id,
            target,
            identity.label(),
            match &payload {
                Some(OutboundPayload::Message { text, .. }) => text.as_deref(),
                _ => None,
            },
            message.rich_items.len(),
            message.attachments.len()
        );

        if let Some(payload) = payload {
            match identity.send(target, payload).await {
                Ok(()) => info!("Message forwarded to channel {}", target),
                Err(e) => error!("Failed to forward message to channel {}: {:#}", target, e),
            }
        }

        for attachment in &message.attachments {
            let result = async {
                let data = self.download(attachment).await?;
                identity
                    .send(
                        target,
                        OutboundPayload::Attachment {
                            filename: attachment.filename.clone(),
                            data,
                        },
                    )
                    .await
            }
            .await;
            match result {
                Ok(()) => info!("Attachment forwarded: {}", attachment.filename),
                Err(e) => warn!(
                    "Failed to forward attachment {}: {:#}",
                    attachment.filename, e
                ),
            }
        }
    }

    async fn download(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(&attachment.url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", attachment.url))?;
        if response.status() != StatusCode::OK {
            bail!(
                "Download of {} returned status {}",
                attachment.url,
                response.status()
            );
        }
        let bytes = response
            .bytes()
            .await
            .context("Failed to read attachment body")?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::testing::MockIdentity;
    use crate::routing::{ChannelMapping, RoutingEntry};
    use crate::types::RichItem;

    fn routing() -> Arc<RoutingTable> {
        Arc::new(
            RoutingTable::build(
                vec![
                    ChannelMapping {
                        source_channel_id: 1,
                        target_channel_id: 10,
                        translate: None,
                    },
                    ChannelMapping {
                        source_channel_id: 2,
                        target_channel_id: 20,
                        translate: None,
                    },
                ],
                vec![
                    RoutingEntry {
                        target_channel_id: 10,
                        owning_token: "tok-a".to_string(),
                        remark: "a".to_string(),
                    },
                    RoutingEntry {
                        target_channel_id: 20,
                        owning_token: "tok-b".to_string(),
                        remark: "b".to_string(),
                    },
                ],
            )
            .unwrap(),
        )
    }

    fn forwarder(identity: Arc<MockIdentity>) -> Forwarder {
        let mut registry = IdentityRegistry::new();
        registry.register("tok-a", 100, identity);
        Forwarder::new(routing(), registry)
    }

    fn image_item() -> RichItem {
        RichItem {
            image_url: Some("http://x/y.png".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_text_verbatim() {
        let message = NormalizedMessage {
            text: "  hi  ".to_string(),
            rich_items: vec![image_item()],
            attachments: vec![],
        };
        assert_eq!(
            Forwarder::build_payload(&message),
            Some(OutboundPayload::Message {
                text: Some("  hi  ".to_string()),
                rich_items: vec![image_item()],
            })
        );
    }

    #[test]
    fn test_payload_placeholder_for_image_only() {
        let message = NormalizedMessage {
            rich_items: vec![image_item()],
            ..Default::default()
        };
        let Some(OutboundPayload::Message { text, .. }) = Forwarder::build_payload(&message) else {
            panic!("expected message payload");
        };
        assert_eq!(text.as_deref(), Some(IMAGE_ONLY_PLACEHOLDER));
    }

    #[test]
    fn test_payload_omits_text_for_textual_items() {
        let message = NormalizedMessage {
            rich_items: vec![RichItem {
                title: Some("t".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let Some(OutboundPayload::Message { text, rich_items }) =
            Forwarder::build_payload(&message)
        else {
            panic!("expected message payload");
        };
        assert!(text.is_none());
        assert_eq!(rich_items.len(), 1);
    }

    #[test]
    fn test_payload_none_when_empty() {
        assert!(Forwarder::build_payload(&NormalizedMessage::default()).is_none());
    }

    #[tokio::test]
    async fn test_unmapped_source_is_noop() {
        let identity = Arc::new(MockIdentity::default());
        let fwd = forwarder(identity.clone());
        fwd.forward(99, NormalizedMessage {
            text: "x".to_string(),
            ..Default::default()
        })
        .await;
        assert!(identity.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_identity_drops() {
        let identity = Arc::new(MockIdentity::default());
        let fwd = forwarder(identity.clone());
        // channel 2 routes to tok-b, which never logged in
        fwd.forward(2, NormalizedMessage {
            text: "x".to_string(),
            ..Default::default()
        })
        .await;
        assert!(identity.sent().is_empty());
    }

    #[tokio::test]
    async fn test_text_then_attachments_in_order() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("GET", "/a.png")
            .with_status(200)
            .with_body("AAA")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/missing.png")
            .with_status(404)
            .create_async()
            .await;
        let _b = server
            .mock("GET", "/b.txt")
            .with_status(200)
            .with_body("BBB")
            .create_async()
            .await;

        let identity = Arc::new(MockIdentity::default());
        let fwd = forwarder(identity.clone());
        let attachment = |name: &str| AttachmentRef {
            url: format!("{}/{}", server.url(), name),
            filename: name.to_string(),
        };
        fwd.forward(1, NormalizedMessage {
            text: "hello".to_string(),
            rich_items: vec![],
            attachments: vec![attachment("a.png"), attachment("missing.png"), attachment("b.txt")],
        })
        .await;

        let sent = identity.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(channel, _)| *channel == 10));
        assert_eq!(sent[0].1, OutboundPayload::Message {
            text: Some("hello".to_string()),
            rich_items: vec![],
        });
        assert_eq!(sent[1].1, OutboundPayload::Attachment {
            filename: "a.png".to_string(),
            data: b"AAA".to_vec(),
        });
        assert_eq!(sent[2].1, OutboundPayload::Attachment {
            filename: "b.txt".to_string(),
            data: b"BBB".to_vec(),
        });
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_block_text() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("GET", "/a.png")
            .with_status(200)
            .with_body("AAA")
            .create_async()
            .await;

        let identity = Arc::new(MockIdentity {
            fail_attachments: true,
            ..Default::default()
        });
        let fwd = forwarder(identity.clone());
        fwd.forward(1, NormalizedMessage {
            text: "hello".to_string(),
            rich_items: vec![],
            attachments: vec![AttachmentRef {
                url: format!("{}/a.png", server.url()),
                filename: "a.png".to_string(),
            }],
        })
        .await;

        let sent = identity.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, OutboundPayload::Message { .. }));
    }
}
