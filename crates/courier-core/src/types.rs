//! Shared types for courier-core

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

/// A file attached to a message, referenced by its content url
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
}

impl AttachmentRef {
    fn from_json(value: &Value) -> Option<Self> {
        let url = value.get("url")?.as_str()?.to_string();
        let filename = value
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Some(Self { url, filename })
    }
}

/// The text, raw rich items, and attachments of one message.
///
/// Rich items stay in their structural JSON form so nesting detection can
/// inspect their keys before conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBody {
    pub content: String,
    pub embeds: Vec<Value>,
    pub attachments: Vec<AttachmentRef>,
}

impl MessageBody {
    /// Extract a body from a platform message object. Missing keys become empty.
    pub fn from_json(value: &Value) -> Self {
        let content = value
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let embeds = value
            .get("embeds")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let attachments = value
            .get("attachments")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(AttachmentRef::from_json).collect())
            .unwrap_or_default();
        Self {
            content,
            embeds,
            attachments,
        }
    }
}

/// A message-created event observed by the listening identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundEvent {
    pub message_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub body: MessageBody,
    /// The resolved message this one replies to or quotes, when the gateway delivered it
    pub referenced: Option<Box<MessageBody>>,
    /// Forwarded-message snapshots, first one is authoritative
    pub snapshots: Vec<MessageBody>,
}

impl InboundEvent {
    /// Build an event from the platform's message JSON.
    pub fn from_gateway_json(value: &Value) -> Result<Self> {
        let channel_id = value
            .get("channel_id")
            .and_then(snowflake_from_json)
            .ok_or_else(|| anyhow!("message event has no channel_id"))?;
        let message_id = value
            .get("id")
            .and_then(snowflake_from_json)
            .unwrap_or_default();
        let author = value
            .get("author")
            .context("message event has no author")?;
        let author_id = author
            .get("id")
            .and_then(snowflake_from_json)
            .ok_or_else(|| anyhow!("message author has no id"))?;
        let author_name = author
            .get("global_name")
            .and_then(Value::as_str)
            .or_else(|| author.get("username").and_then(Value::as_str))
            .unwrap_or("unknown")
            .to_string();

        let referenced = value
            .get("referenced_message")
            .filter(|v| v.is_object())
            .map(|v| Box::new(MessageBody::from_json(v)));

        let snapshots = value
            .get("message_snapshots")
            .and_then(Value::as_array)
            .map(|snaps| {
                snaps
                    .iter()
                    .filter(|snap| snap.is_object())
                    .map(|snap| {
                        // Raw gateway payloads wrap each snapshot; serialized model types do not
                        let inner = snap.get("message").filter(|m| m.is_object());
                        MessageBody::from_json(inner.unwrap_or(snap))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            message_id,
            channel_id,
            author_id,
            author_name,
            body: MessageBody::from_json(value),
            referenced,
            snapshots,
        })
    }
}

/// One name/value pair of a rich item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// A structured display unit attached to a message (an "embed" on the platform)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichItem {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<RichField>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub color: Option<u32>,
    pub footer_text: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author_name: Option<String>,
}

impl RichItem {
    /// True when the item carries a title, a description, or any field.
    pub fn has_text(&self) -> bool {
        is_present(&self.title) || is_present(&self.description) || !self.fields.is_empty()
    }

    /// No title, description, or fields, but an image.
    pub fn is_image_only(&self) -> bool {
        !self.has_text() && is_present(&self.image_url)
    }
}

fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.is_empty())
}

/// The authoritative content of a message after normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub text: String,
    pub rich_items: Vec<RichItem>,
    pub attachments: Vec<AttachmentRef>,
}

impl NormalizedMessage {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Non-empty rich items, every one image-only.
    pub fn all_image_only(&self) -> bool {
        !self.rich_items.is_empty() && self.rich_items.iter().all(RichItem::is_image_only)
    }
}

/// What an outbound identity is asked to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    /// Text and rich items, sent together as one request
    Message {
        text: Option<String>,
        rich_items: Vec<RichItem>,
    },
    /// A single re-uploaded file
    Attachment { filename: String, data: Vec<u8> },
}

/// Minimal view of a channel as seen by an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u64,
    pub name: Option<String>,
}

/// Platform ids arrive as strings in JSON but may be integers in hand-written config.
fn snowflake_from_json(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnowflakeRepr {
    Int(u64),
    Str(String),
}

impl SnowflakeRepr {
    fn into_id<E: de::Error>(self) -> Result<u64, E> {
        match self {
            Self::Int(id) => Ok(id),
            Self::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id '{}'", s))),
        }
    }
}

/// Deserialize a list of ids written either as strings or integers.
pub fn de_snowflakes<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<SnowflakeRepr>::deserialize(deserializer)?
        .into_iter()
        .map(SnowflakeRepr::into_id)
        .collect()
}
