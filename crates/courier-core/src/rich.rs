//! Conversion of raw rich-content JSON into `RichItem` values, plus detection
//! of rich content that actually encodes another whole message.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{RichField, RichItem};

/// Keys that never belong on a genuine display item
const NESTED_ITEM_KEYS: &[&str] = &["embeds", "message", "messages"];

/// Keys that mark a JSON-looking description as a serialized message
const NESTED_DESCRIPTION_KEYS: &[&str] = &["embeds", "message", "messages", "content"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("rich item is not a JSON object")]
    NotAnObject,
    #[error("rich item 'fields' is not an array")]
    FieldsNotArray,
    #[error("rich item field #{index} has no string '{key}'")]
    BadField { index: usize, key: &'static str },
}

/// Result of converting a list of raw rich items
#[derive(Debug, Default)]
pub struct Conversion {
    pub items: Vec<RichItem>,
    pub suspect_nested: bool,
}

/// Returns true if a raw rich item looks like a whole message in disguise.
///
/// Either the item carries a message-level key itself, or its description is
/// JSON text whose top-level object carries one.
pub fn is_suspect_nested(raw: &Value) -> bool {
    let Some(obj) = raw.as_object() else {
        return false;
    };
    if NESTED_ITEM_KEYS.iter().any(|key| obj.contains_key(*key)) {
        return true;
    }
    let Some(description) = obj.get("description").and_then(Value::as_str) else {
        return false;
    };
    let trimmed = description.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return false;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(parsed)) => NESTED_DESCRIPTION_KEYS
            .iter()
            .any(|key| parsed.contains_key(*key)),
        _ => false,
    }
}

/// Convert gateway rich items, flagging suspect nesting along the way.
///
/// Fails on the first item that cannot be converted.
pub fn convert_items(raw_items: &[Value]) -> Result<Conversion, ConversionError> {
    let mut conversion = Conversion::default();
    for raw in raw_items {
        if is_suspect_nested(raw) {
            conversion.suspect_nested = true;
        }
        conversion.items.push(RichItem::from_raw(raw)?);
    }
    Ok(conversion)
}

impl RichItem {
    /// Convert one raw rich item. Empty strings are treated as absent.
    pub fn from_raw(raw: &Value) -> Result<Self, ConversionError> {
        let obj = raw.as_object().ok_or(ConversionError::NotAnObject)?;

        let fields = match obj.get("fields") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(index, entry)| parse_field(index, entry))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(ConversionError::FieldsNotArray),
        };

        Ok(Self {
            title: text(obj, "title"),
            description: text(obj, "description"),
            fields,
            image_url: nested_text(obj, "image", "url"),
            url: text(obj, "url"),
            color: obj
                .get("color")
                .and_then(Value::as_u64)
                .and_then(|c| u32::try_from(c).ok()),
            footer_text: nested_text(obj, "footer", "text"),
            thumbnail_url: nested_text(obj, "thumbnail", "url"),
            author_name: nested_text(obj, "author", "name"),
        })
    }
}

fn parse_field(index: usize, entry: &Value) -> Result<RichField, ConversionError> {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or(ConversionError::BadField { index, key: "name" })?;
    let value = entry
        .get("value")
        .and_then(Value::as_str)
        .ok_or(ConversionError::BadField {
            index,
            key: "value",
        })?;
    Ok(RichField {
        name: name.to_string(),
        value: value.to_string(),
        inline: entry
            .get("inline")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn nested_text(obj: &Map<String, Value>, outer: &str, inner: &str) -> Option<String> {
    obj.get(outer)
        .and_then(Value::as_object)
        .and_then(|o| text(o, inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_item_is_not_suspect() {
        let raw = json!({"title": "Release", "description": "v1.2 is out"});
        assert!(!is_suspect_nested(&raw));
    }

    #[test]
    fn test_message_level_keys_are_suspect() {
        for key in ["embeds", "message", "messages"] {
            let mut raw = json!({"title": "x"});
            raw[key] = json!([]);
            assert!(is_suspect_nested(&raw), "key {key} should be suspect");
        }
    }

    #[test]
    fn test_json_description_with_content_is_suspect() {
        let raw = json!({"description": "  {\"content\": \"hello\", \"embeds\": []}"});
        assert!(is_suspect_nested(&raw));
    }

    #[test]
    fn test_json_description_without_message_keys_is_not_suspect() {
        let raw = json!({"description": "{\"price\": 10}"});
        assert!(!is_suspect_nested(&raw));
    }

    #[test]
    fn test_json_array_description_is_not_suspect() {
        let raw = json!({"description": "[{\"content\": \"x\"}]"});
        assert!(!is_suspect_nested(&raw));
    }

    #[test]
    fn test_broken_json_description_is_not_suspect() {
        let raw = json!({"description": "{not json at all"});
        assert!(!is_suspect_nested(&raw));
    }

    #[test]
    fn test_from_raw_full_item() {
        let raw = json!({
            "title": "Title",
            "description": "",
            "url": "https://example.com",
            "color": 16711680,
            "fields": [{"name": "a", "value": "b", "inline": true}, {"name": "c", "value": "d"}],
            "image": {"url": "https://cdn/img.png"},
            "thumbnail": {"url": "https://cdn/th.png"},
            "footer": {"text": "foot"},
            "author": {"name": "bob"}
        });
        let item = RichItem::from_raw(&raw).unwrap();
        assert_eq!(item.title.as_deref(), Some("Title"));
        assert_eq!(item.description, None);
        assert_eq!(item.fields.len(), 2);
        assert!(item.fields[0].inline);
        assert!(!item.fields[1].inline);
        assert_eq!(item.image_url.as_deref(), Some("https://cdn/img.png"));
        assert_eq!(item.color, Some(16711680));
        assert_eq!(item.footer_text.as_deref(), Some("foot"));
        assert_eq!(item.author_name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_from_raw_rejects_malformed() {
        assert_eq!(
            RichItem::from_raw(&json!("nope")),
            Err(ConversionError::NotAnObject)
        );
        assert_eq!(
            RichItem::from_raw(&json!({"fields": "x"})),
            Err(ConversionError::FieldsNotArray)
        );
        assert_eq!(
            RichItem::from_raw(&json!({"fields": [{"name": "n"}]})),
            Err(ConversionError::BadField {
                index: 0,
                key: "value"
            })
        );
    }

    #[test]
    fn test_convert_items_flags_any_suspect() {
        let raw = vec![json!({"title": "ok"}), json!({"message": {}})];
        let conversion = convert_items(&raw).unwrap();
        assert_eq!(conversion.items.len(), 2);
        assert!(conversion.suspect_nested);
    }
}
