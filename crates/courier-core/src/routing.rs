//! Static routing built at startup: source channel → destination channel,
//! destination channel → owning outbound identity token.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("invalid channel id '{0}'")]
    InvalidChannelId(String),
    #[error("source channel {0} is mapped more than once")]
    DuplicateSource(u64),
    #[error("target channel {channel} is claimed by both '{first}' and '{second}'")]
    DuplicateTarget {
        channel: u64,
        first: String,
        second: String,
    },
}

/// Parse a channel id, rejecting zero and non-numeric values.
pub fn parse_channel_id(raw: &str) -> Result<u64, RoutingError> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(RoutingError::InvalidChannelId(raw.to_string())),
        Ok(id) => Ok(id),
    }
}

/// Per-channel translation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default = "default_translate_model")]
    pub model: String,
}

fn default_target_language() -> String {
    "chinese".to_string()
}

fn default_translate_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for TranslateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            target_language: default_target_language(),
            model: default_translate_model(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    pub source_channel_id: u64,
    pub target_channel_id: u64,
    pub translate: Option<TranslateSettings>,
}

impl ChannelMapping {
    /// Translation settings, only when enabled.
    pub fn active_translation(&self) -> Option<&TranslateSettings> {
        self.translate.as_ref().filter(|t| t.enabled)
    }
}

/// A destination channel declared by one outbound identity
#[derive(Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    pub target_channel_id: u64,
    pub owning_token: String,
    /// Human label of the owning identity, used in errors and logs
    pub remark: String,
}

impl std::fmt::Debug for RoutingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEntry")
            .field("target_channel_id", &self.target_channel_id)
            .field("owning_token", &token_prefix(&self.owning_token))
            .field("remark", &self.remark)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    mappings: HashMap<u64, ChannelMapping>,
    owners: HashMap<u64, RoutingEntry>,
}

impl RoutingTable {
    /// Build the table, rejecting duplicate sources and contested targets.
    pub fn build(
        mappings: impl IntoIterator<Item = ChannelMapping>,
        entries: impl IntoIterator<Item = RoutingEntry>,
    ) -> Result<Self, RoutingError> {
        let mut table = Self::default();

        for mapping in mappings {
            let source = mapping.source_channel_id;
            if table.mappings.insert(source, mapping).is_some() {
                return Err(RoutingError::DuplicateSource(source));
            }
        }

        for entry in entries {
            if let Some(existing) = table.owners.get(&entry.target_channel_id) {
                return Err(RoutingError::DuplicateTarget {
                    channel: entry.target_channel_id,
                    first: existing.remark.clone(),
                    second: entry.remark,
                });
            }
            table.owners.insert(entry.target_channel_id, entry);
        }

        for target in table.unowned_targets() {
            warn!(
                "Target channel {} has no owning bot; messages routed there will be dropped",
                target
            );
        }

        Ok(table)
    }

    pub fn mapping(&self, source_channel_id: u64) -> Option<&ChannelMapping> {
        self.mappings.get(&source_channel_id)
    }

    pub fn target_for(&self, source_channel_id: u64) -> Option<u64> {
        self.mapping(source_channel_id).map(|m| m.target_channel_id)
    }

    pub fn owner_of(&self, target_channel_id: u64) -> Option<&RoutingEntry> {
        self.owners.get(&target_channel_id)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &ChannelMapping> {
        self.mappings.values()
    }

    /// Mapped targets that no identity declared, sorted.
    pub fn unowned_targets(&self) -> Vec<u64> {
        let mut targets: Vec<u64> = self
            .mappings
            .values()
            .map(|m| m.target_channel_id)
            .filter(|t| !self.owners.contains_key(t))
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}

/// First ten characters of a token, safe for logs.
pub fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(10).collect();
    format!("{}...", prefix)
}
