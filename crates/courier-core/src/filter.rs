//! Content filtering and keyword substitution

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::types::de_snowflakes;

/// Keyword include/exclude lists (mirrors `[keyword_filter]` in config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Author include/exclude lists (mirrors `[user_filter]` in config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFilter {
    #[serde(default, deserialize_with = "de_snowflakes")]
    pub include: Vec<u64>,
    #[serde(default, deserialize_with = "de_snowflakes")]
    pub exclude: Vec<u64>,
}

/// One literal substitution, applied in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceRule {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

/// Decides whether a message is forwarded and rewrites its text
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    include_users: HashSet<u64>,
    exclude_users: HashSet<u64>,
    include_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
    replacements: Vec<ReplaceRule>,
}

impl ContentFilter {
    pub fn new(keywords: &KeywordFilter, users: &UserFilter, replacements: &[ReplaceRule]) -> Self {
        let replacements = replacements
            .iter()
            .filter(|rule| {
                if rule.from.is_empty() {
                    warn!("Ignoring keyword_replace rule with empty 'from' (to = {:?})", rule.to);
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        Self {
            include_users: users.include.iter().copied().collect(),
            exclude_users: users.exclude.iter().copied().collect(),
            include_keywords: keywords.include.clone(),
            exclude_keywords: keywords.exclude.clone(),
            replacements,
        }
    }

    /// Pure predicate over (content, author). All checks must pass.
    pub fn should_forward(&self, content: &str, author_id: u64) -> bool {
        if !self.include_users.is_empty() && !self.include_users.contains(&author_id) {
            debug!("Author {} not in include list", author_id);
            return false;
        }
        if self.exclude_users.contains(&author_id) {
            debug!("Author {} is excluded", author_id);
            return false;
        }
        if !self.include_keywords.is_empty()
            && !self.include_keywords.iter().any(|k| content.contains(k.as_str()))
        {
            debug!("Content matches no include keyword");
            return false;
        }
        if let Some(keyword) = self
            .exclude_keywords
            .iter()
            .find(|k| content.contains(k.as_str()))
        {
            debug!("Content contains excluded keyword {:?}", keyword);
            return false;
        }
        true
    }

    /// Apply every replacement rule to the output of the previous one.
    pub fn apply_replacements(&self, content: &str) -> String {
        self.replacements
            .iter()
            .fold(content.to_string(), |acc, rule| acc.replace(&rule.from, &rule.to))
    }
}
