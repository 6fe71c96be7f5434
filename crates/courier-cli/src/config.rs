use anyhow::{Context, Result, bail};
use courier_core::rest::DEFAULT_API_BASE;
use courier_core::routing::{
    ChannelMapping, RoutingEntry, RoutingTable, TranslateSettings, parse_channel_id,
};
use courier_core::translate::DEFAULT_TRANSLATE_BASE_URL;
use courier_core::{KeywordFilter, ReplaceRule, UserFilter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    pub listener_token: String,
    #[serde(default = "default_api_base")]
    pub discord_api_base: String,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub bots: Vec<BotConfig>,
    #[serde(default)]
    pub channel_mapping: BTreeMap<String, MappingConfig>,
    #[serde(default)]
    pub keyword_filter: KeywordFilter,
    #[serde(default)]
    pub keyword_replace: Vec<ReplaceRule>,
    #[serde(default)]
    pub user_filter: UserFilter,
}

impl std::fmt::Debug for CourierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierConfig")
            .field("listener_token", &mask_secret(&self.listener_token))
            .field("discord_api_base", &self.discord_api_base)
            .field("translation", &self.translation)
            .field("bots", &self.bots)
            .field("channel_mapping", &self.channel_mapping)
            .field("keyword_filter", &self.keyword_filter)
            .field("keyword_replace", &self.keyword_replace)
            .field("user_filter", &self.user_filter)
            .finish()
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_translate_base_url")]
    pub base_url: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_translate_base_url(),
        }
    }
}

impl std::fmt::Debug for TranslationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn default_translate_base_url() -> String {
    DEFAULT_TRANSLATE_BASE_URL.to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub token: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub target_channels: Vec<String>,
}

impl BotConfig {
    /// Remark if set, otherwise the masked token.
    pub fn label(&self) -> String {
        if self.remark.is_empty() {
            mask_secret(&self.token)
        } else {
            self.remark.clone()
        }
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &mask_secret(&self.token))
            .field("remark", &self.remark)
            .field("target_channels", &self.target_channels)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub target: String,
    #[serde(default)]
    pub translate: Option<TranslateSettings>,
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".courier")
}

impl CourierConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `courier init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config at {}", path.display()))?;
        Self::warn_hardcoded_secrets(&content);
        Ok(config)
    }

    /// Expand allowlisted env vars, parse, and validate.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listener_token.trim().is_empty() {
            bail!("listener_token is empty; set it or export COURIER_LISTENER_TOKEN");
        }
        for (i, bot) in self.bots.iter().enumerate() {
            if bot.token.trim().is_empty() {
                bail!("bot #{} ('{}') has an empty token", i + 1, bot.remark);
            }
        }
        // Channel ids and ownership conflicts are checked by building the table
        self.routing_table()?;
        Ok(())
    }

    /// Warn about tokens written literally instead of as `${VAR}` references.
    fn warn_hardcoded_secrets(raw: &str) {
        let Ok(doc) = raw.parse::<toml::Table>() else {
            return;
        };
        let literal = |v: Option<&toml::Value>| {
            v.and_then(|v| v.as_str())
                .is_some_and(|s| !s.is_empty() && !s.contains("${"))
        };

        if literal(doc.get("listener_token")) {
            warn!(
                "Listener token is hardcoded in config file. For security, use environment variables: listener_token = \"${{COURIER_LISTENER_TOKEN}}\""
            );
        }
        let bots = doc.get("bots").and_then(|b| b.as_array());
        for (i, bot) in bots.into_iter().flatten().enumerate() {
            if literal(bot.get("token")) {
                warn!(
                    "Token of bot #{} is hardcoded in config file. For security, use environment variables: token = \"${{COURIER_BOT_TOKEN_{}}}\"",
                    i + 1,
                    i + 1
                );
            }
        }
        if literal(doc.get("translation").and_then(|t| t.get("api_key"))) {
            warn!(
                "Translation API key is hardcoded in config file. For security, use environment variables: api_key = \"${{GEEKAI_API_KEY}}\""
            );
        }
    }

    pub fn mappings(&self) -> Result<Vec<ChannelMapping>> {
        self.channel_mapping
            .iter()
            .map(|(source, mapping)| {
                Ok(ChannelMapping {
                    source_channel_id: parse_channel_id(source)?,
                    target_channel_id: parse_channel_id(&mapping.target)?,
                    translate: mapping.translate.clone(),
                })
            })
            .collect()
    }

    pub fn routing_entries(&self) -> Result<Vec<RoutingEntry>> {
        let mut entries = Vec::new();
        for bot in &self.bots {
            let mut seen = BTreeSet::new();
            for raw in &bot.target_channels {
                let channel = parse_channel_id(raw)?;
                if !seen.insert(channel) {
                    continue;
                }
                entries.push(RoutingEntry {
                    target_channel_id: channel,
                    owning_token: bot.token.clone(),
                    remark: bot.label(),
                });
            }
        }
        Ok(entries)
    }

    pub fn routing_table(&self) -> Result<RoutingTable> {
        Ok(RoutingTable::build(self.mappings()?, self.routing_entries()?)?)
    }

    /// Source channels the listener should convert events for.
    pub fn source_channels(&self) -> Result<Vec<u64>> {
        Ok(self.mappings()?.iter().map(|m| m.source_channel_id).collect())
    }

    pub fn translation_key(&self) -> Option<&str> {
        let key = self.translation.api_key.trim();
        (!key.is_empty() && !key.starts_with("${")).then_some(key)
    }
}

/// Refuse to read a token-bearing file that group or other can read.
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                bail!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It contains tokens. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "COURIER_LISTENER_TOKEN",
    "COURIER_BOT_TOKEN_1",
    "COURIER_BOT_TOKEN_2",
    "COURIER_BOT_TOKEN_3",
    "COURIER_BOT_TOKEN_4",
    "COURIER_BOT_TOKEN_5",
    "COURIER_BOT_TOKEN_6",
    "COURIER_BOT_TOKEN_7",
    "COURIER_BOT_TOKEN_8",
    "COURIER_BOT_TOKEN_9",
    "GEEKAI_API_KEY",
    "OPENAI_API_KEY",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
listener_token = "listener-token-abcdef"

[translation]
api_key = "sk-translate-123456"

[[bots]]
token = "bot-token-one-123456"
remark = "first"
target_channels = ["2222", "3333"]

[[bots]]
token = "bot-token-two-123456"
remark = "second"
target_channels = ["4444"]

[channel_mapping."1111"]
target = "2222"
translate = { enabled = true, target_language = "english" }

[channel_mapping."5555"]
target = "4444"

[keyword_filter]
exclude = ["buy"]

[[keyword_replace]]
from = "foo"
to = "bar"

[user_filter]
exclude = ["99", 100]
"#;

    #[test]
    fn test_parse_full_config() {
        let config = CourierConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.discord_api_base, DEFAULT_API_BASE);
        assert_eq!(config.translation.base_url, DEFAULT_TRANSLATE_BASE_URL);
        assert_eq!(config.bots.len(), 2);
        assert_eq!(config.keyword_filter.exclude, vec!["buy"]);
        assert_eq!(config.keyword_replace[0].to, "bar");
        assert_eq!(config.user_filter.exclude, vec![99, 100]);

        let table = config.routing_table().unwrap();
        assert_eq!(table.target_for(1111), Some(2222));
        assert_eq!(table.owner_of(4444).unwrap().remark, "second");
        let translate = table.mapping(1111).unwrap().active_translation().unwrap();
        assert_eq!(translate.target_language, "english");
        assert_eq!(translate.model, "gpt-4o-mini");
        assert!(table.mapping(5555).unwrap().active_translation().is_none());
    }

    #[test]
    fn test_source_channels() {
        let config = CourierConfig::parse(SAMPLE).unwrap();
        let mut sources = config.source_channels().unwrap();
        sources.sort_unstable();
        assert_eq!(sources, vec![1111, 5555]);
    }

    #[test]
    fn test_default_template_parses() {
        let raw = include_str!("../../../config/default.toml");
        let config: CourierConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.listener_token, "${COURIER_LISTENER_TOKEN}");
        assert_eq!(config.bots.len(), 1);
        assert!(config.channel_mapping.is_empty());
        assert!(config.routing_table().unwrap().unowned_targets().is_empty());
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = CourierConfig::parse(r#"listener_token = "tok""#).unwrap();
        assert!(config.bots.is_empty());
        assert!(config.channel_mapping.is_empty());
        assert!(config.keyword_replace.is_empty());
        assert!(config.translation_key().is_none());
    }

    #[test]
    fn test_empty_listener_token_rejected() {
        let err = CourierConfig::parse(r#"listener_token = """#).unwrap_err();
        assert!(format!("{:#}", err).contains("listener_token"));
    }

    #[test]
    fn test_invalid_channel_id_rejected() {
        let doc = r#"
listener_token = "tok"
[channel_mapping."general"]
target = "2222"
"#;
        let err = CourierConfig::parse(doc).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid channel id 'general'"));
    }

    #[test]
    fn test_contested_target_rejected() {
        let doc = r#"
listener_token = "tok"
[[bots]]
token = "a-token-123"
remark = "a"
target_channels = ["2222"]
[[bots]]
token = "b-token-123"
remark = "b"
target_channels = ["2222"]
"#;
        let err = CourierConfig::parse(doc).unwrap_err();
        assert!(format!("{:#}", err).contains("claimed by both 'a' and 'b'"));
    }

    #[test]
    fn test_repeated_target_within_one_bot_allowed() {
        let doc = r#"
listener_token = "tok"
[[bots]]
token = "a-token-123"
target_channels = ["2222", "2222"]
"#;
        let config = CourierConfig::parse(doc).unwrap();
        assert_eq!(config.routing_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_debug_masks_secrets() {
        let config = CourierConfig::parse(SAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("listener-token-abcdef"));
        assert!(!debug.contains("bot-token-one-123456"));
        assert!(!debug.contains("sk-translate-123456"));
        assert!(debug.contains("lis...cdef"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("abcdefghijkl"), "abc...ijkl");
    }

    #[test]
    fn test_expand_env_vars_skips_unlisted() {
        let out = expand_env_vars("token = \"${SOME_RANDOM_SECRET}\"");
        assert_eq!(out, "token = \"${SOME_RANDOM_SECRET}\"");
    }

    #[test]
    fn test_expand_env_vars_allowlisted() {
        let home = std::env::var("HOME").unwrap_or_default();
        let out = expand_env_vars("dir = \"${HOME}/x\"");
        assert_eq!(out, format!("dir = \"{}/x\"", home));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
                .unwrap();
        }
        let config = CourierConfig::load(&Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.bots[0].label(), "first");
    }

    #[cfg(unix)]
    #[test]
    fn test_load_refuses_open_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = CourierConfig::load(&Some(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("overly permissive"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CourierConfig::load(&Some(dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("courier init"));
    }
}
