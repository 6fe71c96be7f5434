//! Machine translation through an OpenAI-compatible chat-completion API.
//!
//! Translation failures are never fatal; every error path hands back the
//! original text.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::routing::TranslateSettings;
use crate::types::NormalizedMessage;

pub const DEFAULT_TRANSLATE_BASE_URL: &str = "https://geekai.co/api/v1";

/// Languages a prompt exists for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetLanguage {
    Chinese,
    English,
}

impl TargetLanguage {
    /// Case-insensitive; anything else is unsupported.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "chinese" => Some(Self::Chinese),
            "english" => Some(Self::English),
            _ => None,
        }
    }

    fn prompt(self, text: &str) -> String {
        match self {
            Self::Chinese => format!("请将以下文本翻译成中文，保持原有的格式和语气：\n\n{}", text),
            Self::English => format!(
                "Please translate the following text to English, maintaining the original format and tone:\n\n{}",
                text
            ),
        }
    }
}

impl std::fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chinese => write!(f, "chinese"),
            Self::English => write!(f, "english"),
        }
    }
}

/// Anything that can translate a single text
#[async_trait]
pub trait Translate: Send + Sync {
    /// Returns the input unchanged when it cannot translate.
    async fn translate(&self, text: &str, target_language: &str, model: &str) -> String;
}

pub struct ChatTranslator {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for ChatTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTranslator")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ChatTranslator {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn request(&self, prompt: String, model: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send translation request")?;

        let status = response.status();
        if status != StatusCode::OK {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Translation API returned status {}: {}",
                status,
                error_text
            ));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse translation response")?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Translation response had no choices[0].message.content"))
    }
}

#[async_trait]
impl Translate for ChatTranslator {
    async fn translate(&self, text: &str, target_language: &str, model: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }
        let Some(language) = TargetLanguage::parse(target_language) else {
            debug!("Unsupported target language {:?}, skipping", target_language);
            return text.to_string();
        };

        match self.request(language.prompt(text), model).await {
            Ok(translated) => {
                info!(
                    "Translated to {} ({}): {} -> {}",
                    language,
                    model,
                    preview(text),
                    preview(&translated)
                );
                translated
            }
            Err(e) => {
                error!("Translation failed: {:#}", e);
                text.to_string()
            }
        }
    }
}

/// Translate text, then each rich item's title, description, and fields in order.
///
/// A result equal to its input is left alone.
pub async fn translate_message(
    translator: &dyn Translate,
    mut message: NormalizedMessage,
    settings: &TranslateSettings,
) -> NormalizedMessage {
    let lang = settings.target_language.as_str();
    let model = settings.model.as_str();

    if message.has_text() {
        let translated = translator.translate(&message.text, lang, model).await;
        if translated != message.text {
            message.text = translated;
            info!("Message text translated to {}", lang);
        }
    }

    if !message.rich_items.is_empty() {
        info!("Translating {} rich item(s) ({})", message.rich_items.len(), model);
    }
    for item in &mut message.rich_items {
        translate_opt(translator, &mut item.title, lang, model).await;
        translate_opt(translator, &mut item.description, lang, model).await;
        for field in &mut item.fields {
            translate_in_place(translator, &mut field.name, lang, model).await;
            translate_in_place(translator, &mut field.value, lang, model).await;
        }
    }

    message
}

async fn translate_opt(
    translator: &dyn Translate,
    slot: &mut Option<String>,
    lang: &str,
    model: &str,
) {
    if let Some(text) = slot.as_mut() {
        translate_in_place(translator, text, lang, model).await;
    }
}

async fn translate_in_place(translator: &dyn Translate, text: &mut String, lang: &str, model: &str) {
    if text.is_empty() {
        return;
    }
    let translated = translator.translate(text, lang, model).await;
    if translated != *text {
        *text = translated;
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}
