//! Raw REST reads made as the listening identity.
//!
//! Requests authenticate exactly like the gateway client does, with the
//! `Bot <token>` form; responses are read as plain JSON, never through
//! client-library model types.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::normalize::LatestMessageSource;
use crate::routing::token_prefix;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// `Authorization` value for a bot token; an existing `Bot ` prefix is kept.
pub fn authorization_header(token: &str) -> String {
    let token = token.trim();
    if token.starts_with("Bot ") {
        token.to_string()
    } else {
        format!("Bot {}", token)
    }
}

pub struct DiscordRest {
    client: Client,
    token: String,
    api_base: String,
}

impl std::fmt::Debug for DiscordRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordRest")
            .field("token", &token_prefix(&self.token))
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl DiscordRest {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            client: Client::new(),
            token: authorization_header(&token),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

#[async_trait]
impl LatestMessageSource for DiscordRest {
    async fn latest_message(&self, channel_id: u64) -> Result<Option<Value>> {
        let url = self.url(&format!("/channels/{}/messages?limit=1", channel_id));
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.token)
            .send()
            .await
            .with_context(|| format!("Failed to fetch latest message of channel {}", channel_id))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Latest message fetch for channel {} failed: {} {}",
                channel_id, status, body
            );
            return Ok(None);
        }

        let messages: Vec<Value> = response
            .json()
            .await
            .context("Failed to parse latest message response")?;
        debug!(
            "Latest message fetch for channel {} returned {} message(s)",
            channel_id,
            messages.len()
        );
        Ok(messages.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_latest_message_sends_bot_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/channels/42/messages".to_string()))
            .match_query(Matcher::UrlEncoded("limit".into(), "1".into()))
            .match_header("authorization", "Bot listener-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"content": "latest", "embeds": []}, {"content": "older"}]"#)
            .create_async()
            .await;

        let rest = DiscordRest::new("listener-token", server.url());
        let message = rest.latest_message(42).await.unwrap().unwrap();
        assert_eq!(message["content"], "latest");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_latest_message_non_200_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/channels/42/messages".to_string()))
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let rest = DiscordRest::new("t", server.url());
        assert!(rest.latest_message(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_message_empty_list_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/channels/42/messages".to_string()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let rest = DiscordRest::new("t", server.url());
        assert!(rest.latest_message(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefixed_token_not_doubled() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/channels/9/messages".to_string()))
            .match_header("authorization", "Bot listener-token")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let rest = DiscordRest::new("Bot listener-token", server.url());
        assert!(rest.latest_message(9).await.unwrap().is_none());
        mock.assert_async().await;
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(authorization_header("abc"), "Bot abc");
        assert_eq!(authorization_header("Bot abc"), "Bot abc");
        assert_eq!(authorization_header(" abc\n"), "Bot abc");
    }
}
