use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

pub const DISCORD_API_BASE: &str = "https://discordapp.com";

/// Read-only snapshot of everything one send needs, taken on the UI thread
/// before the work is handed to a background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub token: String,
    pub user_id: String,
    pub server_id: String,
    pub channel_id: String,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// One outbound call, no retries.
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DiscordSender {
    client: Client,
    base_url: String,
}

impl DiscordSender {
    pub fn new() -> Self {
        Self::with_base_url(DISCORD_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for DiscordSender {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    content: &'a str,
}

#[async_trait]
impl MessageSender for DiscordSender {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let response = self
            .client
            .post(messages_url(&self.base_url, &message.channel_id))
            .header("authorization", &message.token)
            .header("user-id", &message.user_id)
            .header(
                "referrer",
                referrer_url(&message.server_id, &message.channel_id),
            )
            .json(&MessagePayload {
                content: &message.content,
            })
            .send()
            .await
            .context("failed to call Discord API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Discord API error {status}: {body}");
        }

        Ok(())
    }
}

fn messages_url(base_url: &str, channel_id: &str) -> String {
    format!("{base_url}/api/v6/channels/{channel_id}/messages")
}

fn referrer_url(server_id: &str, channel_id: &str) -> String {
    format!("https://discord.com/channels/{server_id}/{channel_id}")
}

#[cfg(test)]
mod tests {
    use super::{MessagePayload, messages_url, referrer_url};

    #[test]
    fn builds_channel_messages_url() {
        assert_eq!(
            messages_url("https://discordapp.com", "999"),
            "https://discordapp.com/api/v6/channels/999/messages"
        );
    }

    #[test]
    fn builds_referrer_from_server_and_channel() {
        assert_eq!(
            referrer_url("123", "456"),
            "https://discord.com/channels/123/456"
        );
    }

    #[test]
    fn payload_serializes_content_only() {
        let json = serde_json::to_string(&MessagePayload { content: "hello" })
            .expect("payload serializes");
        assert_eq!(json, r#"{"content":"hello"}"#);
    }
}
