use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

/// Payload format for a Google Chat incoming webhook
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub text: String,
}

/// Posts chat messages to a single webhook URL.
pub struct ChatWebhook {
    client: reqwest::Client,
    url: String,
}

impl ChatWebhook {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build webhook HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Send `text` as a chat message. Only a 200 response counts as delivered;
    /// the response body is returned on success.
    pub async fn send(&self, text: &str) -> Result<String> {
        let message = ChatMessage {
            text: text.to_string(),
        };
        let body = serde_json::to_vec(&message).context("Error marshaling chat message JSON")?;

        debug!("Posting {} bytes to chat webhook", body.len());

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("Error sending message to Google Chat")?;

        let status = response.status();
        let response_body = response.text().await.unwrap_or_default();
        if status != StatusCode::OK {
            anyhow::bail!(
                "Google Chat returned an error: {}, response: {}",
                status,
                response_body
            );
        }

        info!("Message sent successfully to Google Chat: {}", response_body);
        Ok(response_body)
    }
}
