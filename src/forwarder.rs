use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::{Broker, InboundMessage, MessageHandler};
use crate::chat::ChatWebhook;

/// Relays every message from one subscription to the chat webhook.
///
/// Messages are acked whether or not the webhook accepted them, so a failed
/// POST drops the message for good.
pub struct Forwarder {
    topic: String,
    subscription: String,
    webhook: Arc<ChatWebhook>,
}

impl Forwarder {
    pub fn new(topic: &str, subscription: &str, webhook: Arc<ChatWebhook>) -> Self {
        Self {
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            webhook,
        }
    }
}

#[async_trait]
impl MessageHandler for Forwarder {
    async fn handle(&self, message: InboundMessage) {
        let text = message.text();
        info!(
            "Received message from topic {}, subscription {}: {:?}",
            self.topic, self.subscription, text
        );

        if let Err(e) = self.webhook.send(&text).await {
            error!(
                "Error sending message to Google Chat (topic {}, subscription {}): {:#}",
                self.topic, self.subscription, e
            );
        }

        if let Err(e) = message.ack().await {
            error!("Subscription {}: {:#}", self.subscription, e);
        }
    }
}

/// Run the receive loop for one subscription until cancelled.
/// An error means the loop died and the caller should treat it as fatal.
pub async fn run_forwarder(
    broker: Arc<dyn Broker>,
    topic: String,
    subscription: String,
    webhook: Arc<ChatWebhook>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(
        "Listening on subscription {} for topic {}",
        subscription, topic
    );
    let handler = Arc::new(Forwarder::new(&topic, &subscription, webhook));

    broker
        .receive(&subscription, handler, cancel)
        .await
        .with_context(|| format!("Receive loop for subscription {} failed", subscription))?;

    info!("Receive loop for subscription {} stopped", subscription);
    Ok(())
}
