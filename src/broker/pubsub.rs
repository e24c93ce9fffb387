use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use google_cloud_pubsub::client::{Client, ClientConfig};
use google_cloud_pubsub::subscriber::ReceivedMessage;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{pump_messages, AckHandle, Broker, InboundMessage, MessageHandler};

/// Google Cloud Pub/Sub backed broker.
///
/// A single client is opened per process and shared by every receive loop.
/// When `PUBSUB_EMULATOR_HOST` is set the client talks to the emulator and
/// skips credential lookup.
pub struct PubsubBroker {
    client: Client,
}

impl PubsubBroker {
    /// Open a client for `project_id` using application-default credentials.
    pub async fn connect(project_id: &str) -> Result<Self> {
        let config = ClientConfig {
            project_id: Some(project_id.to_string()),
            ..Default::default()
        }
        .with_auth()
        .await
        .context("Failed to load Google Cloud credentials")?;

        let client = Client::new(config)
            .await
            .context("Failed to create Pub/Sub client")?;

        info!("Connected to Pub/Sub for project: {}", project_id);
        Ok(Self { client })
    }
}

struct PubsubAck(ReceivedMessage);

#[async_trait]
impl AckHandle for PubsubAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.0
            .ack()
            .await
            .context("Failed to acknowledge Pub/Sub message")
    }
}

#[async_trait]
impl Broker for PubsubBroker {
    fn list_subscriptions(&self) -> BoxStream<'_, Result<String>> {
        // The client collects every page in one call; the stream only
        // spreads the config lookups out over consumption.
        stream::once(async move {
            self.client
                .get_subscriptions(None)
                .await
                .context("Error listing subscriptions")
        })
        .flat_map(|listed| match listed {
            Ok(subscriptions) => {
                stream::iter(subscriptions.into_iter().map(|s| Ok(s.id()))).boxed()
            }
            Err(e) => stream::iter([Err(e)]).boxed(),
        })
        .boxed()
    }

    async fn bound_topic(&self, subscription: &str) -> Result<String> {
        let (topic, _config) = self
            .client
            .subscription(subscription)
            .config(None)
            .await
            .with_context(|| format!("Error getting config for subscription {}", subscription))?;
        Ok(topic)
    }

    async fn receive(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        // Subscription::receive never surfaces a dead streaming pull; the
        // stream from subscribe ends instead.
        let mut stream = self
            .client
            .subscription(subscription)
            .subscribe(None)
            .await
            .with_context(|| format!("Error subscribing to subscription {}", subscription))?;

        let result = {
            let mut messages = stream.by_ref().map(|message: ReceivedMessage| {
                let data = message.message.data.to_vec();
                InboundMessage::new(data, Box::new(PubsubAck(message)))
            });
            pump_messages(subscription, &mut messages, handler.as_ref(), &cancel).await
        };

        // Stops the pull and nacks anything still buffered
        stream.dispose().await;

        result.with_context(|| format!("Error receiving messages from subscription {}", subscription))
    }
}
