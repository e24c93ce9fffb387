pub mod pubsub;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

pub use pubsub::PubsubBroker;

/// Fully-qualified topic path as reported in a subscription's binding.
pub fn topic_path(project_id: &str, topic: &str) -> String {
    format!("projects/{}/topics/{}", project_id, topic)
}

/// Consumer-side view of a message broker (topics, subscriptions, delivery).
///
/// Implementations must be safe to share between every receive loop.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Every subscription id visible to the project, consumed lazily.
    fn list_subscriptions(&self) -> BoxStream<'_, Result<String>>;

    /// Fully-qualified path of the topic `subscription` is bound to.
    async fn bound_topic(&self, subscription: &str) -> Result<String>;

    /// Deliver messages from `subscription` to `handler` until `cancel` fires.
    ///
    /// Returns `Ok(())` once cancelled; an `Err` is a fatal transport failure.
    async fn receive(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Hand each message from `messages` to `handler`, in order, until `cancel`
/// fires. A stream that ends while not cancelled means the underlying pull
/// died, which is reported as an error.
pub async fn pump_messages<S>(
    subscription: &str,
    messages: &mut S,
    handler: &dyn MessageHandler,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: Stream<Item = InboundMessage> + Unpin + Send,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = messages.next() => match next {
                Some(message) => handler.handle(message).await,
                None if cancel.is_cancelled() => return Ok(()),
                None => anyhow::bail!("Streaming pull for subscription {} terminated", subscription),
            },
        }
    }
}

/// Called once per delivered message; owns the message until it is acked.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

/// Broker-specific acknowledgment capability
#[async_trait]
pub trait AckHandle: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// A message received from a subscription
pub struct InboundMessage {
    pub data: Vec<u8>,
    acker: Box<dyn AckHandle>,
}

impl InboundMessage {
    pub fn new(data: Vec<u8>, acker: Box<dyn AckHandle>) -> Self {
        Self { data, acker }
    }

    /// Payload as text; invalid UTF-8 sequences become U+FFFD.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Tell the broker the message is handled and must not be redelivered.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("data", &String::from_utf8_lossy(&self.data))
            .finish_non_exhaustive()
    }
}
