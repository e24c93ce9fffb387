use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::chat::ChatWebhook;
use crate::config::Config;
use crate::forwarder::run_forwarder;
use crate::resolver::resolve_subscriptions;

/// The receive loops started by [`launch`]
pub struct Running {
    subscriptions: Vec<String>,
    tasks: Vec<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
}

impl Running {
    /// Subscription ids with a running loop, in start order
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Wait for every loop to finish.
    ///
    /// The first loop that fails cancels all the others and its error is
    /// returned, taking the whole bridge down with it.
    pub async fn wait(self) -> Result<()> {
        if self.tasks.is_empty() {
            warn!("No subscriptions to forward, nothing to do");
            return Ok(());
        }

        let mut pending: FuturesUnordered<_> = self.tasks.into_iter().collect();
        while let Some(joined) = pending.next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow!("Receive loop panicked: {}", e)),
            };
            if let Err(e) = outcome {
                error!("Fatal receive error, shutting down: {:#}", e);
                self.cancel.cancel();
                return Err(e);
            }
        }

        info!("All receive loops stopped");
        Ok(())
    }
}

/// Resolve every configured topic and start one receive loop per subscription.
///
/// Topics that fail to resolve or have no subscriptions are logged and skipped.
/// Once `cancel` fires, by shutdown or by a loop that already died, the
/// remaining topics are not resolved.
pub async fn launch(
    config: &Config,
    broker: Arc<dyn Broker>,
    webhook: Arc<ChatWebhook>,
    cancel: CancellationToken,
) -> Running {
    let mut running = Running {
        subscriptions: Vec::new(),
        tasks: Vec::new(),
        cancel: cancel.clone(),
    };

    for topic in config.topics() {
        if cancel.is_cancelled() {
            warn!("Cancelled, not resolving topic {} or any after it", topic);
            break;
        }
        info!("Processing topic: {}", topic);

        let subscriptions =
            match resolve_subscriptions(broker.as_ref(), &config.project_id, topic).await {
                Ok(subs) => subs,
                Err(e) => {
                    error!("Error getting subscriptions for topic {}: {:#}", topic, e);
                    continue;
                }
            };

        if subscriptions.is_empty() {
            info!("Skipping topic {} as it has no active subscriptions.", topic);
            continue;
        }

        for subscription in subscriptions {
            let forwarder = run_forwarder(
                broker.clone(),
                topic.to_string(),
                subscription.clone(),
                webhook.clone(),
                cancel.clone(),
            );
            let abort = cancel.clone();
            running.tasks.push(tokio::spawn(async move {
                let result = forwarder.await;
                // A dead loop takes every other loop down with it right away
                if result.is_err() {
                    abort.cancel();
                }
                result
            }));
            running.subscriptions.push(subscription);
        }
    }

    running
}

/// Launch every receive loop and block until they all stop.
pub async fn run(
    config: &Config,
    broker: Arc<dyn Broker>,
    webhook: Arc<ChatWebhook>,
    cancel: CancellationToken,
) -> Result<()> {
    let running = launch(config, broker, webhook, cancel).await;
    info!(
        "Started {} receive loop(s): {:?}",
        running.subscriptions().len(),
        running.subscriptions()
    );
    running.wait().await
}
