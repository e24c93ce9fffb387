use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info};

use crate::broker::{topic_path, Broker};

/// Find the subscriptions bound to `topic`.
///
/// Every subscription in the project is listed and its binding fetched; those
/// bound to `projects/{project_id}/topics/{topic}` are returned in listing
/// order. The first listing or config error aborts the whole resolution.
pub async fn resolve_subscriptions(
    broker: &dyn Broker,
    project_id: &str,
    topic: &str,
) -> Result<Vec<String>> {
    let full_topic = topic_path(project_id, topic.trim());
    info!("Checking subscriptions for topic: {}", full_topic);

    let mut matches = Vec::new();
    let mut listing = broker.list_subscriptions();
    while let Some(subscription) = listing.next().await {
        let subscription = subscription.context("Error listing subscriptions")?;
        let bound = broker
            .bound_topic(&subscription)
            .await
            .with_context(|| format!("Error getting subscription config for {}", subscription))?;

        if bound == full_topic {
            debug!("Subscription {} is bound to {}", subscription, full_topic);
            matches.push(subscription);
        }
    }

    if matches.is_empty() {
        info!("No subscriptions found for topic: {}", topic);
    }

    Ok(matches)
}
