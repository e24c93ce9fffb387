use anyhow::{Context, Result};
use std::time::Duration;
use tracing::debug;

pub const PROJECT_ID_ENV: &str = "GCP_PROJECT_ID";
pub const TOPICS_ENV: &str = "PUBSUB_TOPICS";
pub const WEBHOOK_ENV: &str = "GOOGLE_CHAT_WEBHOOK";
pub const WEBHOOK_TIMEOUT_ENV: &str = "WEBHOOK_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    /// Raw comma-separated topic list, see [`Config::topics`]
    pub topic_list: String,
    pub webhook_url: String,
    /// No timeout unless `WEBHOOK_TIMEOUT_SECS` is set
    pub webhook_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    /// Unset and empty values are both treated as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let project_id = get(PROJECT_ID_ENV);
        let topic_list = get(TOPICS_ENV);
        let webhook_url = get(WEBHOOK_ENV);

        let (project_id, topic_list, webhook_url) = match (project_id, topic_list, webhook_url) {
            (Some(p), Some(t), Some(w)) => (p, t, w),
            (p, t, w) => {
                let missing: Vec<&str> = [
                    (PROJECT_ID_ENV, p.is_none()),
                    (TOPICS_ENV, t.is_none()),
                    (WEBHOOK_ENV, w.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| name)
                .collect();
                anyhow::bail!(
                    "Please set {}, {}, and {} environment variables (missing: {})",
                    PROJECT_ID_ENV,
                    TOPICS_ENV,
                    WEBHOOK_ENV,
                    missing.join(", ")
                );
            }
        };

        let webhook_timeout = match get(WEBHOOK_TIMEOUT_ENV) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().with_context(|| {
                    format!(
                        "Invalid {}: '{}' is not a whole number of seconds",
                        WEBHOOK_TIMEOUT_ENV, raw
                    )
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            project_id,
            topic_list,
            webhook_url,
            webhook_timeout,
        })
    }

    /// Topic names from the comma-separated list, trimmed, blanks dropped.
    pub fn topics(&self) -> Vec<&str> {
        self.topic_list
            .split(',')
            .map(str::trim)
            .enumerate()
            .filter_map(|(position, topic)| {
                if topic.is_empty() {
                    debug!(
                        "Ignoring empty entry #{} in {}: {:?}",
                        position + 1,
                        TOPICS_ENV,
                        self.topic_list
                    );
                    None
                } else {
                    Some(topic)
                }
            })
            .collect()
    }
}
