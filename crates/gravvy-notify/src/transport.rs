use anyhow::{Context, Result};
use tracing::info;

use crate::planner::Delivery;

/// Where planned deliveries go.
#[derive(Clone)]
pub enum Transport {
    /// Log each delivery and drop it. Used in development and tests.
    Log,
    /// POST each delivery as JSON to a push/SMS gateway.
    Webhook { client: reqwest::Client, url: String },
}

impl Transport {
    pub fn webhook(url: String) -> Self {
        Self::Webhook {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub async fn deliver(&self, delivery: &Delivery) -> Result<()> {
        match self {
            Self::Log => {
                match delivery {
                    Delivery::Push {
                        user_id,
                        platform,
                        alert,
                        extra,
                        ..
                    } => info!(
                        "push -> user {} ({}): {:?} [{:?}]",
                        user_id, platform, alert, extra.action
                    ),
                    Delivery::Sms { to, body } => info!("sms -> {}: {}", to, body),
                }
                Ok(())
            }
            Self::Webhook { client, url } => {
                client
                    .post(url)
                    .json(delivery)
                    .send()
                    .await
                    .with_context(|| format!("Failed to reach notification gateway {url}"))?
                    .error_for_status()
                    .context("Notification gateway rejected delivery")?;
                Ok(())
            }
        }
    }
}
