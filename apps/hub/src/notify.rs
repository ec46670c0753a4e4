//! Outage notification senders.
//!
//! Delivery itself (email, chat) belongs to whatever sits behind the
//! webhook; the hub only announces that an alert is due.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::database::models::{MonitoredTarget, Owner};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_outage_alert(
        &self,
        owner: &Owner,
        target: &MonitoredTarget,
        location: Option<&str>,
    ) -> Result<()>;
}

/// Writes alerts to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_outage_alert(
        &self,
        owner: &Owner,
        target: &MonitoredTarget,
        location: Option<&str>,
    ) -> Result<()> {
        warn!(
            owner = %owner.email,
            target = %target.uuid,
            url = %target.url,
            location = location.unwrap_or("unknown"),
            "Outage detected"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutagePayload<'a> {
    owner_id: Uuid,
    owner_email: &'a str,
    target_id: Uuid,
    url: &'a str,
    location: Option<&'a str>,
}

/// POSTs a JSON alert to a configured URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let url = url::Url::parse(url).with_context(|| format!("Invalid webhook URL: {url}"))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_outage_alert(
        &self,
        owner: &Owner,
        target: &MonitoredTarget,
        location: Option<&str>,
    ) -> Result<()> {
        let payload = OutagePayload {
            owner_id: owner.uuid,
            owner_email: &owner.email,
            target_id: target.uuid,
            url: &target.url,
            location,
        };

        self.client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .context("Failed to reach alert webhook")?
            .error_for_status()
            .context("Alert webhook rejected the alert")?;

        Ok(())
    }
}
