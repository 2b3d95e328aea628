//! Best-effort e-mail alerting for the connectivity monitor and the manual
//! start/stop commands. Send failures are logged and never propagate.

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, message: &str) -> anyhow::Result<()>;
}

/// Posts alerts to a SendGrid-style mail API.
pub struct EmailNotifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
    to: String,
}

impl EmailNotifier {
    pub fn new(endpoint: &str, api_key: &str, from: &str, to: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_alert(&self, message: &str) -> anyhow::Result<()> {
        let subject = format!(
            "RFID portal alert - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let body = json!({
            "personalizations": [{ "to": [{ "email": self.to }] }],
            "from": { "email": self.from },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": message }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("mail API returned HTTP {}", response.status());
        }
        log::info!("Alert mail sent: {subject}");
        Ok(())
    }
}

/// Used when no mail credentials are configured; alerts go to the log only.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_alert(&self, message: &str) -> anyhow::Result<()> {
        log::info!("Alert (mail disabled): {message}");
        Ok(())
    }
}
