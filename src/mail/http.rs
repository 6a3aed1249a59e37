//! Transactional mail API transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::{MailError, MailTransport, OutgoingMail};
use crate::config::MailConfig;

/// Posts messages as JSON to `{api_base}/send`, retrying with exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpMailTransport {
    client: Client,
    endpoint: Url,
    max_attempts: u32,
    initial_delay: Duration,
}

impl HttpMailTransport {
    /// Returns `None` when no mail API is configured.
    pub fn from_config(config: &MailConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_base) = &config.api_base else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let mut endpoint = Url::parse(api_base)?;
        let path = format!("{}/send", endpoint.path().trim_end_matches('/'));
        endpoint.set_path(&path);

        Ok(Some(Self {
            client,
            endpoint,
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
        }))
    }

    /// Shortens the first backoff delay; tests use this to stay fast.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    async fn send_once(&self, api_token: &str, mail: &OutgoingMail) -> Result<(), MailError> {
        let payload = json!({
            "from": mail.from,
            "to": [mail.to],
            "subject": mail.subject,
            "text": mail.text,
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(MailError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, api_token: &str, mail: &OutgoingMail) -> Result<(), MailError> {
        let mut delay = self.initial_delay;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.send_once(api_token, mail).await {
                Ok(()) => {
                    info!(attempt, "Completion summary delivered");
                    return Ok(());
                }
                // A 4xx other than rate limiting will not succeed on retry
                Err(MailError::Rejected { status, body })
                    if (400..500).contains(&status) && status != 429 =>
                {
                    return Err(MailError::Rejected { status, body });
                }
                Err(e) => {
                    warn!(attempt, "Mail delivery attempt failed: {}", e);
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(MailError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
