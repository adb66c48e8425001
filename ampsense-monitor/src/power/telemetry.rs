use std::error::Error;

use async_trait::async_trait;

/// Outbound channel for aggregated consumption reports.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, payload: serde_json::Value) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Posts consumption payloads to an HTTP collector.
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    url: String,
}

impl HttpTelemetrySink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn send(&self, payload: serde_json::Value) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
