use std::time::Duration;
use log::{debug, error};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use status_engine::StatusPayload;

use crate::request::RequestId;


#[derive(Error, Debug)]
pub enum PollError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Store returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

// Where and how to query the status table
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub store_url: String,
    pub api_key: String,
    pub table: String,
    pub id_column: String,
    pub timeout_ms: u64,
}

/// Point query against the status table, used when the change feed may
/// have missed an update.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    config: PollerConfig,
    client: Client,
}

impl StatusPoller {
    pub fn new(config: PollerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.store_url.trim_end_matches('/'), self.config.table)
    }

    // Fetch the current row for `request_id`, if it exists
    pub async fn poll(&self, request_id: &RequestId) -> Result<Option<StatusPayload>, PollError> {
        let filter = format!("eq.{}", request_id);

        let response = self.client.get(self.table_url())
            .query(&[
                (self.config.id_column.as_str(), filter.as_str()),
                ("select", "*"),
                ("limit", "1"),
            ])
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Error polling status for {}: HTTP {}: {}", request_id, status, body);
            return Err(PollError::HttpStatus { status: status.as_u16(), body });
        }

        let rows: Value = response.json().await?;
        let row = match rows {
            Value::Array(mut rows) => {
                if rows.is_empty() {
                    debug!("No status row for request {}", request_id);
                    return Ok(None);
                }
                rows.swap_remove(0)
            },
            other => return Err(PollError::InvalidResponse(format!("expected an array of rows, got {}", other))),
        };

        let payload = StatusPayload::from_value(row)
            .map_err(|e| PollError::InvalidResponse(e.to_string()))?;

        debug!("Current status for {}: {:?}", request_id, payload.status());
        Ok(Some(payload))
    }
}
