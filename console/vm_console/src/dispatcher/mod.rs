use std::time::Duration;
use log::{info, error, debug};
use reqwest::Client;
use serde::{Serialize, Deserialize};
use serde_json::{json, Value};
use thiserror::Error;
use status_engine::{Action, StatusPayload};

use crate::request::RequestId;

// Include tests
#[cfg(test)]
mod tests;

// Dispatcher error types
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("HTTP error: {status} - {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Action failed: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

// Volume listed for a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: String,
    pub volume_name: String,
    #[serde(default)]
    pub volume_size_gb: Option<f64>,
    #[serde(default)]
    pub volume_state: Option<String>,
}

// Attach volume request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachVolumeRequest {
    pub vm_id: String,
    pub vm_name: String,
    pub volume_id: String,
    pub volume_name: String,
    pub project_id: String,
}

// Detach volume request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachVolumeRequest {
    pub vm_id: String,
    pub vm_name: String,
    pub volume_id: String,
}

// SSH key import request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyRequest {
    pub pubkey: String,
    pub envkey_name: String,
    pub vm_ip: String,
}

// Project validity check response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectCheck {
    #[serde(default)]
    pub out_of_credits: bool,
}

// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678".to_string(),
            timeout_ms: 30000,
        }
    }
}

/// Sends webhook requests to the workflow backend.
///
/// One request per call, no retries. Control actions only acknowledge the
/// trigger; their outcome arrives later on the change feed.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    config: DispatcherConfig,
    client: Client,
}

impl ActionDispatcher {
    // Create a new dispatcher
    pub fn new(config: DispatcherConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn webhook_url(&self, action: Action) -> String {
        format!("{}/webhook/{}", self.base_url(), action.as_str())
    }

    /// POST `body` to the action's webhook and return the raw JSON body.
    pub async fn dispatch(
        &self,
        action: Action,
        query: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value, DispatchError> {
        let url = self.webhook_url(action);
        debug!("Calling webhook {} with payload {}", url, body);

        let response = self.client.post(&url)
            .query(query)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to call {}: {}", action, e);
                DispatchError::NetworkError(e)
            })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("Webhook {} returned HTTP {}: {}", action, status, text);
            return Err(DispatchError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        // Some workflows answer with an empty body
        let data: Value = if text.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&text)?
        };

        check_success(&data)?;
        Ok(data)
    }

    /// Fire a control action scoped to `request_id`.
    pub async fn trigger(&self, action: Action, request_id: &RequestId) -> Result<Value, DispatchError> {
        if !action.is_control() && action != Action::ShowCredits {
            return Err(DispatchError::Validation(format!("{} is not a request-scoped action", action)));
        }

        let data = self.dispatch(
            action,
            &[("request_id", request_id.as_str())],
            &json!({ "request_id": request_id }),
        ).await?;

        info!("Triggered {} for request {}", action, request_id);
        Ok(data)
    }

    pub async fn show_credits(&self, request_id: &RequestId) -> Result<Value, DispatchError> {
        self.trigger(Action::ShowCredits, request_id).await
    }

    pub async fn check_vm_status(&self, vm_name: &str) -> Result<StatusPayload, DispatchError> {
        let vm_name = required("vm_name", vm_name)?;
        let data = self.dispatch(Action::CheckVmStatus, &[], &json!({ "vm_name": vm_name })).await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn check_project(&self, project_id: &str) -> Result<ProjectCheck, DispatchError> {
        let project_id = required("project_id", project_id)?;
        let data = self.dispatch(Action::ProjectIdCheck, &[], &json!({ "project_id": project_id })).await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn get_project_name(&self, project_id: &str) -> Result<String, DispatchError> {
        let project_id = required("project_id", project_id)?;
        let data = self.dispatch(
            Action::GetProjectName,
            &[("project_id", project_id)],
            &json!({ "project_id": project_id }),
        ).await?;

        data.get("project_name")
            .and_then(|name| name.as_str())
            .map(|name| name.to_string())
            .ok_or_else(|| DispatchError::Rejected("Response has no project_name".to_string()))
    }

    pub async fn list_volumes(&self, project_id: &str) -> Result<Vec<Volume>, DispatchError> {
        let project_id = required("project_id", project_id)?;
        let mut data = self.dispatch(
            Action::ListVolumes,
            &[("project_id", project_id)],
            &json!({ "project_id": project_id }),
        ).await?;

        match data.get_mut("volumes").map(Value::take) {
            Some(volumes) => Ok(serde_json::from_value(volumes)?),
            None => Err(DispatchError::Rejected(message_of(&data, "Failed to load volumes"))),
        }
    }

    pub async fn attach_volume(&self, request: &AttachVolumeRequest) -> Result<Value, DispatchError> {
        required("vm_id", &request.vm_id)?;
        required("volume_id", &request.volume_id)?;
        self.dispatch(Action::AttachVolume, &[], &serde_json::to_value(request)?).await
    }

    pub async fn detach_volume(&self, request: &DetachVolumeRequest) -> Result<Value, DispatchError> {
        required("vm_id", &request.vm_id)?;
        required("volume_id", &request.volume_id)?;
        self.dispatch(Action::DetachVolume, &[], &serde_json::to_value(request)?).await
    }

    pub async fn add_ssh_key(&self, request: &SshKeyRequest) -> Result<Value, DispatchError> {
        required("pubkey", &request.pubkey)?;
        required("vm_ip", &request.vm_ip)?;
        self.dispatch(Action::AddSshKey, &[], &serde_json::to_value(request)?).await
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, DispatchError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DispatchError::Validation(format!("{} is required", field)));
    }
    Ok(value)
}

fn message_of(data: &Value, fallback: &str) -> String {
    ["error", "message"]
        .iter()
        .filter_map(|key| data.get(*key).and_then(|v| v.as_str()))
        .find(|msg| !msg.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

// `success: false` in an otherwise fine response is an application failure
fn check_success(data: &Value) -> Result<(), DispatchError> {
    match data.get("success").and_then(|s| s.as_bool()) {
        Some(false) => Err(DispatchError::Rejected(message_of(data, "Action failed"))),
        _ => Ok(()),
    }
}
