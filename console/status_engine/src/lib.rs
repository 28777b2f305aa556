// File: console/status_engine/src/lib.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub mod action;
pub mod error;
pub use action::{Action, ActionKind};
pub use error::{EngineError, Result};


/// `request_status` values that fail an operation whatever the action.
pub const FAILURE_STATUSES: [&str; 2] = ["failed", "error"];

/// Message used when a failed row carries no explanation.
pub const UNKNOWN_ERROR: &str = "Unknown error";

// Snapshot of one monitored row as delivered by the store.
// Only `request_status` and the id are strict; descriptive columns accept
// any JSON type so an odd value never costs us the whole row.
// Columns we don't model are kept in `extra` so nothing is dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub request_status: Option<String>,
    #[serde(default)]
    pub form_submission_unique_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub user_vm_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub user_vm_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub user_vm_ip: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub environment_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub gpu_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub ssh_key_name: Option<String>,
    #[serde(default)]
    pub cost: Option<Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Strings as-is, scalars rendered as text, anything else treated as absent
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    })
}

impl StatusPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(EngineError::InvalidPayload(format!("expected an object, got {}", value)));
        }

        serde_json::from_value(value).map_err(|e| EngineError::InvalidPayload(e.to_string()))
    }

    pub fn status(&self) -> Option<&str> {
        self.request_status.as_deref()
    }

    /// The correlation key embedded in the row, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.form_submission_unique_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.updated_at.as_deref()?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                log::debug!("Unparseable updated_at {:?}: {}", raw, e);
                None
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Pending,
    Success,
    Failure,
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Classification::Pending)
    }
}

/// Classify one delivered row for the action in flight.
///
/// Failure statuses win over the action's success value.
pub fn classify(payload: &StatusPayload, action: Action) -> Classification {
    let status = match payload.status() {
        Some(status) => status,
        None => return Classification::Pending,
    };

    if FAILURE_STATUSES.contains(&status) {
        return Classification::Failure;
    }

    match action.terminal_success() {
        Some(success) if success == status => Classification::Success,
        _ => Classification::Pending,
    }
}

/// Best-effort human-readable reason for a failed row.
pub fn failure_message(payload: &StatusPayload) -> String {
    [payload.error_message.as_deref(), payload.message.as_deref()]
        .into_iter()
        .flatten()
        .find(|msg| !msg.trim().is_empty())
        .unwrap_or(UNKNOWN_ERROR)
        .to_string()
}

pub fn status_label(request_status: &str) -> String {
    let label = match request_status {
        "processing" => "Processing your request...",
        "provisioning_vm" => "Creating your VM...",
        "vm_ready" => "VM is ready!",
        "uploading_data" => "Uploading your data...",
        "running" => "VM is running!",
        "simulation_paused" => "Simulation paused",
        "simulation_complete" => "Simulation complete!",
        "deleted" => "Deleting VM",
        other => return format!("Status: {}", other),
    };

    label.to_string()
}
