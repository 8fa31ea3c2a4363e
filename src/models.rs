//! Wire types shared between the backend endpoints and the console

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Identifies one workload. Apps are unique per `namespace/name` pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub namespace: String,
    pub name: String,
}

impl AppKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for AppKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn default_replicas_on() -> u32 {
    1
}

/// The console's view of one scalable workload.
///
/// The backend sends these both in full snapshots and flattened inside
/// `deployment_update` deltas. Unknown fields (annotations, conditions) are
/// ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub namespace: String,
    pub name: String,

    /// Display label. The backend defaults it to `name`, but older variants
    /// may omit it entirely.
    #[serde(default)]
    pub application_name: String,

    #[serde(default)]
    pub replicas_current: u32,

    /// Target scale when toggled on
    #[serde(default = "default_replicas_on")]
    pub replicas_on: u32,

    /// Target scale when toggled off
    #[serde(default)]
    pub replicas_off: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
}

impl AppRecord {
    pub fn key(&self) -> AppKey {
        AppKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn display_name(&self) -> &str {
        if self.application_name.is_empty() {
            &self.name
        } else {
            &self.application_name
        }
    }

    /// Canonical status rule: an app is running iff it has at least one
    /// replica. The target-equality check used by one historical client
    /// variant is not supported.
    pub fn is_running(&self) -> bool {
        self.replicas_current > 0
    }

    /// The scale a toggle will request: the other state's target.
    pub fn toggle_target(&self) -> u32 {
        if self.is_running() {
            self.replicas_off
        } else {
            self.replicas_on
        }
    }
}

/// Kind of incremental change pushed by the backend watch
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaKind {
    Added,
    Modified,
    Deleted,
}

/// One `deployment_update` event: a change kind plus the record fields
/// flattened alongside it.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Delta {
    #[serde(rename = "type")]
    pub kind: DeltaKind,

    #[serde(flatten)]
    pub record: AppRecord,
}

/// Payload of the `initial_data` event (and of stream resubscriptions)
#[derive(Deserialize, Debug, Clone)]
pub struct InitialData {
    pub status: String,

    #[serde(default)]
    pub data: Vec<AppRecord>,

    #[serde(default)]
    pub message: Option<String>,
}

impl InitialData {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Payload of the `connected` event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub client_id: String,

    #[serde(default)]
    pub server_node_name: String,

    #[serde(default)]
    pub server_node_ip: String,
}

/// Payload of the `heartbeat` event, unix time in seconds
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Heartbeat {
    pub timestamp: f64,
}

/// Body of `POST /action` on the backend
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub namespace: String,
    pub name: String,
    pub scale: u32,
}

/// Response body of `POST /action`
#[derive(Deserialize, Debug, Clone)]
pub struct ActionResponse {
    pub status: String,

    #[serde(default)]
    pub scaled_to: Option<u32>,

    #[serde(default)]
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Test fixture used across module tests
#[cfg(test)]
pub(crate) fn test_record(namespace: &str, name: &str, current: u32) -> AppRecord {
    AppRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        application_name: name.to_string(),
        replicas_current: current,
        replicas_on: 3,
        replicas_off: 0,
        color: None,
        text_color: None,
        background_color: None,
        creation_date: None,
    }
}
