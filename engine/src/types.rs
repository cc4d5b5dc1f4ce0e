//! Core automation types
//!
//! Statuses are persisted as strings and mapped through `as_str`/`from_str`
//! pairs; action payloads are parsed into a closed union so malformed data
//! is rejected when a step is defined, not three days later when it fires.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Business events that can start a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    EntityCreated,
    StageChanged,
    Manual,
    TagAdded,
    EntityUpdated,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityCreated => "entity_created",
            Self::StageChanged => "stage_changed",
            Self::Manual => "manual",
            Self::TagAdded => "tag_added",
            Self::EntityUpdated => "entity_updated",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "entity_created" => Some(Self::EntityCreated),
            "stage_changed" => Some(Self::StageChanged),
            "manual" => Some(Self::Manual),
            "tag_added" => Some(Self::TagAdded),
            "entity_updated" => Some(Self::EntityUpdated),
            _ => None,
        }
    }
}

/// Actions a workflow step can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendMessage,
    AddTag,
    ChangeStatus,
    AssignOwner,
    Wait,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::AddTag => "add_tag",
            Self::ChangeStatus => "change_status",
            Self::AssignOwner => "assign_owner",
            Self::Wait => "wait",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "send_message" => Some(Self::SendMessage),
            "add_tag" => Some(Self::AddTag),
            "change_status" => Some(Self::ChangeStatus),
            "assign_owner" => Some(Self::AssignOwner),
            "wait" => Some(Self::Wait),
            _ => None,
        }
    }
}

/// Workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed and cancelled runs never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Step run status
///
/// There is no in-progress state at the step level: a step is either not yet
/// executed, or terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRunStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

impl StepRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Trigger filter: a flat key/value matcher over the event payload
///
/// Every key in the filter must be present and equal in the payload; an empty
/// filter matches every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerFilter(Map<String, Value>);

impl TriggerFilter {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Parse a filter from its stored TEXT form; blank means match-all
    pub fn parse(raw: &str) -> EngineResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| EngineError::invalid_data(format!("trigger filter is not JSON: {}", e)))?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(EngineError::invalid_data(
                "trigger filter must be a JSON object",
            )),
        }
    }

    /// Serialize back to the stored TEXT form
    pub fn to_raw(&self) -> String {
        if self.0.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.0).unwrap_or_default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the filter against an event payload
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageData {
    template_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AddTagData {
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeStatusData {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssignOwnerData {
    owner_id: Option<i64>,
}

/// Parsed action payload, one variant per action kind
///
/// Parsing is strict about shape (must be a JSON object with correctly typed
/// fields) but lenient about presence: a missing value is a valid no-op for
/// the kinds that allow it.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    SendMessage { template_id: Option<i64> },
    AddTag { tag: Option<String> },
    ChangeStatus { status: Option<String> },
    AssignOwner { owner_id: Option<i64> },
    Wait,
}

impl ActionPayload {
    /// Parse the stored payload TEXT for the given action kind
    pub fn parse(kind: ActionKind, raw: &str) -> EngineResult<Self> {
        let raw = if raw.trim().is_empty() { "{}" } else { raw };

        let invalid = |e: serde_json::Error| {
            EngineError::invalid_data(format!("payload for '{}': {}", kind.as_str(), e))
        };

        match kind {
            ActionKind::SendMessage => {
                let data: SendMessageData = serde_json::from_str(raw).map_err(invalid)?;
                Ok(Self::SendMessage {
                    template_id: data.template_id,
                })
            }
            ActionKind::AddTag => {
                let data: AddTagData = serde_json::from_str(raw).map_err(invalid)?;
                Ok(Self::AddTag { tag: data.tag })
            }
            ActionKind::ChangeStatus => {
                let data: ChangeStatusData = serde_json::from_str(raw).map_err(invalid)?;
                Ok(Self::ChangeStatus {
                    status: data.status,
                })
            }
            ActionKind::AssignOwner => {
                let data: AssignOwnerData = serde_json::from_str(raw).map_err(invalid)?;
                Ok(Self::AssignOwner {
                    owner_id: data.owner_id,
                })
            }
            ActionKind::Wait => Ok(Self::Wait),
        }
    }

    /// The action kind this payload belongs to
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SendMessage { .. } => ActionKind::SendMessage,
            Self::AddTag { .. } => ActionKind::AddTag,
            Self::ChangeStatus { .. } => ActionKind::ChangeStatus,
            Self::AssignOwner { .. } => ActionKind::AssignOwner,
            Self::Wait => ActionKind::Wait,
        }
    }
}
