//! Protocol message definitions
//!
//! Field names are part of the wire contract with sibling nodes:
//! `command`, `group`, `producerID`, `payload` for requests and
//! `key`, `length` for load entries.

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────

/// Request commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Announce this node to a freshly connected peer
    Register,
    /// Liveness probe, answered with a load report
    Ping,
    /// Overflow work item
    Task,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Register => "REGISTER",
            Command::Ping => "PING",
            Command::Task => "TASK",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit sent to a peer; fire-and-forget from the sender's side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub command: Command,

    /// Task name (TASK only)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    /// Producer that created the work (TASK only)
    #[serde(rename = "producerID", default, skip_serializing_if = "String::is_empty")]
    pub producer_id: String,

    /// JSON-encoded task data (TASK only)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
}

impl ForwardRequest {
    pub fn register() -> Self {
        Self::bare(Command::Register)
    }

    pub fn ping() -> Self {
        Self::bare(Command::Ping)
    }

    /// Build a TASK request, serializing `data` into the payload
    pub fn task(group: impl Into<String>, producer_id: impl Into<String>, data: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            command: Command::Task,
            group: group.into(),
            producer_id: producer_id.into(),
            payload: serde_json::to_string(data)?,
        })
    }

    fn bare(command: Command) -> Self {
        Self {
            command,
            group: String::new(),
            producer_id: String::new(),
            payload: String::new(),
        }
    }

    /// Decode the TASK payload back into a JSON value
    pub fn payload_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

// ─────────────────────────────────────────────────────────────────
// Load reporting
// ─────────────────────────────────────────────────────────────────

/// Queue depth of one local bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLoadInfo {
    /// Task name
    pub key: String,
    /// Current queue depth
    pub length: usize,
}

/// A node's load snapshot, sent in reply to REGISTER and PING
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub tasks: Vec<TaskLoadInfo>,
}

impl LoadReport {
    /// Depth reported for `task`, if the node serves it
    pub fn length_of(&self, task: &str) -> Option<usize> {
        self.tasks.iter().find(|t| t.key == task).map(|t| t.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_request_wire_names() {
        let req = ForwardRequest::task("resize", "producer-1", &json!({"w": 64})).unwrap();
        let json = serde_json::to_string(&req).unwrap();

        assert!(json.contains(r#""command":"TASK""#));
        assert!(json.contains(r#""group":"resize""#));
        assert!(json.contains(r#""producerID":"producer-1""#));
        assert_eq!(req.payload_value().unwrap(), json!({"w": 64}));
    }

    #[test]
    fn test_ping_omits_task_fields() {
        let json = serde_json::to_string(&ForwardRequest::ping()).unwrap();
        assert_eq!(json, r#"{"command":"PING"}"#);

        let parsed: ForwardRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ForwardRequest::ping());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let parsed = serde_json::from_str::<ForwardRequest>(r#"{"command":"JOIN"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_load_report_lookup() {
        let report = LoadReport {
            tasks: vec![
                TaskLoadInfo { key: "resize".into(), length: 3 },
                TaskLoadInfo { key: "encode".into(), length: 0 },
            ],
        };
        assert_eq!(report.length_of("encode"), Some(0));
        assert_eq!(report.length_of("missing"), None);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#"{"key":"resize","length":3}"#));
    }
}
