//! Worker message protocol.
//!
//! Every interaction with a worker crosses this protocol: a request carries a
//! strictly increasing id (scoped to that worker), the worker replies with
//! exactly one response sharing the id, and unsolicited console records are
//! multiplexed on the same channel distinguished by variant rather than id
//! correlation.
//!
//! Payloads are a tagged variant per message type with a typed payload per
//! variant; there are no untyped casts anywhere on the wire.

use serde::{Deserialize, Serialize};

use fleetchat_manifest::PluginManifest;
use fleetchat_sandbox::{ConsoleRecord, SandboxConfig, WrappedProgram};

/// A request sent from the host to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Strictly increasing per worker; outstanding at most once.
    pub id: u64,
    #[serde(flatten)]
    pub payload: RequestPayload,
}

/// Type-tagged request payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RequestPayload {
    /// The init handshake: manifest, grant, and the wrapped program.
    Init(InitPayload),
    /// Run a no-view command dispatch.
    Execute(InvokePayload),
    /// Run a view command dispatch.
    Render(InvokePayload),
    /// Tear down the worker; the worker replies, then exits.
    Dispose,
    /// Liveness probe, no payload.
    Ping,
    /// Replace the worker-side state snapshot.
    SetState(serde_json::Value),
    /// Read the worker-side state snapshot.
    GetState,
}

/// Payload of the `init` handshake.
///
/// The capability surface itself is injected in-process when the worker is
/// spawned; the wire payload carries only its serializable description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    pub manifest: PluginManifest,
    pub config: SandboxConfig,
    pub program: WrappedProgram,
}

/// Payload of `execute` and `render` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokePayload {
    pub command: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A worker's reply to one request.
///
/// Carries `result` or `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional diagnostic stack accompanying an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl WorkerResponse {
    /// Successful response.
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            stack: None,
        }
    }

    /// Failed response.
    pub fn err(id: u64, error: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
            stack,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a worker emits, multiplexed on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    /// Reply to a pending request, matched by id.
    Response(WorkerResponse),
    /// Unsolicited console record; no id correlation.
    Console(ConsoleRecord),
    /// The worker hit an uncaught failure and is about to exit.
    Fatal {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

/// Outcome of one command execution, as seen by the manager's caller.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration: std::time::Duration,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let request = WorkerRequest {
            id: 7,
            payload: RequestPayload::Execute(InvokePayload {
                command: "list-todos".into(),
                args: serde_json::json!({"filter": "open"}),
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["type"], "execute");
        assert_eq!(json["data"]["command"], "list-todos");
    }

    #[test]
    fn unit_payloads_have_no_data() {
        let json = serde_json::to_value(&WorkerRequest {
            id: 1,
            payload: RequestPayload::Ping,
        })
        .unwrap();
        assert_eq!(json["type"], "ping");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn payload_tags_are_camel_case() {
        for (payload, tag) in [
            (RequestPayload::Dispose, "dispose"),
            (RequestPayload::GetState, "getState"),
            (
                RequestPayload::SetState(serde_json::json!({})),
                "setState",
            ),
        ] {
            let json = serde_json::to_value(&payload).unwrap();
            assert_eq!(json["type"], tag);
        }
    }

    #[test]
    fn unknown_request_type_fails_to_decode() {
        let raw = r#"{"id": 1, "type": "launchMissiles"}"#;
        assert!(serde_json::from_str::<WorkerRequest>(raw).is_err());
    }

    #[test]
    fn response_never_carries_both() {
        let ok = WorkerResponse::ok(1, serde_json::json!(42));
        assert!(ok.is_ok() && ok.result.is_some() && ok.error.is_none());

        let err = WorkerResponse::err(2, "boom", Some("at line 3".into()));
        assert!(!err.is_ok() && err.result.is_none() && err.error.is_some());
    }

    #[test]
    fn response_serialization_omits_absent_fields() {
        let json = serde_json::to_string(&WorkerResponse::ok(1, serde_json::json!(null))).unwrap();
        assert!(!json.contains("error"));
        assert!(!json.contains("stack"));
    }

    #[test]
    fn console_event_distinguished_by_type() {
        let event = WorkerEvent::Console(ConsoleRecord {
            plugin: "p".into(),
            level: fleetchat_sandbox::ConsoleLevel::Info,
            message: "hello".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "console");
        assert!(json.get("id").is_none());
    }
}
