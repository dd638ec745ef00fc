//! Wire envelope for capability invocations.
//!
//! Request:  `{"method": "scan", "params": {...}, "id": <any>}`
//! Response: `{"result": {...}, "id": <any>}` or `{"error": "...", "id": <any>}`
//!
//! The `id` is opaque: it is echoed back verbatim and never interpreted.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Name advertised in the manifest document.
pub const SERVICE_NAME: &str = "Kestrel";

// ── Request ──────────────────────────────────────────────────────────────────

/// One externally supplied request to run a capability.
///
/// `params` is untrusted and unvalidated until the dispatcher has looked at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

impl InvocationRequest {
    pub fn new(method: impl Into<String>, params: Value, id: Value) -> Self {
        Self {
            method: method.into(),
            params,
            id,
        }
    }
}

// ── Result ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { payload: Value },
    Failure { message: String },
}

/// The outcome of one invocation paired with the caller's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ResponseFrame", from = "ResponseFrame")]
pub struct InvocationResult {
    pub id: Value,
    pub outcome: Outcome,
}

impl InvocationResult {
    pub fn ok(id: Value, payload: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Success { payload },
        }
    }

    pub fn err(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failure {
                message: message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    /// Failure text, if this is a failure.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failure { message } => Some(message),
            Outcome::Success { .. } => None,
        }
    }

    /// Envelope as a JSON value (`{result, id}` or `{error, id}`).
    pub fn to_value(&self) -> Value {
        match &self.outcome {
            Outcome::Success { payload } => serde_json::json!({
                "result": payload,
                "id": self.id,
            }),
            Outcome::Failure { message } => serde_json::json!({
                "error": message,
                "id": self.id,
            }),
        }
    }
}

/// Serialized shape of an [`InvocationResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseFrame {
    Ok { result: Value, id: Value },
    Err { error: String, id: Value },
}

impl From<InvocationResult> for ResponseFrame {
    fn from(r: InvocationResult) -> Self {
        match r.outcome {
            Outcome::Success { payload } => ResponseFrame::Ok {
                result: payload,
                id: r.id,
            },
            Outcome::Failure { message } => ResponseFrame::Err {
                error: message,
                id: r.id,
            },
        }
    }
}

impl From<ResponseFrame> for InvocationResult {
    fn from(f: ResponseFrame) -> Self {
        match f {
            ResponseFrame::Ok { result, id } => InvocationResult::ok(id, result),
            ResponseFrame::Err { error, id } => InvocationResult::err(id, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn request_defaults_params_and_id() {
        let req: InvocationRequest =
            serde_json::from_value(json!({ "method": "msf_sessions" })).unwrap();
        assert_eq!(req.method, "msf_sessions");
        assert_eq!(req.params, json!({}));
        assert_eq!(req.id, Value::Null);
    }

    #[test]
    fn success_envelope_shape() {
        let r = InvocationResult::ok(json!("abc-1"), json!({ "output": "done" }));
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({ "result": { "output": "done" }, "id": "abc-1" })
        );
        assert_eq!(serde_json::to_value(&r).unwrap(), r.to_value());
    }

    #[test]
    fn failure_envelope_shape() {
        let r = InvocationResult::err(json!(7), "Unknown method");
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({ "error": "Unknown method", "id": 7 })
        );
        assert_eq!(r.error_message(), Some("Unknown method"));
        assert!(!r.is_success());
    }

    #[test]
    fn id_is_echoed_verbatim() {
        let id = json!({ "nested": [1, 2, { "x": null }] });
        let r = InvocationResult::ok(id.clone(), json!(null));
        assert_eq!(r.to_value()["id"], id);
    }

    #[test]
    fn parses_error_frame_from_wire() {
        let r: InvocationResult =
            serde_json::from_value(json!({ "error": "boom", "id": "x" })).unwrap();
        assert_eq!(r, InvocationResult::err(json!("x"), "boom"));

        let r: InvocationResult =
            serde_json::from_value(json!({ "result": [1], "id": 2 })).unwrap();
        assert!(r.is_success());
    }
}
