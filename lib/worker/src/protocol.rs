//! Messages exchanged between the embedding host and the worker.
//!
//! Every message is a JSON object with a `type` field. Requests that expect a
//! correlated answer carry an `id`, which is echoed back verbatim.

use crate::error::HostError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Load the module at `wasm_url` and wire the bridge into it.
    Initialize {
        id: Option<JsonValue>,
        wasm_url: String,
    },
    /// Invoke the export `function_name` with positional `args`.
    Call {
        id: Option<JsonValue>,
        function_name: String,
        args: Vec<JsonValue>,
    },
    Ping {
        id: Option<JsonValue>,
    },
}

#[derive(Deserialize)]
struct Envelope {
    // Typed after the id is known, so a bad `type` still gets its id echoed.
    #[serde(rename = "type", default)]
    kind: Option<JsonValue>,
    #[serde(default)]
    id: Option<JsonValue>,
    #[serde(default)]
    data: Option<JsonValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeData {
    wasm_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallData {
    function_name: String,
    #[serde(default)]
    args: Option<Vec<JsonValue>>,
}

/// A message that could not be turned into a [`Request`].
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ProtocolError {
    pub id: Option<JsonValue>,
    /// The message `type`, when there was one.
    pub kind: Option<String>,
    pub message: String,
}

impl ProtocolError {
    /// The response the worker sends back instead of dropping the message.
    /// A malformed `call` still gets a failed `result` so the caller's
    /// pending promise settles.
    pub fn into_response(self) -> Response {
        match self.kind.as_deref() {
            Some("call") => Response::Result {
                id: self.id,
                success: false,
                result: None,
                error: Some(self.message),
            },
            _ => Response::Error {
                id: self.id,
                message: self.message,
            },
        }
    }
}

impl Request {
    pub fn parse(message: JsonValue) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_value(message).map_err(|err| ProtocolError {
                id: None,
                kind: None,
                message: format!("Invalid message: {err}"),
            })?;
        let Envelope { kind, id, data } = envelope;
        let invalid = |kind: &str, message: String| ProtocolError {
            id: id.clone(),
            kind: Some(kind.to_string()),
            message,
        };

        let kind = match kind {
            Some(JsonValue::String(kind)) => Some(kind),
            Some(other) => {
                return Err(ProtocolError {
                    id,
                    kind: None,
                    message: format!("Unknown message type: {other}"),
                });
            }
            None => None,
        };

        match kind.as_deref() {
            Some("initialize") => {
                let data: InitializeData = data
                    .ok_or_else(|| invalid("initialize", "Missing data.wasmUrl".to_string()))
                    .and_then(|data| {
                        serde_json::from_value(data).map_err(|err| {
                            invalid("initialize", format!("Invalid initialize data: {err}"))
                        })
                    })?;
                Ok(Request::Initialize {
                    id,
                    wasm_url: data.wasm_url,
                })
            }
            Some("call") => {
                let data: CallData = data
                    .ok_or_else(|| invalid("call", "Missing data.functionName".to_string()))
                    .and_then(|data| {
                        serde_json::from_value(data)
                            .map_err(|err| invalid("call", format!("Invalid call data: {err}")))
                    })?;
                Ok(Request::Call {
                    id,
                    function_name: data.function_name,
                    args: data.args.unwrap_or_default(),
                })
            }
            Some("ping") => Ok(Request::Ping { id }),
            Some(other) => Err(invalid(other, format!("Unknown message type: {other}"))),
            None => Err(ProtocolError {
                id,
                kind: None,
                message: "Unknown message type: undefined".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Sent once, unsolicited, when the worker starts.
    Ready,
    Initialized {
        #[serde(rename = "opfsAvailable")]
        opfs_available: bool,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<JsonValue>,
        message: String,
    },
    Result {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<JsonValue>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<JsonValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<JsonValue>,
    },
}

impl Response {
    pub fn error(id: Option<JsonValue>, message: impl Into<String>) -> Self {
        Response::Error {
            id,
            message: message.into(),
        }
    }

    pub fn call_result(id: Option<JsonValue>, outcome: Result<JsonValue, HostError>) -> Self {
        match outcome {
            Ok(value) => Response::Result {
                id,
                success: true,
                result: Some(value),
                error: None,
            },
            Err(err) => Response::Result {
                id,
                success: false,
                result: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// The correlation id this response answers, if any.
    pub fn id(&self) -> Option<&JsonValue> {
        match self {
            Response::Error { id, .. } | Response::Result { id, .. } | Response::Pong { id } => {
                id.as_ref()
            }
            Response::Ready | Response::Initialized { .. } => None,
        }
    }
}
