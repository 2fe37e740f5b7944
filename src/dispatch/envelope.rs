//! Routing envelopes.
//!
//! Wire format: `{"type": <string>, "data": <any>}`. Only `type` is
//! interpreted here; `data` is handed to handlers untouched.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::transport::Frame;

/// One received frame, split into routing key and payload.
#[derive(Debug, Clone)]
pub struct Inbound {
    kind: String,
    data: Option<Value>,
    raw: String,
}

impl Inbound {
    /// Extract the routing key from a frame.
    ///
    /// Anything that is not a JSON object with a string `type` routes as the
    /// empty key; that is an unknown type, not a parse failure.
    pub fn parse(frame: &Frame) -> Self {
        let raw = String::from_utf8_lossy(frame.as_bytes()).into_owned();
        match serde_json::from_slice::<Value>(frame.as_bytes()) {
            Ok(Value::Object(mut object)) => {
                let kind = match object.get("type") {
                    Some(Value::String(kind)) => kind.clone(),
                    _ => String::new(),
                };
                Self {
                    kind,
                    data: object.remove("data"),
                    raw,
                }
            }
            _ => Self {
                kind: String::new(),
                data: None,
                raw,
            },
        }
    }

    /// Synthetic envelope for a lifecycle hook, e.g. `{"type":"connected"}`.
    pub fn lifecycle(key: &str) -> Self {
        Self {
            kind: key.to_owned(),
            data: None,
            raw: Envelope::new(key).encode(),
        }
    }

    /// Routing key (`type` field), empty when absent.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// The frame exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decode `data` into `T`. A missing `data` decodes from `null`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone().unwrap_or(Value::Null))
    }
}

/// Outbound `{"type", "data"}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    /// An envelope without data, serialized as `{"type":"<kind>"}`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
        }
    }

    /// An envelope carrying `data`.
    pub fn with_data(kind: impl Into<String>, data: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.into(),
            data: Some(serde_json::to_value(data)?),
        })
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize envelope");
            String::new()
        })
    }

    pub fn to_frame(&self) -> Frame {
        Frame::Text(self.encode())
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    message: &'a str,
}

/// Standard error envelope: `{"type": <error_type>, "message": <message>}`.
pub fn error_frame(error_type: &str, message: &str) -> Frame {
    let envelope = ErrorEnvelope {
        kind: error_type,
        message,
    };
    Frame::Text(serde_json::to_string(&envelope).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize error envelope");
        String::new()
    }))
}
