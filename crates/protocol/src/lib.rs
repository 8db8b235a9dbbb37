//! JSON-RPC 2.0 wire types shared by the listeners and the method registry.
//!
//! Only the envelope is modelled here; method params and results stay as
//! [`serde_json::Value`] and are interpreted by the registered handlers.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

pub const JSONRPC_VERSION: &str = "2.0";

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ErrorShape {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorShape {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(error_codes::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, detail)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, detail)
    }
}

/// A request object that could not be decoded, paired with the id to echo
/// back (`null` when the id itself was unusable).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct InvalidRequest {
    pub id: Value,
    pub error: ErrorShape,
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// A decoded call. `id == None` marks a notification, which gets no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl RequestFrame {
    pub fn call(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Decode one request object, validating the envelope.
    pub fn from_value(value: &Value) -> Result<Self, InvalidRequest> {
        let invalid = |id: Value, detail: &str| InvalidRequest {
            id,
            error: ErrorShape::invalid_request(detail),
        };

        let Some(obj) = value.as_object() else {
            return Err(invalid(Value::Null, "request must be an object"));
        };

        let id = match obj.get("id") {
            None => None,
            Some(id @ (Value::Null | Value::Number(_) | Value::String(_))) => Some(id.clone()),
            Some(_) => return Err(invalid(Value::Null, "id must be a string, number or null")),
        };
        let echo = id.clone().unwrap_or(Value::Null);

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(invalid(echo, "jsonrpc must be \"2.0\""));
        }
        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            return Err(invalid(echo, "method must be a string"));
        };
        let params = match obj.get("params") {
            None => Value::Null,
            Some(p @ (Value::Array(_) | Value::Object(_))) => p.clone(),
            Some(_) => return Err(invalid(echo, "params must be an array or object")),
        };

        Ok(Self {
            id,
            method: method.to_owned(),
            params,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        obj.insert("method".into(), Value::from(self.method.as_str()));
        if !self.params.is_null() {
            obj.insert("params".into(), self.params.clone());
        }
        if let Some(id) = &self.id {
            obj.insert("id".into(), id.clone());
        }
        Value::Object(obj)
    }
}

/// Either member of a response: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Result(Value),
    Error(ErrorShape),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFrame {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(flatten)]
    pub payload: Payload,
}

impl ResponseFrame {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            payload: Payload::Result(result),
        }
    }

    pub fn err(id: Value, error: ErrorShape) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            payload: Payload::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    pub fn to_value(&self) -> Value {
        let member = match &self.payload {
            Payload::Result(result) => ("result", result.clone()),
            Payload::Error(error) => ("error", error_to_value(error)),
        };
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(self.jsonrpc));
        obj.insert("id".into(), self.id.clone());
        obj.insert(member.0.into(), member.1);
        Value::Object(obj)
    }
}

impl From<InvalidRequest> for ResponseFrame {
    fn from(invalid: InvalidRequest) -> Self {
        Self::err(invalid.id, invalid.error)
    }
}

fn error_to_value(error: &ErrorShape) -> Value {
    let mut obj = Map::new();
    obj.insert("code".into(), Value::from(error.code));
    obj.insert("message".into(), Value::from(error.message.as_str()));
    if let Some(data) = &error.data {
        obj.insert("data".into(), data.clone());
    }
    Value::Object(obj)
}

/// Method names called by a request body, for a single call or a batch.
///
/// Entries that are not objects or carry no string `method` are skipped.
pub fn called_methods(body: &Value) -> Vec<&str> {
    match body {
        Value::Array(calls) => calls.iter().filter_map(method_of).collect(),
        other => method_of(other).into_iter().collect(),
    }
}

fn method_of(call: &Value) -> Option<&str> {
    call.get("method").and_then(Value::as_str)
}
