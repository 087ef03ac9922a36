//! JSON-RPC 2.0 request/response shapes exchanged by every transport.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC 2.0 protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id used when the caller does not pick one.
pub const DEFAULT_REQUEST_ID: i64 = 1;

/// Named request parameters: an unordered string-keyed map.
pub type Params = Map<String, Value>;

/// A request naming a registered method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    pub id: i64,
}

impl Request {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A response to a single request.
///
/// Exactly one of `result` and `error` is populated by the dispatch engine.
/// A handler that returns JSON `null` still yields `"result": null` on the
/// wire, and decoding keeps that distinct from an absent result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// An empty response correlated to `id`, to be completed by the caller.
    pub fn to(id: Option<i64>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: None,
        }
    }

    pub fn success(id: i64, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::to(Some(id))
        }
    }

    pub fn failure(id: Option<i64>, error: ErrorObject) -> Self {
        Self {
            error: Some(error),
            ..Self::to(id)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the handler's value or the error payload.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error object carried inside an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A field that is present maps to `Some`, even when it holds `null`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_absent_params() {
        let request = Request::new(3, "ping", None);
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded, json!({"jsonrpc": "2.0", "method": "ping", "id": 3}));
    }

    #[test]
    fn request_requires_method_and_id() {
        assert!(serde_json::from_value::<Request>(json!({"jsonrpc": "2.0", "id": 1})).is_err());
        assert!(serde_json::from_value::<Request>(json!({"jsonrpc": "2.0", "method": "x"})).is_err());
    }

    #[test]
    fn request_tolerates_missing_or_null_params() {
        let bare: Request = serde_json::from_value(json!({"method": "x", "id": 9})).unwrap();
        assert_eq!(bare.params, None);
        assert_eq!(bare.jsonrpc, JSONRPC_VERSION);

        let null: Request =
            serde_json::from_value(json!({"method": "x", "params": null, "id": 9})).unwrap();
        assert_eq!(null.params, None);
    }

    #[test]
    fn request_rejects_positional_params() {
        let parsed = serde_json::from_value::<Request>(json!({"method": "x", "params": [1], "id": 1}));
        assert!(parsed.is_err());
    }

    #[test]
    fn request_survives_encoding() {
        let mut params = Params::new();
        params.insert("message".into(), json!("hi"));
        params.insert("nested".into(), json!({"list": [1, 2, {"k": null}]}));
        let request = Request::new(42, "echo", Some(params));

        let text = serde_json::to_string(&request).unwrap();
        let decoded: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_keeps_null_result_distinct_from_absent() {
        let response = Response::success(1, Value::Null);
        let text = serde_json::to_string(&response).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"result":null}"#);

        let decoded: Response = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.result, Some(Value::Null));
        assert!(!decoded.is_error());
    }

    #[test]
    fn error_response_has_no_result_field() {
        let response = Response::failure(Some(7), ErrorObject::new(-32601, "Method not found: x"));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "id": 7, "error": {"code": -32601, "message": "Method not found: x"}})
        );
        let decoded: Response = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.into_result().unwrap_err().code, -32601);
    }

    #[test]
    fn response_without_id_omits_it() {
        let response = Response::failure(None, ErrorObject::new(-32700, "Parse Error: eof"));
        let encoded = serde_json::to_value(&response).unwrap();
        assert!(encoded.get("id").is_none());
    }
}
