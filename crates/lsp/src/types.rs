//! JSON-RPC message types shared by both transports.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// JSON-RPC error code for a method the receiver does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code reported by servers for a cancelled request.
pub const REQUEST_CANCELLED: i64 = -32800;

/// Identifier of a request, either numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// Numeric ID.
	Number(i64),
	/// Textual ID.
	String(String),
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RequestId::Number(n) => n.fmt(f),
			RequestId::String(s) => s.fmt(f),
		}
	}
}

/// A request to be sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyRequest {
	/// Request identifier; assigned by the transport before the write.
	pub id: RequestId,
	/// Method name.
	pub method: String,
	/// Method parameters.
	#[serde(default)]
	pub params: JsonValue,
}

/// A notification, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyNotification {
	/// Method name.
	pub method: String,
	/// Method parameters.
	#[serde(default)]
	pub params: JsonValue,
}

/// A response received from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyResponse {
	/// Identifier of the request this answers.
	pub id: RequestId,
	/// Result payload on success.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Error payload on failure.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

/// The error object of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("server error {code}: {message}")]
pub struct ResponseError {
	/// Error code.
	pub code: i64,
	/// Human-readable message.
	pub message: String,
	/// Optional structured data.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// An error response for a method the client does not implement.
	pub fn method_not_found(method: &str) -> Self {
		Self {
			code: METHOD_NOT_FOUND,
			message: format!("method not found: {method}"),
			data: None,
		}
	}
}

/// A complete wire message.
#[derive(Debug, Clone)]
pub enum Message {
	/// An outgoing or server-initiated request.
	Request(AnyRequest),
	/// A response to a request.
	Response(AnyResponse),
	/// A notification.
	Notification(AnyNotification),
}

impl Message {
	/// Render the message as its JSON envelope, including the `jsonrpc` tag.
	pub fn to_json(&self) -> JsonValue {
		match self {
			Message::Request(req) => serde_json::json!({
				"jsonrpc": "2.0",
				"id": req.id,
				"method": req.method,
				"params": req.params,
			}),
			Message::Response(resp) => match &resp.error {
				None => serde_json::json!({
					"jsonrpc": "2.0",
					"id": resp.id,
					"result": resp.result.clone().unwrap_or(JsonValue::Null),
				}),
				Some(err) => serde_json::json!({
					"jsonrpc": "2.0",
					"id": resp.id,
					"error": err,
				}),
			},
			Message::Notification(notif) => serde_json::json!({
				"jsonrpc": "2.0",
				"method": notif.method,
				"params": notif.params,
			}),
		}
	}

	/// Classify a decoded JSON envelope.
	///
	/// A payload with an `id` and no `method` is a response; `method` and no
	/// `id` is a notification; both present is a server-initiated request.
	pub fn classify(value: JsonValue) -> crate::Result<Message> {
		let has_id = value.get("id").is_some_and(|id| !id.is_null());
		let has_method = value.get("method").is_some();
		match (has_id, has_method) {
			(true, false) => Ok(Message::Response(serde_json::from_value(value)?)),
			(false, true) => Ok(Message::Notification(serde_json::from_value(value)?)),
			(true, true) => Ok(Message::Request(serde_json::from_value(value)?)),
			(false, false) => Err(crate::Error::Protocol(
				"message is neither request, response nor notification".into(),
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classify_splits_by_id_and_method() {
		let resp = Message::classify(serde_json::json!({"id": 1, "result": {}})).unwrap();
		assert!(matches!(resp, Message::Response(_)));

		let notif =
			Message::classify(serde_json::json!({"method": "tests/update", "params": {}})).unwrap();
		assert!(matches!(notif, Message::Notification(_)));

		let req = Message::classify(serde_json::json!({"id": "a", "method": "x"})).unwrap();
		assert!(matches!(req, Message::Request(_)));

		assert!(Message::classify(serde_json::json!({"result": 1})).is_err());
	}

	#[test]
	fn response_error_round_trips() {
		let err = ResponseError::method_not_found("bogus");
		let value = serde_json::to_value(&err).unwrap();
		assert_eq!(value["code"], METHOD_NOT_FOUND);
		let back: ResponseError = serde_json::from_value(value).unwrap();
		assert_eq!(back.message, err.message);
	}
}
