use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{value::RawValue, Value};
use std::fmt;

use crate::errors::{RpcError, SERVICE_METHOD_SEPARATOR};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier. Kept as the raw JSON text so it is echoed exactly as received.
#[derive(Clone)]
pub struct RequestId(Box<RawValue>);

impl RequestId {
	fn parse(raw: Box<RawValue>) -> Result<Self, RpcError> {
		let text = raw.get();
		let valid = if text.starts_with('"') {
			serde_json::from_str::<String>(text).is_ok()
		} else {
			serde_json::from_str::<serde_json::Number>(text).is_ok()
		};
		if !valid {
			return Err(RpcError::invalid_message("invalid request id"));
		}
		Ok(RequestId(raw))
	}

	pub fn as_str(&self) -> &str {
		self.0.get()
	}
}

impl PartialEq for RequestId {
	fn eq(&self, other: &Self) -> bool {
		self.as_str() == other.as_str()
	}
}

impl Eq for RequestId {}

impl fmt::Debug for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl Serialize for RequestId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.0.serialize(serializer)
	}
}

// Goes through `Value` so ids also decode from buffered input, e.g. inside untagged enums
impl<'de> Deserialize<'de> for RequestId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = Value::deserialize(deserializer)?;
		let raw = RawValue::from_string(value.to_string()).map_err(de::Error::custom)?;
		RequestId::parse(raw).map_err(de::Error::custom)
	}
}

/// A single call as read from the wire, before its parameters are bound to any types.
#[derive(Clone, Debug)]
pub struct Request {
	pub service: String,
	pub method: String,
	pub id: Option<RequestId>,
	pub params: Option<Box<RawValue>>,
	pub is_subscription: bool,
}

/// One slot of a batch. Malformed batch items keep their slot so sibling calls still run.
#[derive(Clone, Debug)]
pub enum Incoming {
	Call(Request),
	Invalid {
		id: Option<RequestId>,
		error: RpcError,
	},
}

impl Incoming {
	pub fn id(&self) -> Option<&RequestId> {
		match self {
			Incoming::Call(request) => request.id.as_ref(),
			Incoming::Invalid { id, .. } => id.as_ref(),
		}
	}
}

#[derive(Clone, Debug)]
pub struct Batch {
	pub items: Vec<Incoming>,
	pub is_batch: bool,
}

#[derive(Deserialize)]
struct JsonRequest {
	#[serde(default)]
	method: String,
	#[serde(default)]
	id: Option<Box<RawValue>>,
	#[serde(default)]
	params: Option<Box<RawValue>>,
}

/// Returns true when the first significant character is `[`.
pub fn is_batch(message: &[u8]) -> bool {
	message
		.iter()
		.find(|byte| !matches!(**byte, b' ' | b'\t' | b'\n' | b'\r'))
		.is_some_and(|byte| *byte == b'[')
}

/// Parses one complete JSON message into requests.
///
/// A malformed single request fails the whole read. A malformed batch item only fails its own
/// slot, the rest of the batch is returned as usual.
pub fn parse_message(message: &[u8]) -> Result<Batch, RpcError> {
	if !is_batch(message) {
		let request = parse_request(message).map_err(|(_, error)| error)?;
		return Ok(Batch {
			items: vec![Incoming::Call(request)],
			is_batch: false,
		});
	}

	let raw_items: Vec<Box<RawValue>> = serde_json::from_slice(message)
		.map_err(|error| RpcError::invalid_message(error.to_string()))?;
	if raw_items.is_empty() {
		return Err(RpcError::invalid_request("no request found"));
	}

	let items = raw_items
		.iter()
		.map(|raw| match parse_request(raw.get().as_bytes()) {
			Ok(request) => Incoming::Call(request),
			Err((id, error)) => Incoming::Invalid { id, error },
		})
		.collect();

	Ok(Batch {
		items,
		is_batch: true,
	})
}

fn parse_request(message: &[u8]) -> Result<Request, (Option<RequestId>, RpcError)> {
	let request: JsonRequest = serde_json::from_slice(message)
		.map_err(|error| (None, RpcError::invalid_message(error.to_string())))?;

	let id = request
		.id
		.map(RequestId::parse)
		.transpose()
		.map_err(|error| (None, error))?;

	let segments: Vec<&str> = request.method.split(SERVICE_METHOD_SEPARATOR).collect();
	let &[service, method] = segments.as_slice() else {
		return Err((id, RpcError::method_not_found(&request.method, "")));
	};

	Ok(Request {
		service: service.to_string(),
		method: method.to_string(),
		id,
		params: request.params,
		is_subscription: false,
	})
}

/// Response envelope, used for both successes and failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub jsonrpc: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<RequestId>,
	pub code: i32,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub info: Option<Value>,
}

impl Envelope {
	pub fn success(id: Option<RequestId>, result: Value) -> Self {
		Envelope {
			jsonrpc: JSONRPC_VERSION.to_string(),
			id,
			code: 0,
			message: "SUCCESS".to_string(),
			result: (!result.is_null()).then_some(result),
			info: None,
		}
	}

	pub fn failure(id: Option<RequestId>, error: &RpcError) -> Self {
		Envelope {
			jsonrpc: JSONRPC_VERSION.to_string(),
			id,
			code: error.code,
			message: error.message.clone(),
			result: None,
			info: None,
		}
	}

	pub fn failure_with_info(id: Option<RequestId>, error: &RpcError, info: Value) -> Self {
		Envelope {
			info: (!info.is_null()).then_some(info),
			..Self::failure(id, error)
		}
	}

	pub fn is_success(&self) -> bool {
		self.code == 0
	}
}

/// What gets written back for one read: a lone envelope, or an array in request order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
	Batch(Vec<Envelope>),
	Single(Envelope),
}

impl Response {
	/// A batch holding exactly one call is answered with a lone envelope.
	pub fn from_envelopes(mut envelopes: Vec<Envelope>) -> Self {
		match envelopes.len() {
			1 => match envelopes.pop() {
				Some(envelope) => Response::Single(envelope),
				None => Response::Batch(envelopes),
			},
			_ => Response::Batch(envelopes),
		}
	}
}
