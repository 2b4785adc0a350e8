use serde::Serialize;
use serde_json::Value;

use crate::{
	errors::RpcError,
	types::{Address, Bytes, PayloadId, Quantity, SubscriptionId, H256},
};

/// Zero value detection, used to decide whether a partial result accompanies an error.
///
/// Struct shaped values are never empty unless they opt in.
pub trait EmptyValue {
	fn is_empty_value(&self) -> bool {
		false
	}
}

impl EmptyValue for String {
	fn is_empty_value(&self) -> bool {
		self.is_empty()
	}
}

impl EmptyValue for &str {
	fn is_empty_value(&self) -> bool {
		self.is_empty()
	}
}

impl EmptyValue for bool {
	fn is_empty_value(&self) -> bool {
		!*self
	}
}

impl<T> EmptyValue for Option<T> {
	fn is_empty_value(&self) -> bool {
		self.is_none()
	}
}

impl<T> EmptyValue for Vec<T> {
	fn is_empty_value(&self) -> bool {
		self.is_empty()
	}
}

impl EmptyValue for Value {
	fn is_empty_value(&self) -> bool {
		match self {
			Value::Null => true,
			Value::Bool(value) => !value,
			Value::Number(number) => number.as_f64() == Some(0.0),
			Value::String(value) => value.is_empty(),
			Value::Array(_) | Value::Object(_) => false,
		}
	}
}

macro_rules! empty_when_zero {
	($($ty:ty),+) => {
		$(impl EmptyValue for $ty {
			fn is_empty_value(&self) -> bool {
				*self == 0
			}
		})+
	};
}

empty_when_zero!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// Return shape of a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnShape {
	Nothing,
	Value,
	/// Value followed by an error slot.
	ValueOrError,
}

/// Outcome of one invocation, ready to be wrapped into an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
	Value(Value),
	Error { error: RpcError, info: Option<Value> },
}

impl Reply {
	pub fn error(error: RpcError) -> Self {
		Reply::Error { error, info: None }
	}
}

fn encode<T: Serialize>(value: T) -> Reply {
	match serde_json::to_value(value) {
		Ok(value) => Reply::Value(value),
		Err(error) => Reply::error(RpcError::callback(format!(
			"failed to encode result: {error}"
		))),
	}
}

/// Types a handler may return.
pub trait IntoReply: Send + 'static {
	const SHAPE: ReturnShape;

	fn into_reply(self) -> Reply;
}

impl IntoReply for () {
	const SHAPE: ReturnShape = ReturnShape::Nothing;

	fn into_reply(self) -> Reply {
		Reply::Value(Value::Null)
	}
}

macro_rules! plain_reply {
	($($ty:ty),+) => {
		$(impl IntoReply for $ty {
			const SHAPE: ReturnShape = ReturnShape::Value;

			fn into_reply(self) -> Reply {
				encode(self)
			}
		})+
	};
}

plain_reply!(
	String,
	&'static str,
	bool,
	u8,
	u16,
	u32,
	u64,
	usize,
	i8,
	i16,
	i32,
	i64,
	isize,
	Value,
	H256,
	Address,
	PayloadId,
	Quantity,
	Bytes,
	SubscriptionId
);

impl<T: Serialize + Send + 'static> IntoReply for Vec<T> {
	const SHAPE: ReturnShape = ReturnShape::Value;

	fn into_reply(self) -> Reply {
		encode(self)
	}
}

impl<T: Serialize + Send + 'static> IntoReply for Option<T> {
	const SHAPE: ReturnShape = ReturnShape::Value;

	fn into_reply(self) -> Reply {
		encode(self)
	}
}

impl<T: Serialize + Send + 'static> IntoReply for Result<T, RpcError> {
	const SHAPE: ReturnShape = ReturnShape::ValueOrError;

	fn into_reply(self) -> Reply {
		match self {
			Ok(value) => encode(value),
			Err(error) => Reply::error(error),
		}
	}
}

/// Error that still carries the value computed so far.
#[derive(Clone, Debug, PartialEq)]
pub struct Partial<T> {
	pub value: T,
	pub error: RpcError,
}

impl<T> Partial<T> {
	pub fn new(value: T, error: RpcError) -> Self {
		Partial { value, error }
	}
}

impl<T: Serialize + EmptyValue + Send + 'static> IntoReply for Result<T, Partial<T>> {
	const SHAPE: ReturnShape = ReturnShape::ValueOrError;

	fn into_reply(self) -> Reply {
		match self {
			Ok(value) => encode(value),
			Err(Partial { value, error }) => {
				let info = if value.is_empty_value() {
					None
				} else {
					serde_json::to_value(value).ok()
				};
				Reply::Error { error, info }
			},
		}
	}
}
