//! Positional argument decoding.
//!
//! Wire params stay raw until a method is resolved. The handler's argument tuple then decides
//! how every position is decoded.

use serde::de::DeserializeOwned;
use serde_json::{value::RawValue, Value};
use std::any::type_name;

use crate::errors::{RpcError, SERVICE_METHOD_SEPARATOR};

/// Schema entry of one positional argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSpec {
	pub type_name: &'static str,
	/// Argument may be omitted or `null`, resolving to its empty value.
	pub optional: bool,
}

impl ParamSpec {
	pub fn of<T: DeserializeOwned>() -> Self {
		ParamSpec {
			type_name: type_name::<T>(),
			optional: serde_json::from_value::<T>(Value::Null).is_ok(),
		}
	}
}

/// Argument tuple of a handler, from `()` up to six positions.
pub trait Params: Sized + Send + 'static {
	const ARITY: usize;

	fn specs() -> Vec<ParamSpec>;

	fn from_values(values: &[&RawValue]) -> Result<Self, RpcError>;
}

/// Decodes raw wire params for the method `service_method`.
pub fn decode<P: Params>(
	service: &str,
	method: &str,
	params: Option<&RawValue>,
) -> Result<P, RpcError> {
	if P::ARITY == 0 {
		return P::from_values(&[]);
	}
	let Some(params) = params else {
		return Err(RpcError::invalid_params(format!(
			"{service}{SERVICE_METHOD_SEPARATOR}{method} expects {} parameters, got 0",
			P::ARITY
		)));
	};

	let values: Vec<&RawValue> = serde_json::from_str(params.get())
		.map_err(|error| RpcError::invalid_params(error.to_string()))?;
	if values.len() > P::ARITY {
		return Err(RpcError::invalid_params(format!(
			"too many params, want {} got {}",
			P::ARITY,
			values.len()
		)));
	}
	P::from_values(&values)
}

fn decode_at<T: DeserializeOwned>(values: &[&RawValue], index: usize) -> Result<T, RpcError> {
	match values.get(index) {
		Some(raw) if raw.get() != "null" => serde_json::from_str(raw.get())
			.map_err(|error| RpcError::invalid_params(format!("invalid argument {index}: {error}"))),
		// Missing trailing and explicit null arguments decode the same way
		_ => serde_json::from_value(Value::Null).map_err(|_| {
			RpcError::invalid_params(format!("invalid or missing value for params[{index}]"))
		}),
	}
}

impl Params for () {
	const ARITY: usize = 0;

	fn specs() -> Vec<ParamSpec> {
		vec![]
	}

	fn from_values(_: &[&RawValue]) -> Result<Self, RpcError> {
		Ok(())
	}
}

macro_rules! impl_params {
	($arity:literal; $($ty:ident => $index:tt),+) => {
		impl<$($ty: DeserializeOwned + Send + 'static),+> Params for ($($ty,)+) {
			const ARITY: usize = $arity;

			fn specs() -> Vec<ParamSpec> {
				vec![$(ParamSpec::of::<$ty>()),+]
			}

			fn from_values(values: &[&RawValue]) -> Result<Self, RpcError> {
				Ok(($(decode_at::<$ty>(values, $index)?,)+))
			}
		}
	};
}

impl_params!(1; A => 0);
impl_params!(2; A => 0, B => 1);
impl_params!(3; A => 0, B => 1, C => 2);
impl_params!(4; A => 0, B => 1, C => 2, D => 3);
impl_params!(5; A => 0, B => 1, C => 2, D => 3, E => 4);
impl_params!(6; A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
