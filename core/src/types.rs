//! Identifiers and quantities rendered as `0x` hex on the wire.

use fixed_hash::construct_fixed_hash;
use impl_serde::impl_fixed_hash_serde;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use ethereum_types::{H160 as Address, H256, U256, U64 as Quantity};

use crate::registry::EmptyValue;

construct_fixed_hash! {
	/// Identifier of a payload build process on the execution engine.
	pub struct PayloadId(8);
}
impl_fixed_hash_serde!(PayloadId, 8);

/// Arbitrary length byte string, encoded as `0x` hex.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bytes(#[serde(with = "impl_serde::serialize")] pub Vec<u8>);

impl Bytes {
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl AsRef<[u8]> for Bytes {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl From<Vec<u8>> for Bytes {
	fn from(value: Vec<u8>) -> Self {
		Bytes(value)
	}
}

impl fmt::Display for Bytes {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

impl fmt::Debug for Bytes {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

/// Identifier handed out by subscription callbacks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

macro_rules! zero_is_empty {
	($($ty:ty),+) => {
		$(
			impl EmptyValue for $ty {
				fn is_empty_value(&self) -> bool {
					self.is_zero()
				}
			}
		)+
	};
}

zero_is_empty!(H256, Address, PayloadId, Quantity);

impl EmptyValue for Bytes {
	fn is_empty_value(&self) -> bool {
		self.0.is_empty()
	}
}

impl EmptyValue for SubscriptionId {
	fn is_empty_value(&self) -> bool {
		self.0.is_empty()
	}
}

pub mod tracing_level_format {
	use serde::{self, Deserialize, Deserializer, Serializer};
	use std::str::FromStr;
	use tracing::Level;

	pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&level.to_string())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		Level::from_str(&value).map_err(serde::de::Error::custom)
	}
}

pub mod duration_seconds_format {
	use serde::{self, Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_secs)
	}
}
