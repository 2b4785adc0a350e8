//! Structural decoding of raw transactions.
//!
//! A raw transaction is either a legacy RLP list or an EIP-2718 type byte followed by an RLP
//! list. Every field of the list is decoded against the layout of its type, signatures are
//! not recovered.

use rlp::{DecoderError, Rlp};
use strum::Display;
use thiserror::Error;

use crate::types::{Address, H256, U256};

/// Largest EIP-2718 transaction type byte.
const MAX_TX_TYPE: u8 = 0x7f;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TxType {
	Legacy,
	AccessList,
	DynamicFee,
	Blob,
	SetCode,
}

impl TxType {
	fn from_type_byte(byte: u8) -> Option<Self> {
		match byte {
			0x01 => Some(TxType::AccessList),
			0x02 => Some(TxType::DynamicFee),
			0x03 => Some(TxType::Blob),
			0x04 => Some(TxType::SetCode),
			_ => None,
		}
	}

	fn layout(self) -> &'static [(&'static str, Field)] {
		match self {
			TxType::Legacy => LEGACY,
			TxType::AccessList => ACCESS_LIST,
			TxType::DynamicFee => DYNAMIC_FEE,
			TxType::Blob => BLOB,
			TxType::SetCode => SET_CODE,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
	/// 64 bit integer.
	Word,
	/// Integer of up to 256 bits.
	Uint,
	/// Address, or empty for contract creation.
	Recipient,
	Account,
	Data,
	AccessList,
	BlobHashes,
	Authorizations,
}

use Field::*;

const LEGACY: &[(&str, Field)] = &[
	("nonce", Word),
	("gasPrice", Uint),
	("gas", Word),
	("to", Recipient),
	("value", Uint),
	("data", Data),
	("v", Uint),
	("r", Uint),
	("s", Uint),
];

const ACCESS_LIST: &[(&str, Field)] = &[
	("chainId", Uint),
	("nonce", Word),
	("gasPrice", Uint),
	("gas", Word),
	("to", Recipient),
	("value", Uint),
	("data", Data),
	("accessList", AccessList),
	("yParity", Uint),
	("r", Uint),
	("s", Uint),
];

const DYNAMIC_FEE: &[(&str, Field)] = &[
	("chainId", Uint),
	("nonce", Word),
	("maxPriorityFeePerGas", Uint),
	("maxFeePerGas", Uint),
	("gas", Word),
	("to", Recipient),
	("value", Uint),
	("data", Data),
	("accessList", AccessList),
	("yParity", Uint),
	("r", Uint),
	("s", Uint),
];

const BLOB: &[(&str, Field)] = &[
	("chainId", Uint),
	("nonce", Word),
	("maxPriorityFeePerGas", Uint),
	("maxFeePerGas", Uint),
	("gas", Word),
	("to", Account),
	("value", Uint),
	("data", Data),
	("accessList", AccessList),
	("maxFeePerBlobGas", Uint),
	("blobVersionedHashes", BlobHashes),
	("yParity", Uint),
	("r", Uint),
	("s", Uint),
];

const SET_CODE: &[(&str, Field)] = &[
	("chainId", Uint),
	("nonce", Word),
	("maxPriorityFeePerGas", Uint),
	("maxFeePerGas", Uint),
	("gas", Word),
	("to", Account),
	("value", Uint),
	("data", Data),
	("accessList", AccessList),
	("authorizationList", Authorizations),
	("yParity", Uint),
	("r", Uint),
	("s", Uint),
];

/// Blob transactions sent with their sidecar: body, blobs, commitments and proofs.
const BLOB_NETWORK_ITEMS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
	#[error("typed transaction too short")]
	Empty,
	#[error("transaction type not supported")]
	UnsupportedType,
	#[error("rlp: {0:?}")]
	Rlp(#[from] DecoderError),
	#[error("rlp: input contains more than one value")]
	TrailingBytes,
	#[error("rlp: {tx_type} transaction has {actual} fields, want {expected}")]
	FieldCount {
		tx_type: TxType,
		expected: usize,
		actual: usize,
	},
	#[error("rlp: invalid {field}: {error:?}")]
	Field {
		field: &'static str,
		error: DecoderError,
	},
}

/// Decodes `raw` far enough to know every field is well formed and returns its type.
pub fn decode_transaction(raw: &[u8]) -> Result<TxType, DecodeError> {
	let Some((&first, payload)) = raw.split_first() else {
		return Err(DecodeError::Empty);
	};
	if first > MAX_TX_TYPE {
		decode_body(TxType::Legacy, raw)?;
		return Ok(TxType::Legacy);
	}
	let tx_type = TxType::from_type_byte(first).ok_or(DecodeError::UnsupportedType)?;
	if payload.is_empty() {
		return Err(DecodeError::Empty);
	}
	decode_body(tx_type, payload)?;
	Ok(tx_type)
}

fn decode_body(tx_type: TxType, data: &[u8]) -> Result<(), DecodeError> {
	let rlp = Rlp::new(data);
	let total = rlp.payload_info()?.total();
	if total > data.len() {
		return Err(DecoderError::RlpIsTooShort.into());
	}
	if total < data.len() {
		return Err(DecodeError::TrailingBytes);
	}

	let mut fields = list_items(&rlp)?;
	if tx_type == TxType::Blob && fields.len() == BLOB_NETWORK_ITEMS && fields[0].is_list() {
		for sidecar in &fields[1..] {
			field_items(sidecar, "sidecar")?
				.iter()
				.try_for_each(|item| bytes(item, "sidecar"))?;
		}
		fields = list_items(&fields[0])?;
	}

	let layout = tx_type.layout();
	if fields.len() != layout.len() {
		return Err(DecodeError::FieldCount {
			tx_type,
			expected: layout.len(),
			actual: fields.len(),
		});
	}
	layout
		.iter()
		.zip(&fields)
		.try_for_each(|(&(name, field), item)| decode_field(item, name, field))
}

/// Items of an RLP list. The items have to cover the list payload exactly.
fn list_items<'a>(list: &Rlp<'a>) -> Result<Vec<Rlp<'a>>, DecoderError> {
	if !list.is_list() {
		return Err(DecoderError::RlpExpectedToBeList);
	}
	let items = (0..list.item_count()?)
		.map(|index| list.at(index))
		.collect::<Result<Vec<_>, _>>()?;
	let covered: usize = items.iter().map(|item| item.as_raw().len()).sum();
	if covered != list.payload_info()?.value_len {
		return Err(DecoderError::RlpInconsistentLengthAndData);
	}
	Ok(items)
}

fn field_items<'a>(item: &Rlp<'a>, field: &'static str) -> Result<Vec<Rlp<'a>>, DecodeError> {
	list_items(item).map_err(|error| DecodeError::Field { field, error })
}

fn value<T: rlp::Decodable>(item: &Rlp, field: &'static str) -> Result<T, DecodeError> {
	item.as_val::<T>()
		.map_err(|error| DecodeError::Field { field, error })
}

fn bytes(item: &Rlp, field: &'static str) -> Result<(), DecodeError> {
	value::<Vec<u8>>(item, field).map(drop)
}

fn decode_field(item: &Rlp, name: &'static str, field: Field) -> Result<(), DecodeError> {
	match field {
		Word => value::<u64>(item, name).map(drop),
		Uint => value::<U256>(item, name).map(drop),
		Recipient if item.is_data() && item.is_empty() => Ok(()),
		Recipient | Account => value::<Address>(item, name).map(drop),
		Data => bytes(item, name),
		AccessList => field_items(item, name)?.iter().try_for_each(|entry| {
			let items = field_items(entry, name)?;
			let [address, keys] = items.as_slice() else {
				return Err(DecodeError::Field {
					field: name,
					error: DecoderError::RlpIncorrectListLen,
				});
			};
			value::<Address>(address, name)?;
			field_items(keys, name)?
				.iter()
				.try_for_each(|key| value::<H256>(key, name).map(drop))
		}),
		BlobHashes => field_items(item, name)?
			.iter()
			.try_for_each(|hash| value::<H256>(hash, name).map(drop)),
		Authorizations => field_items(item, name)?.iter().try_for_each(|tuple| {
			let items = field_items(tuple, name)?;
			let [chain_id, address, nonce, y_parity, r, s] = items.as_slice() else {
				return Err(DecodeError::Field {
					field: name,
					error: DecoderError::RlpIncorrectListLen,
				});
			};
			value::<U256>(chain_id, name)?;
			value::<Address>(address, name)?;
			value::<u64>(nonce, name)?;
			value::<u8>(y_parity, name)?;
			value::<U256>(r, name)?;
			value::<U256>(s, name).map(drop)
		}),
	}
}

/// Well formed, unsigned transaction of `tx_type`.
#[cfg(test)]
pub(crate) fn sample_transaction(tx_type: TxType) -> Vec<u8> {
	tests::encode(tx_type, None)
}
