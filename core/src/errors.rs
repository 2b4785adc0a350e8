//! Error codes and the typed RPC error carried through the dispatch core.
//!
//! Codes are the discriminants of [`ErrorCode`], so two variants can never share a code without
//! the build failing. [`validate_codes`] additionally checks that every code sits in a range the
//! wire protocol reserves for it and carries a canonical message.

use std::collections::HashSet;
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;

pub const SERVICE_METHOD_SEPARATOR: &str = "_";

const SHUTDOWN_CODE: i32 = -32000;
const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

const CUSTOM_CODES: std::ops::RangeInclusive<i32> = -32099..=-32001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter)]
#[repr(i32)]
pub enum ErrorCode {
	InvalidMessage = -32700,
	Callback = -32000,
	InvalidRequest = -32600,
	MethodNotFound = -32601,
	InvalidParams = -32602,

	DbNotFound = -32001,
	OutOfBalance = -32002,
	SignatureInvalid = -32003,
	ContractDeploy = -32004,
	ContractInvoke = -32005,
	SystemTooBusy = -32006,
	RepeatedTx = -32007,
	ContractPermission = -32008,
	AccountNotExist = -32009,
	NamespaceNotFound = -32010,
	NoBlockGenerated = -32011,
	SubNotExist = -32012,
	Snapshot = -32013,
	UnlockAccount = -32014,
	InvokeNativeContract = -32015,
	InvalidNodeHash = -32016,
	UnreachablePeer = -32017,
	Inconsistent = -32018,
	InvalidCollection = -32019,
	SelfGovService = -32020,
	DeprecatedApi = -32021,
	ContractNotExist = -32022,

	InvalidToken = -32097,
	Unauthorized = -32098,
	Cert = -32099,
}

impl ErrorCode {
	pub const fn code(self) -> i32 {
		self as i32
	}

	pub const fn message(self) -> &'static str {
		match self {
			ErrorCode::InvalidMessage => "Invalid JSON message",
			ErrorCode::Callback => "Internal server error",
			ErrorCode::InvalidRequest => "Invalid request",
			ErrorCode::MethodNotFound => "Method not found",
			ErrorCode::InvalidParams => "Invalid params",
			ErrorCode::DbNotFound => "DB not found",
			ErrorCode::OutOfBalance => "Out of balance",
			ErrorCode::SignatureInvalid => "Invalid signature",
			ErrorCode::ContractDeploy => "Deploy contract failed",
			ErrorCode::ContractInvoke => "Invoke contract failed",
			ErrorCode::SystemTooBusy => "System is too busy",
			ErrorCode::RepeatedTx => "Repeated transaction",
			ErrorCode::ContractPermission => "Contract invocation permission not enough",
			ErrorCode::AccountNotExist => "Account dose not exist",
			ErrorCode::NamespaceNotFound => "The namespace does not exist",
			ErrorCode::NoBlockGenerated => "There is no block generated",
			ErrorCode::SubNotExist => "Required subscription does not existed or has expired",
			ErrorCode::Snapshot => "The process of snapshot or archive happened error",
			ErrorCode::UnlockAccount => "Failed to unlock local node account",
			ErrorCode::InvokeNativeContract => "Failed to invoke native contract",
			ErrorCode::InvalidNodeHash => "Invalid participant node hashes",
			ErrorCode::UnreachablePeer => "Unreachable peers",
			ErrorCode::Inconsistent => "Inconsistent peer",
			ErrorCode::InvalidCollection => "Invalid private transaction with no collection info",
			ErrorCode::SelfGovService => "ACO service is not available",
			ErrorCode::DeprecatedApi => "Deprecated API",
			ErrorCode::ContractNotExist => "contract not exist",
			ErrorCode::InvalidToken => "Invalid token",
			ErrorCode::Unauthorized => "Unauthorized, Please check your cert",
			ErrorCode::Cert => "Cert error",
		}
	}

	fn is_standard(self) -> bool {
		matches!(
			self,
			ErrorCode::InvalidMessage
				| ErrorCode::Callback
				| ErrorCode::InvalidRequest
				| ErrorCode::MethodNotFound
				| ErrorCode::InvalidParams
		)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeTableError {
	#[error("error code: {0} already exist")]
	Duplicate(i32),
	#[error("error code: {0} has no message")]
	MissingMessage(i32),
	#[error("error code: {0} is outside of the reserved custom range")]
	OutOfRange(i32),
}

/// Checks the code table before the server accepts any traffic.
pub fn validate_codes() -> Result<(), CodeTableError> {
	validate_table(ErrorCode::iter().map(|code| (code.code(), code.message(), code.is_standard())))
}

fn validate_table<'a>(
	entries: impl IntoIterator<Item = (i32, &'a str, bool)>,
) -> Result<(), CodeTableError> {
	let mut seen = HashSet::new();
	for (code, message, standard) in entries {
		if !seen.insert(code) {
			return Err(CodeTableError::Duplicate(code));
		}
		if message.is_empty() {
			return Err(CodeTableError::MissingMessage(code));
		}
		if !standard && !CUSTOM_CODES.contains(&code) {
			return Err(CodeTableError::OutOfRange(code));
		}
	}
	Ok(())
}

/// Error sent back to the caller inside an error envelope.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RpcError {
	pub code: i32,
	pub message: String,
}

impl RpcError {
	pub fn new(code: i32, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	/// Canonical message of `code`, followed by request specific detail.
	pub fn with_detail(code: ErrorCode, detail: impl std::fmt::Display) -> Self {
		Self::new(code.code(), format!("{}: {detail}", code.message()))
	}

	pub fn method_not_found(service: &str, method: &str) -> Self {
		Self::new(
			ErrorCode::MethodNotFound.code(),
			format!(
				"The method {service}{SERVICE_METHOD_SEPARATOR}{method} does not exist/is not available"
			),
		)
	}

	pub fn invalid_params(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InvalidParams.code(), message)
	}

	pub fn invalid_message(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InvalidMessage.code(), message)
	}

	pub fn invalid_request(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InvalidRequest.code(), message)
	}

	pub fn callback(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::Callback.code(), message)
	}

	pub fn shutdown() -> Self {
		Self::new(SHUTDOWN_CODE, SHUTDOWN_MESSAGE)
	}
}

impl From<ErrorCode> for RpcError {
	fn from(code: ErrorCode) -> Self {
		Self::new(code.code(), code.message())
	}
}

/// Failures of service registration. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
	#[error("no api service will be registered")]
	NoApis,
	#[error("no service name")]
	NoServiceName,
	#[error("not exported receiver")]
	NotExported,
	#[error("no suitable methods/subscriptions to expose")]
	NoSuitable,
}

#[cfg(test)]
mod tests {
	use super::*;
	use test_case::test_case;

	#[test]
	fn code_table_is_valid() {
		assert_eq!(validate_codes(), Ok(()));
	}

	#[test]
	fn duplicate_code_is_rejected() {
		let table = [
			(-32001, "DB not found", false),
			(-32002, "Out of balance", false),
			(-32001, "Something else", false),
		];
		assert_eq!(validate_table(table), Err(CodeTableError::Duplicate(-32001)));
	}

	#[test_case(-32100, "Too far" ; "below custom range")]
	#[test_case(-31999, "Too close" ; "above custom range")]
	fn custom_code_out_of_range_is_rejected(code: i32, message: &str) {
		assert_eq!(
			validate_table([(code, message, false)]),
			Err(CodeTableError::OutOfRange(code))
		);
	}

	#[test]
	fn empty_message_is_rejected() {
		assert_eq!(
			validate_table([(-32050, "", false)]),
			Err(CodeTableError::MissingMessage(-32050))
		);
	}

	#[test_case(ErrorCode::InvalidParams, -32602, "Invalid params")]
	#[test_case(ErrorCode::RepeatedTx, -32007, "Repeated transaction")]
	#[test_case(ErrorCode::Cert, -32099, "Cert error")]
	fn codes_and_messages(code: ErrorCode, expected_code: i32, expected_message: &str) {
		let error = RpcError::from(code);
		assert_eq!(error.code, expected_code);
		assert_eq!(error.message, expected_message);
	}

	#[test]
	fn detail_is_appended_to_canonical_message() {
		let error = RpcError::with_detail(ErrorCode::RepeatedTx, "0xabcd");
		assert_eq!(error.code, -32007);
		assert_eq!(error.to_string(), "Repeated transaction: 0xabcd");
	}

	#[test]
	fn method_not_found_message() {
		let error = RpcError::method_not_found("unknownsvc", "foo");
		assert_eq!(error.code, -32601);
		assert_eq!(
			error.message,
			"The method unknownsvc_foo does not exist/is not available"
		);
	}

	#[test]
	fn shutdown_error() {
		let error = RpcError::shutdown();
		assert_eq!(error.code, -32000);
		assert_eq!(error.message, "Server is shutting down");
	}
}
