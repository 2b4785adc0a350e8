//! Engine API client of the execution layer.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
	codec::JSONRPC_VERSION,
	types::{Address, Bytes, PayloadId, Quantity, H256},
};

pub const DEFAULT_ENGINE_URL: &str = "http://localhost:8545";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceState {
	pub head_block_hash: H256,
	pub safe_block_hash: H256,
	pub finalized_block_hash: H256,
}

impl ForkchoiceState {
	/// Head, safe and finalized all pointing at `hash`.
	pub fn settled(hash: H256) -> Self {
		ForkchoiceState {
			head_block_hash: hash,
			safe_block_hash: hash,
			finalized_block_hash: hash,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributes {
	pub timestamp: Quantity,
	pub prev_randao: H256,
	pub suggested_fee_recipient: Address,
	pub transactions: Vec<Bytes>,
	pub no_tx_pool: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub gas_limit: Option<Quantity>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadStatusKind {
	Valid,
	Invalid,
	Syncing,
	Accepted,
	InvalidBlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatus {
	pub status: PayloadStatusKind,
	pub latest_valid_hash: Option<H256>,
	#[serde(default)]
	pub validation_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceUpdated {
	pub payload_status: PayloadStatus,
	pub payload_id: Option<PayloadId>,
}

/// Payload built by the execution layer.
///
/// Only the fields the sequencer looks at are typed, the rest is handed back untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
	pub block_hash: H256,
	pub block_number: Quantity,
	pub transactions: Vec<Bytes>,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("engine request failed: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("engine returned error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("engine response has neither result nor error")]
	MissingResult,
	#[error("cannot decode engine result: {0}")]
	Decode(#[from] serde_json::Error),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
	async fn forkchoice_updated_v1(
		&self,
		state: ForkchoiceState,
		attributes: Option<PayloadAttributes>,
	) -> Result<ForkchoiceUpdated, EngineError>;

	async fn get_payload_v1(&self, payload_id: PayloadId) -> Result<ExecutionPayload, EngineError>;

	async fn new_payload_v1(&self, payload: ExecutionPayload) -> Result<PayloadStatus, EngineError>;
}

#[derive(Serialize)]
struct EngineRequest<'a, P> {
	jsonrpc: &'static str,
	id: u64,
	method: &'a str,
	params: P,
}

#[derive(Deserialize)]
struct EngineResponse {
	#[serde(default)]
	result: Option<Value>,
	#[serde(default)]
	error: Option<EngineRpcError>,
}

#[derive(Deserialize)]
struct EngineRpcError {
	code: i64,
	message: String,
}

impl EngineResponse {
	fn into_result<T: DeserializeOwned>(self) -> Result<T, EngineError> {
		if let Some(EngineRpcError { code, message }) = self.error {
			return Err(EngineError::Rpc { code, message });
		}
		let result = self.result.ok_or(EngineError::MissingResult)?;
		Ok(serde_json::from_value(result)?)
	}
}

/// JSON-RPC 2.0 over HTTP client of the engine API.
pub struct EngineClient {
	client: reqwest::Client,
	url: String,
	next_id: AtomicU64,
}

impl EngineClient {
	pub fn new(url: &str) -> Self {
		EngineClient {
			client: reqwest::Client::new(),
			url: url.to_string(),
			next_id: AtomicU64::new(1),
		}
	}

	async fn call<P, T>(&self, method: &str, params: P) -> Result<T, EngineError>
	where
		P: Serialize + Send,
		T: DeserializeOwned,
	{
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		trace!(id, method, url = %self.url, "Sending engine request");
		let request = EngineRequest {
			jsonrpc: JSONRPC_VERSION,
			id,
			method,
			params,
		};
		let response = self
			.client
			.post(&self.url)
			.json(&request)
			.send()
			.await?
			.error_for_status()?
			.json::<EngineResponse>()
			.await?;
		debug!(id, method, "Engine request completed");
		response.into_result()
	}
}

#[async_trait]
impl ExecutionEngine for EngineClient {
	async fn forkchoice_updated_v1(
		&self,
		state: ForkchoiceState,
		attributes: Option<PayloadAttributes>,
	) -> Result<ForkchoiceUpdated, EngineError> {
		self.call("engine_forkchoiceUpdatedV1", (state, attributes))
			.await
	}

	async fn get_payload_v1(&self, payload_id: PayloadId) -> Result<ExecutionPayload, EngineError> {
		self.call("engine_getPayloadV1", (payload_id,)).await
	}

	async fn new_payload_v1(&self, payload: ExecutionPayload) -> Result<PayloadStatus, EngineError> {
		self.call("engine_newPayloadV1", (payload,)).await
	}
}
