use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
	engine::{
		EngineError, ExecutionEngine, ForkchoiceState, PayloadAttributes, PayloadStatusKind,
	},
	rawtx::decode_transaction,
	txpool::TxPool,
};
use crate::{
	errors::{ErrorCode, RpcError},
	registry::{Partial, Service},
	types::{Address, Bytes, Quantity, H256},
	utils::unix_timestamp,
};

const SUCCESS: &str = "success";
const FAIL: &str = "fail";

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BlockConfig {
	/// Randomness handed to the execution layer for every block.
	pub prev_randao: H256,
	pub fee_recipient: Address,
	pub gas_limit: u64,
}

impl Default for BlockConfig {
	fn default() -> Self {
		Self {
			prev_randao: H256([
				0x96, 0x2d, 0x15, 0xf8, 0x8c, 0x4b, 0xb7, 0x03, 0xc8, 0xdd, 0xe6, 0x04, 0xcf, 0x82,
				0x0c, 0xb4, 0x96, 0x2d, 0x15, 0xf8, 0x8c, 0x4b, 0xb7, 0x03, 0xc8, 0xdd, 0xe6, 0x04,
				0xcf, 0x82, 0x0c, 0xb4,
			]),
			fee_recipient: Address([
				0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
				0x00, 0x00, 0x00, 0x00, 0x00, 0x11,
			]),
			gas_limit: 300_000_000,
		}
	}
}

#[derive(Debug, Error)]
pub enum BlockError {
	#[error(transparent)]
	Engine(#[from] EngineError),
	#[error("forkchoice update returned no payload id (status {0:?})")]
	MissingPayloadId(PayloadStatusKind),
	#[error("payload {hash:?} rejected with status {status:?}: {reason}")]
	PayloadRejected {
		hash: H256,
		status: PayloadStatusKind,
		reason: String,
	},
	#[error("payload status has no latest valid hash")]
	MissingLatestValidHash,
}

/// Receiver of the `tx` service.
pub struct Transaction {
	pool: Arc<TxPool>,
	engine: Arc<dyn ExecutionEngine>,
	block: BlockConfig,
}

impl Transaction {
	pub fn new(pool: Arc<TxPool>, engine: Arc<dyn ExecutionEngine>, block: BlockConfig) -> Self {
		Transaction {
			pool,
			engine,
			block,
		}
	}

	pub fn service(self: Arc<Self>) -> Service {
		Service::builder("tx", self)
			.method("sendRawTransaction", |transaction, (raw,): (Bytes,)| async move {
				transaction.send_raw_transaction(raw)
			})
			.method("newBlock", |transaction, (head,): (H256,)| async move {
				transaction.new_block(head).await
			})
			.build()
	}

	pub fn send_raw_transaction(&self, raw: Bytes) -> Result<String, Partial<String>> {
		let tx_type = match decode_transaction(raw.as_ref()) {
			Ok(tx_type) => tx_type,
			Err(error) => {
				debug!(%raw, "Rejected raw transaction: {error}");
				return Err(Partial::new(
					FAIL.to_string(),
					RpcError::with_detail(ErrorCode::InvalidParams, error),
				));
			},
		};
		let size = raw.len();
		self.pool
			.push(raw)
			.map_err(|error| Partial::new(FAIL.to_string(), error))?;
		debug!(%tx_type, size, pending = self.pool.len(), "Accepted raw transaction");
		Ok(SUCCESS.to_string())
	}

	pub async fn new_block(&self, head: H256) -> Result<String, Partial<String>> {
		match self.build_block(head).await {
			Ok(hash) => {
				info!(?head, ?hash, "New block built");
				Ok(SUCCESS.to_string())
			},
			Err(error) => {
				warn!(?head, "Failed to build block: {error}");
				Err(Partial::new(
					FAIL.to_string(),
					RpcError::with_detail(ErrorCode::Callback, error),
				))
			},
		}
	}

	/// Drives the engine through one block on top of `head` and returns the new head.
	async fn build_block(&self, head: H256) -> Result<H256, BlockError> {
		let transactions = self.pool.pop(usize::MAX);
		debug!(count = transactions.len(), "Building block");

		let state = ForkchoiceState {
			head_block_hash: head,
			..Default::default()
		};
		let attributes = PayloadAttributes {
			timestamp: Quantity::from(unix_timestamp()),
			prev_randao: self.block.prev_randao,
			suggested_fee_recipient: self.block.fee_recipient,
			transactions,
			no_tx_pool: true,
			gas_limit: Some(Quantity::from(self.block.gas_limit)),
		};
		let updated = self
			.engine
			.forkchoice_updated_v1(state, Some(attributes))
			.await?;
		let payload_id = updated
			.payload_id
			.ok_or(BlockError::MissingPayloadId(updated.payload_status.status))?;
		debug!(?payload_id, "Payload build started");

		let payload = self.engine.get_payload_v1(payload_id).await?;
		let hash = payload.block_hash;
		debug!(?hash, number = %payload.block_number, "Payload received");

		let status = self.engine.new_payload_v1(payload).await?;
		if status.status != PayloadStatusKind::Valid {
			return Err(BlockError::PayloadRejected {
				hash,
				status: status.status,
				reason: status.validation_error.unwrap_or_default(),
			});
		}
		let latest = status
			.latest_valid_hash
			.ok_or(BlockError::MissingLatestValidHash)?;

		self.engine
			.forkchoice_updated_v1(ForkchoiceState::settled(latest), None)
			.await?;
		Ok(latest)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::engine::{
		ExecutionPayload, ForkchoiceUpdated, MockExecutionEngine, PayloadStatus,
	};
	use crate::{
		api::rawtx::{sample_transaction, TxType},
		types::PayloadId,
	};
	use mockall::{predicate::eq, Sequence};
	use serde_json::Map;
	use test_case::test_case;

	const HEAD: H256 = H256([0x01; 32]);
	const BUILT: H256 = H256([0x02; 32]);
	const PAYLOAD_ID: PayloadId = PayloadId([0x03; 8]);

	fn status(kind: PayloadStatusKind, latest: Option<H256>) -> PayloadStatus {
		PayloadStatus {
			status: kind,
			latest_valid_hash: latest,
			validation_error: None,
		}
	}

	fn payload() -> ExecutionPayload {
		ExecutionPayload {
			block_hash: BUILT,
			block_number: Quantity::from(1u64),
			transactions: vec![],
			fields: Map::new(),
		}
	}

	fn transaction(engine: MockExecutionEngine, capacity: usize) -> Transaction {
		Transaction::new(
			Arc::new(TxPool::new(capacity)),
			Arc::new(engine),
			BlockConfig::default(),
		)
	}

	#[test]
	fn block_config_defaults() {
		let config = BlockConfig::default();
		assert_eq!(
			format!("{:?}", config.prev_randao),
			"0x962d15f88c4bb703c8dde604cf820cb4962d15f88c4bb703c8dde604cf820cb4"
		);
		assert_eq!(
			format!("{:?}", config.fee_recipient),
			"0x4200000000000000000000000000000000000011"
		);
		assert_eq!(config.gas_limit, 300_000_000);
	}

	#[test_case(TxType::Legacy)]
	#[test_case(TxType::DynamicFee)]
	#[test_case(TxType::Blob)]
	fn valid_transaction_is_pooled(tx_type: TxType) {
		let transaction = transaction(MockExecutionEngine::new(), 4);
		let reply = transaction.send_raw_transaction(Bytes(sample_transaction(tx_type)));
		assert_eq!(reply, Ok("success".to_string()));
		assert_eq!(transaction.pool.len(), 1);
	}

	#[test_case(&[0xc0] ; "empty legacy list")]
	#[test_case(&[0x02, 0xc0] ; "empty dynamic fee list")]
	#[test_case(&[0xc3, 0x01, 0x02, 0x03] ; "list of bytes")]
	fn malformed_transaction_is_not_pooled(raw: &[u8]) {
		let transaction = transaction(MockExecutionEngine::new(), 4);
		let error = transaction
			.send_raw_transaction(Bytes(raw.to_vec()))
			.unwrap_err();
		assert_eq!(error.value, "fail");
		assert_eq!(error.error.code, -32602);
		assert!(error.error.message.starts_with("Invalid params: rlp: "));
		assert!(transaction.pool.is_empty());
	}

	#[test]
	fn invalid_transaction_fails_with_info() {
		let transaction = transaction(MockExecutionEngine::new(), 4);
		let error = transaction
			.send_raw_transaction(Bytes(vec![0x05, 0xc0]))
			.unwrap_err();
		assert_eq!(error.value, "fail");
		assert_eq!(error.error.code, -32602);
		assert_eq!(
			error.error.message,
			"Invalid params: transaction type not supported"
		);
		assert!(transaction.pool.is_empty());
	}

	#[test]
	fn full_pool_fails_with_info() {
		let transaction = transaction(MockExecutionEngine::new(), 0);
		let error = transaction
			.send_raw_transaction(Bytes(sample_transaction(TxType::Legacy)))
			.unwrap_err();
		assert_eq!(error.value, "fail");
		assert_eq!(error.error.code, -32006);
	}

	#[tokio::test]
	async fn new_block_drives_engine() {
		let mut engine = MockExecutionEngine::new();
		let mut sequence = Sequence::new();
		engine
			.expect_forkchoice_updated_v1()
			.withf(|state, attributes| {
				let Some(attributes) = attributes else {
					return false;
				};
				state.head_block_hash == HEAD
					&& state.safe_block_hash.is_zero()
					&& attributes.no_tx_pool
					&& attributes.transactions == vec![Bytes(sample_transaction(TxType::SetCode))]
					&& attributes.gas_limit == Some(Quantity::from(300_000_000u64))
			})
			.times(1)
			.in_sequence(&mut sequence)
			.returning(|_, _| {
				Ok(ForkchoiceUpdated {
					payload_status: status(PayloadStatusKind::Valid, Some(HEAD)),
					payload_id: Some(PAYLOAD_ID),
				})
			});
		engine
			.expect_get_payload_v1()
			.with(eq(PAYLOAD_ID))
			.times(1)
			.in_sequence(&mut sequence)
			.returning(|_| Ok(payload()));
		engine
			.expect_new_payload_v1()
			.with(eq(payload()))
			.times(1)
			.in_sequence(&mut sequence)
			.returning(|_| Ok(status(PayloadStatusKind::Valid, Some(BUILT))));
		engine
			.expect_forkchoice_updated_v1()
			.with(eq(ForkchoiceState::settled(BUILT)), eq(None))
			.times(1)
			.in_sequence(&mut sequence)
			.returning(|_, _| {
				Ok(ForkchoiceUpdated {
					payload_status: status(PayloadStatusKind::Valid, Some(BUILT)),
					payload_id: None,
				})
			});

		let transaction = transaction(engine, 4);
		transaction
			.send_raw_transaction(Bytes(sample_transaction(TxType::SetCode)))
			.unwrap();
		assert_eq!(transaction.new_block(HEAD).await, Ok("success".to_string()));
		assert!(transaction.pool.is_empty());
	}

	#[tokio::test]
	async fn engine_error_fails_with_info() {
		let mut engine = MockExecutionEngine::new();
		engine
			.expect_forkchoice_updated_v1()
			.times(1)
			.returning(|_, _| {
				Err(EngineError::Rpc {
					code: -38002,
					message: "Invalid forkchoice state".to_string(),
				})
			});
		engine.expect_get_payload_v1().never();

		let error = transaction(engine, 4).new_block(HEAD).await.unwrap_err();
		assert_eq!(error.value, "fail");
		assert_eq!(error.error.code, -32000);
		assert!(error.error.message.contains("Invalid forkchoice state"));
	}

	#[tokio::test]
	async fn rejected_payload_is_not_finalized() {
		let mut engine = MockExecutionEngine::new();
		engine
			.expect_forkchoice_updated_v1()
			.times(1)
			.returning(|_, _| {
				Ok(ForkchoiceUpdated {
					payload_status: status(PayloadStatusKind::Valid, Some(HEAD)),
					payload_id: Some(PAYLOAD_ID),
				})
			});
		engine
			.expect_get_payload_v1()
			.returning(|_| Ok(payload()));
		engine
			.expect_new_payload_v1()
			.returning(|_| Ok(status(PayloadStatusKind::Invalid, Some(HEAD))));

		let error = transaction(engine, 4).new_block(HEAD).await.unwrap_err();
		assert_eq!(error.error.code, -32000);
		assert!(error.error.message.contains("Invalid"));
	}

	#[tokio::test]
	async fn served_through_registry() {
		use crate::registry::ServiceRegistry;
		use serde_json::value::RawValue;

		let mut registry = ServiceRegistry::new();
		registry
			.register(Arc::new(transaction(MockExecutionEngine::new(), 4)).service())
			.unwrap();
		let method = registry.resolve("tx", "sendRawTransaction").unwrap();
		let params = RawValue::from_string(r#"["0x05c0"]"#.to_string()).unwrap();
		let reply = method
			.bind(Default::default(), Some(&params))
			.unwrap()
			.await;
		assert_eq!(
			reply,
			crate::registry::Reply::Error {
				error: RpcError::with_detail(
					ErrorCode::InvalidParams,
					"transaction type not supported"
				),
				info: Some(serde_json::json!("fail")),
			}
		);
	}
}
