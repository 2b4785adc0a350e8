//! Services shipped with the sequencer.
//!
//! * `tx` - raw transaction intake and block production on the execution engine
//! * `test` - diagnostics

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::registry::Service;

pub mod engine;
pub mod rawtx;
pub mod transaction;
pub mod txpool;

use self::{
	engine::{ExecutionEngine, DEFAULT_ENGINE_URL},
	test::Test,
	transaction::{BlockConfig, Transaction},
	txpool::{TxPool, DEFAULT_TX_POOL_CAPACITY},
};

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct ApiConfig {
	/// Engine API endpoint of the execution layer (default: http://localhost:8545).
	pub engine_url: String,
	/// Raw transactions kept until the next block (default: 4096).
	pub tx_pool_capacity: usize,
	#[serde(flatten)]
	pub block: BlockConfig,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			engine_url: DEFAULT_ENGINE_URL.to_string(),
			tx_pool_capacity: DEFAULT_TX_POOL_CAPACITY,
			block: BlockConfig::default(),
		}
	}
}

/// Every shipped service, ready for registration.
pub fn services(config: &ApiConfig, engine: Arc<dyn ExecutionEngine>) -> Vec<Service> {
	let pool = Arc::new(TxPool::new(config.tx_pool_capacity));
	let transaction = Arc::new(Transaction::new(pool, engine, config.block.clone()));
	vec![transaction.service(), Arc::new(Test).service()]
}
