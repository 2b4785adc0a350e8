use std::{
	collections::VecDeque,
	sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::trace;

use crate::{
	errors::{ErrorCode, RpcError},
	types::Bytes,
};

pub const DEFAULT_TX_POOL_CAPACITY: usize = 4096;

/// Bounded FIFO of raw transactions waiting for the next block.
pub struct TxPool {
	capacity: usize,
	transactions: Mutex<VecDeque<Bytes>>,
}

impl TxPool {
	pub fn new(capacity: usize) -> Self {
		TxPool {
			capacity,
			transactions: Mutex::new(VecDeque::new()),
		}
	}

	fn transactions(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
		self.transactions
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}

	pub fn push(&self, transaction: Bytes) -> Result<(), RpcError> {
		let mut transactions = self.transactions();
		if transactions.len() >= self.capacity {
			return Err(ErrorCode::SystemTooBusy.into());
		}
		transactions.push_back(transaction);
		trace!(pending = transactions.len(), "Transaction added to pool");
		Ok(())
	}

	/// Removes up to `count` of the oldest transactions.
	pub fn pop(&self, count: usize) -> Vec<Bytes> {
		let mut transactions = self.transactions();
		let count = count.min(transactions.len());
		transactions.drain(..count).collect()
	}

	pub fn len(&self) -> usize {
		self.transactions().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
