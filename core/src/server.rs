//! Connection serving loop and server lifecycle.
//!
//! One [`RpcServer`] serves any number of codecs. Each read batch is resolved against the
//! registry and its calls run in request order, the answers are written back as one response.
//! In persistent mode every batch runs on its own task while the loop goes back to reading.

use futures::FutureExt;
use std::{
	any::Any,
	cell::Cell,
	collections::HashMap,
	future::Future,
	io,
	panic::AssertUnwindSafe,
	pin::Pin,
	sync::{
		atomic::{AtomicU64, AtomicU8, Ordering},
		Arc, Mutex,
	},
	task::{Context, Poll},
	time::Duration,
};
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use crate::{
	codec::{Batch, Envelope, Response, ServerCodec},
	errors::RpcError,
	registry::{BoundCall, CallContext, Invocation, Reply, ServiceRegistry},
};

pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
	Running = 0,
	/// No new batches are accepted, in-flight work may still finish.
	Draining = 1,
	Closed = 2,
}

impl From<u8> for ServerState {
	fn from(value: u8) -> Self {
		match value {
			0 => ServerState::Running,
			1 => ServerState::Draining,
			_ => ServerState::Closed,
		}
	}
}

#[derive(Debug, Error)]
pub enum ServeError {
	#[error("Server is shutting down")]
	ShuttingDown,
	#[error("Failed to write response: {0}")]
	Write(#[from] io::Error),
}

thread_local! {
	static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

/// True while a method handler is being polled on this thread.
///
/// Lets a process wide panic hook tell isolated handler panics apart from fatal ones.
pub fn is_handler_panic() -> bool {
	IN_HANDLER.with(Cell::get)
}

struct Isolated(Invocation);

struct RestoreFlag(bool);

impl Drop for RestoreFlag {
	fn drop(&mut self) {
		IN_HANDLER.with(|flag| flag.set(self.0));
	}
}

impl Future for Isolated {
	type Output = Reply;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let _restore = RestoreFlag(IN_HANDLER.with(|flag| flag.replace(true)));
		self.0.as_mut().poll(cx)
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
	panic
		.downcast_ref::<&str>()
		.copied()
		.or_else(|| panic.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("unknown panic")
}

/// Runs one resolved call and turns its outcome into an envelope.
async fn invoke(call: BoundCall) -> Envelope {
	let BoundCall {
		id,
		descriptor,
		resolution,
	} = call;
	let invocation = match resolution {
		Ok(invocation) => invocation,
		Err(error) => return Envelope::failure(id, &error),
	};

	match AssertUnwindSafe(Isolated(invocation)).catch_unwind().await {
		Ok(Reply::Value(value)) => Envelope::success(id, value),
		Ok(Reply::Error {
			error,
			info: Some(info),
		}) => Envelope::failure_with_info(id, &error, info),
		Ok(Reply::Error { error, info: None }) => Envelope::failure(id, &error),
		Err(panic) => {
			let method = descriptor.as_ref().map(|descriptor| descriptor.name.as_str());
			error!(?method, "Method handler panicked: {}", panic_message(panic.as_ref()));
			Envelope::failure(id, &RpcError::callback("method handler panicked"))
		},
	}
}

async fn handle_batch(
	registry: Arc<ServiceRegistry>,
	codec: Arc<dyn ServerCodec>,
	batch: Batch,
	context: CallContext,
) {
	let mut envelopes = Vec::with_capacity(batch.items.len());
	for item in batch.items {
		envelopes.push(invoke(registry.bind(item, context.clone())).await);
	}

	if let Err(error) = codec.write(&Response::from_envelopes(envelopes)).await {
		warn!("Failed to write response, closing connection: {error}");
		codec.close().await;
	}
}

fn shutdown_response(batch: &Batch) -> Response {
	let error = RpcError::shutdown();
	let envelopes = batch
		.items
		.iter()
		.map(|item| Envelope::failure(item.id().cloned(), &error))
		.collect::<Vec<_>>();
	if batch.is_batch {
		Response::Batch(envelopes)
	} else {
		Response::from_envelopes(envelopes)
	}
}

type Connections = Mutex<HashMap<u64, Arc<dyn ServerCodec>>>;

/// Keeps a codec in the open connection set for as long as it is served.
struct ConnectionGuard<'a> {
	id: u64,
	connections: &'a Connections,
}

impl Drop for ConnectionGuard<'_> {
	fn drop(&mut self) {
		if let Ok(mut connections) = self.connections.lock() {
			connections.remove(&self.id);
		}
	}
}

pub struct RpcServer {
	registry: Arc<ServiceRegistry>,
	grace_period: Duration,
	state: AtomicU8,
	connections: Connections,
	next_connection_id: AtomicU64,
}

impl RpcServer {
	pub fn new(registry: Arc<ServiceRegistry>, grace_period: Duration) -> Self {
		Self {
			registry,
			grace_period,
			state: AtomicU8::new(ServerState::Running as u8),
			connections: Mutex::new(HashMap::new()),
			next_connection_id: AtomicU64::new(0),
		}
	}

	pub fn registry(&self) -> &Arc<ServiceRegistry> {
		&self.registry
	}

	pub fn state(&self) -> ServerState {
		self.state.load(Ordering::SeqCst).into()
	}

	pub fn is_running(&self) -> bool {
		self.state() == ServerState::Running
	}

	pub fn open_connections(&self) -> usize {
		self.connections
			.lock()
			.map(|connections| connections.len())
			.unwrap_or(0)
	}

	/// Reads and answers exactly one message. The codec is left open.
	pub async fn serve_single_request(
		&self,
		codec: Arc<dyn ServerCodec>,
	) -> Result<(), ServeError> {
		self.serve(codec, true).await
	}

	/// Serves a codec until the peer goes away or the server stops, then closes it.
	pub async fn serve_codec(&self, codec: Arc<dyn ServerCodec>) -> Result<(), ServeError> {
		let result = self.serve(codec.clone(), false).await;
		codec.close().await;
		result
	}

	fn track(&self, codec: Arc<dyn ServerCodec>) -> Result<ConnectionGuard<'_>, ServeError> {
		let mut connections = self
			.connections
			.lock()
			.map_err(|_| ServeError::ShuttingDown)?;
		// Checked under the lock, so `stop` never misses a connection it has to close
		if !self.is_running() {
			return Err(ServeError::ShuttingDown);
		}
		let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
		connections.insert(id, codec);
		Ok(ConnectionGuard {
			id,
			connections: &self.connections,
		})
	}

	async fn serve(
		&self,
		codec: Arc<dyn ServerCodec>,
		single_shot: bool,
	) -> Result<(), ServeError> {
		let connection = self.track(codec.clone())?;
		let context = CallContext::new(codec.closed().child_token());
		let tracker = TaskTracker::new();
		let mut result = Ok(());
		debug!(connection = connection.id, single_shot, "Serving connection");

		loop {
			// A single-shot connection is always answered, a stop racing the read is seen below
			if !single_shot && !self.is_running() {
				break;
			}
			let batch = match codec.read_batch().await {
				Ok(batch) => batch,
				Err(error) if error.is_end_of_stream() => break,
				Err(error) => {
					debug!(connection = connection.id, "Failed to read request: {error}");
					let envelope = Envelope::failure(None, &error.to_rpc_error());
					if let Err(error) = codec.write(&Response::Single(envelope)).await {
						debug!(connection = connection.id, "Failed to report read error: {error}");
					}
					break;
				},
			};

			if !self.is_running() {
				result = codec
					.write(&shutdown_response(&batch))
					.await
					.map_err(ServeError::from);
				break;
			}

			if single_shot {
				handle_batch(self.registry.clone(), codec.clone(), batch, context.clone()).await;
				break;
			}

			tracker.spawn(
				handle_batch(self.registry.clone(), codec.clone(), batch, context.clone())
					.in_current_span(),
			);
		}

		tracker.close();
		tracker.wait().await;
		debug!(connection = connection.id, "Connection done");
		result
	}

	/// Stops accepting batches, waits for the grace period, then force-closes every open codec.
	///
	/// Only the first call does anything.
	pub async fn stop(&self) {
		let draining = self.state.compare_exchange(
			ServerState::Running as u8,
			ServerState::Draining as u8,
			Ordering::SeqCst,
			Ordering::SeqCst,
		);
		if draining.is_err() {
			return;
		}
		info!(grace_period = ?self.grace_period, "RPC server is draining");
		tokio::time::sleep(self.grace_period).await;

		let codecs = match self.connections.lock() {
			Ok(connections) => connections.values().cloned().collect::<Vec<_>>(),
			Err(_) => vec![],
		};
		for codec in &codecs {
			codec.close().await;
		}
		self.state.store(ServerState::Closed as u8, Ordering::SeqCst);
		info!(closed = codecs.len(), "RPC server stopped");
	}
}
