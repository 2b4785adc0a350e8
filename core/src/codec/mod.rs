//! Wire codec: turns bytes into [`Batch`]es of requests and [`Response`]s back into bytes.
//!
//! Parameters are not decoded here. They stay raw until the target method is resolved and its
//! argument types are known.

use async_trait::async_trait;
use futures::StreamExt;
use std::{
	io,
	mem,
	sync::atomic::{AtomicBool, Ordering},
};
use thiserror::Error;
use tokio::{
	io::{AsyncRead, AsyncWrite, AsyncWriteExt},
	sync::Mutex,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, trace};

use crate::errors::RpcError;

mod framing;
mod message;

pub use framing::{FrameError, JsonFrames, DEFAULT_MAX_MESSAGE_SIZE};
pub use message::{
	is_batch, parse_message, Batch, Envelope, Incoming, Request, RequestId, Response,
	JSONRPC_VERSION,
};

#[derive(Debug, Error)]
pub enum ReadError {
	/// Peer finished sending.
	#[error("EOF")]
	Eof,
	/// Codec was closed locally while waiting for input.
	#[error("codec closed")]
	Closed,
	#[error(transparent)]
	Rejected(RpcError),
	#[error(transparent)]
	Io(io::Error),
}

impl ReadError {
	pub fn is_end_of_stream(&self) -> bool {
		matches!(self, ReadError::Eof | ReadError::Closed)
	}

	/// Error reported to the peer before the connection is torn down.
	pub fn to_rpc_error(&self) -> RpcError {
		match self {
			ReadError::Rejected(error) => error.clone(),
			other => RpcError::invalid_request(other.to_string()),
		}
	}
}

impl From<FrameError> for ReadError {
	fn from(error: FrameError) -> Self {
		match error {
			FrameError::Io(error) => ReadError::Io(error),
			FrameError::Syntax(error) => ReadError::Rejected(RpcError::invalid_message(error.to_string())),
			other => ReadError::Rejected(RpcError::invalid_request(other.to_string())),
		}
	}
}

/// Server side of one RPC session.
///
/// Implementations are shared between the serving loop and the tasks it spawns, so every
/// method takes `&self`.
#[async_trait]
pub trait ServerCodec: Send + Sync {
	/// Reads the next message and splits it into requests.
	async fn read_batch(&self) -> Result<Batch, ReadError>;

	async fn write(&self, response: &Response) -> io::Result<()>;

	/// Closes the underlying stream. Returns `true` only for the call that actually closed it.
	async fn close(&self) -> bool;

	fn is_closed(&self) -> bool;

	/// Token cancelled once the codec is closed.
	fn closed(&self) -> CancellationToken;
}

/// Newline delimited JSON over any async byte stream.
pub struct JsonCodec<R, W> {
	reader: Mutex<FramedRead<R, JsonFrames>>,
	writer: Mutex<W>,
	closed: AtomicBool,
	cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> JsonCodec<R, W> {
	pub fn new(reader: R, writer: W) -> Self {
		Self::with_max_message_size(reader, writer, DEFAULT_MAX_MESSAGE_SIZE)
	}

	pub fn with_max_message_size(reader: R, writer: W, max_size: usize) -> Self {
		Self {
			reader: Mutex::new(FramedRead::new(reader, JsonFrames::new(max_size))),
			writer: Mutex::new(writer),
			closed: AtomicBool::new(false),
			cancel: CancellationToken::new(),
		}
	}

	/// Takes everything written so far, leaving an empty writer behind.
	pub async fn take_output(&self) -> W
	where
		W: Default,
	{
		mem::take(&mut *self.writer.lock().await)
	}
}

#[async_trait]
impl<R, W> ServerCodec for JsonCodec<R, W>
where
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	async fn read_batch(&self) -> Result<Batch, ReadError> {
		if self.is_closed() {
			return Err(ReadError::Closed);
		}
		let mut reader = self.reader.lock().await;
		let frame = tokio::select! {
			_ = self.cancel.cancelled() => return Err(ReadError::Closed),
			frame = reader.next() => frame,
		};

		let message = match frame {
			None => return Err(ReadError::Eof),
			Some(frame) => frame?,
		};
		trace!(size = message.len(), "Received message");
		parse_message(&message).map_err(ReadError::Rejected)
	}

	async fn write(&self, response: &Response) -> io::Result<()> {
		let mut payload = serde_json::to_vec(response)?;
		payload.push(b'\n');

		let mut writer = self.writer.lock().await;
		if self.is_closed() {
			return Err(io::ErrorKind::BrokenPipe.into());
		}
		tokio::select! {
			_ = self.cancel.cancelled() => Err(io::ErrorKind::BrokenPipe.into()),
			result = async {
				writer.write_all(&payload).await?;
				writer.flush().await
			} => result,
		}
	}

	async fn close(&self) -> bool {
		if self.closed.swap(true, Ordering::SeqCst) {
			return false;
		}
		self.cancel.cancel();
		if let Err(error) = self.writer.lock().await.shutdown().await {
			debug!("Error shutting down codec writer: {error}");
		}
		true
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn closed(&self) -> CancellationToken {
		self.cancel.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::{io::Cursor, sync::Arc};
	use tokio::io::{duplex, AsyncReadExt};

	fn in_memory(input: &str) -> JsonCodec<Cursor<Vec<u8>>, Vec<u8>> {
		JsonCodec::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
	}

	#[tokio::test]
	async fn reads_messages_until_eof() {
		let codec = in_memory(
			r#"{"method":"tx_newBlock","id":1} [{"method":"test_echo","id":2},{"method":"test_version","id":3}]"#,
		);

		let first = codec.read_batch().await.unwrap();
		assert!(!first.is_batch);
		assert_eq!(first.items.len(), 1);

		let second = codec.read_batch().await.unwrap();
		assert!(second.is_batch);
		assert_eq!(second.items.len(), 2);

		assert!(matches!(codec.read_batch().await, Err(ReadError::Eof)));
	}

	#[tokio::test]
	async fn malformed_json_is_rejected() {
		let codec = in_memory("{\"method\":}");
		let error = codec.read_batch().await.unwrap_err();
		assert!(!error.is_end_of_stream());
		assert_eq!(error.to_rpc_error().code, -32700);
	}

	#[tokio::test]
	async fn writes_newline_terminated_json() {
		let codec = in_memory("");
		let response = Response::Single(Envelope::success(None, json!("success")));
		codec.write(&response).await.unwrap();

		let output = codec.take_output().await;
		assert_eq!(
			String::from_utf8(output).unwrap(),
			"{\"jsonrpc\":\"2.0\",\"code\":0,\"message\":\"SUCCESS\",\"result\":\"success\"}\n"
		);
	}

	#[tokio::test]
	async fn close_happens_once() {
		let codec = Arc::new(in_memory(""));
		let closes = (0..8).map(|_| {
			let codec = codec.clone();
			tokio::spawn(async move { codec.close().await })
		});
		let results = futures::future::join_all(closes).await;
		let closed = results.into_iter().filter(|result| *result.as_ref().unwrap()).count();
		assert_eq!(closed, 1);
		assert!(codec.is_closed());
		assert!(codec.closed().is_cancelled());
	}

	#[tokio::test]
	async fn close_unblocks_pending_read() {
		let (_client, server) = duplex(64);
		let (read, write) = tokio::io::split(server);
		let codec = Arc::new(JsonCodec::new(read, write));

		let pending = tokio::spawn({
			let codec = codec.clone();
			async move { codec.read_batch().await }
		});
		tokio::task::yield_now().await;
		assert!(codec.close().await);

		let result = pending.await.unwrap();
		assert!(matches!(result, Err(ReadError::Closed)));
	}

	#[tokio::test]
	async fn write_after_close_fails() {
		let (mut client, server) = duplex(1024);
		let (read, write) = tokio::io::split(server);
		let codec = JsonCodec::new(read, write);
		codec.close().await;

		let response = Response::Single(Envelope::success(None, json!(1)));
		let error = codec.write(&response).await.unwrap_err();
		assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);

		let mut buffer = vec![];
		client.read_to_end(&mut buffer).await.unwrap();
		assert!(buffer.is_empty());
	}
}
