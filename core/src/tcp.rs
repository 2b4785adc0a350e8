//! Newline delimited JSON over TCP, one persistent session per connection.

use color_eyre::{eyre::WrapErr, Result};
use std::{fmt::Display, future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::{
	codec::JsonCodec,
	server::{RpcServer, ServeError},
	shutdown::Controller,
	utils::spawn_in_span,
};

/// Pause after a failed accept, errors like EMFILE persist for a while.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Calls `accept` until it succeeds, sleeping after every failure.
async fn accept_next<T, E, F, Fut>(mut accept: F) -> T
where
	E: Display,
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
{
	loop {
		match accept().await {
			Ok(accepted) => return accepted,
			Err(error) => {
				warn!("Failed to accept TCP connection: {error}");
				tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
			},
		}
	}
}

pub struct Server {
	pub rpc: Arc<RpcServer>,
	pub listener: TcpListener,
	pub max_message_size: usize,
	pub shutdown: Controller<String>,
}

impl Server {
	pub async fn bind(
		rpc: Arc<RpcServer>,
		addr: SocketAddr,
		max_message_size: usize,
		shutdown: Controller<String>,
	) -> Result<Self> {
		let listener = TcpListener::bind(addr)
			.await
			.wrap_err_with(|| format!("Unable to bind TCP server to {addr}"))?;
		info!("RPC running on tcp://{}", listener.local_addr()?);
		Ok(Self {
			rpc,
			listener,
			max_message_size,
			shutdown,
		})
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	/// Accepts connections until shutdown is triggered.
	///
	/// Open sessions outlive this loop, they are drained and closed by [`RpcServer::stop`].
	pub async fn run(self) {
		let accept = async {
			loop {
				let (stream, peer) = accept_next(|| self.listener.accept()).await;
				debug!(%peer, "Accepted TCP connection");
				let (read, write) = stream.into_split();
				let codec = Arc::new(JsonCodec::with_max_message_size(
					read,
					write,
					self.max_message_size,
				));
				let rpc = self.rpc.clone();
				spawn_in_span(async move {
					match rpc.serve_codec(codec).await {
						Ok(()) | Err(ServeError::ShuttingDown) => {},
						Err(error) => debug!(%peer, "TCP session ended: {error}"),
					}
				});
			}
		};

		if let Err(reason) = self.shutdown.with_cancel(accept).await {
			info!("TCP server stopped accepting connections: {reason}");
		}
	}
}
