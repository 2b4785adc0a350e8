//! HTTP transport.
//!
//! # Endpoints
//!
//! * `POST /` - one JSON-RPC message (single request or batch) per HTTP request
//! * `GET|HEAD /health` - liveness check

use bytes::{Buf, BufMut, Bytes, BytesMut};
use color_eyre::{eyre::WrapErr, Result};
use futures::{pin_mut, Future, FutureExt, Stream, TryStreamExt};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::{io::Cursor, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use warp::{reject::Reject, reply::Response as HttpResponse, Filter, Rejection, Reply};

use crate::{
	codec::{Envelope, JsonCodec, Response, ServerCodec, DEFAULT_MAX_MESSAGE_SIZE},
	errors::RpcError,
	server::{RpcServer, ServeError},
	shutdown::Controller,
	types::duration_seconds_format,
};

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct HttpConfig {
	/// HTTP server host name (default: 0.0.0.0).
	pub http_server_host: String,
	/// HTTP server port (default: 8888).
	pub http_server_port: u16,
	/// Largest accepted request body in bytes (default: 8 MiB).
	pub max_request_size: usize,
	/// Time allowed for one request before it is answered with 408 (default: 360 seconds).
	#[serde(with = "duration_seconds_format")]
	pub request_timeout: Duration,
}

impl Default for HttpConfig {
	fn default() -> Self {
		Self {
			http_server_host: "0.0.0.0".to_owned(),
			http_server_port: 8888,
			max_request_size: DEFAULT_MAX_MESSAGE_SIZE,
			request_timeout: Duration::from_secs(360),
		}
	}
}

#[derive(Debug)]
struct PayloadTooLarge {
	length: u64,
	max: u64,
}

impl Reject for PayloadTooLarge {}

fn too_large(length: u64, max: u64) -> HttpResponse {
	warp::reply::with_status(
		format!("content length too large ({length}>{max})"),
		StatusCode::PAYLOAD_TOO_LARGE,
	)
	.into_response()
}

fn json_reply(body: Vec<u8>) -> HttpResponse {
	warp::reply::with_header(body, "content-type", "application/json").into_response()
}

fn shutdown_reply() -> HttpResponse {
	let response = Response::Single(Envelope::failure(None, &RpcError::shutdown()));
	match serde_json::to_vec(&response) {
		Ok(body) => json_reply(body),
		Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
	}
}

/// Rejects declared oversize bodies before they are read.
fn content_length_check(max: u64) -> impl Filter<Extract = (), Error = Rejection> + Clone {
	warp::header::optional::<u64>("content-length")
		.and_then(move |length: Option<u64>| async move {
			match length {
				Some(length) if length > max => {
					Err(warp::reject::custom(PayloadTooLarge { length, max }))
				},
				_ => Ok(()),
			}
		})
		.untuple_one()
}

enum Body {
	Complete(Bytes),
	/// Read up to the chunk that took it past the limit.
	TooLarge(usize),
}

/// Reads the request body, giving up as soon as it grows past `max_size`.
async fn read_body<S, B>(body: S, max_size: usize) -> Result<Body, warp::Error>
where
	S: Stream<Item = Result<B, warp::Error>>,
	B: Buf,
{
	pin_mut!(body);
	let mut buffer = BytesMut::new();
	while let Some(chunk) = body.try_next().await? {
		let length = buffer.len() + chunk.remaining();
		if length > max_size {
			return Ok(Body::TooLarge(length));
		}
		buffer.put(chunk);
	}
	Ok(Body::Complete(buffer.freeze()))
}

async fn handle_rpc<S, B>(
	server: Arc<RpcServer>,
	body: S,
	max_size: usize,
	request_timeout: Duration,
) -> HttpResponse
where
	S: Stream<Item = Result<B, warp::Error>>,
	B: Buf,
{
	// Bodies sent without a declared length are cut off once they pass the limit
	let body = match read_body(body, max_size).await {
		Ok(Body::Complete(body)) => body,
		Ok(Body::TooLarge(length)) => return too_large(length as u64, max_size as u64),
		Err(error) => {
			debug!("Failed to read HTTP request body: {error}");
			return StatusCode::BAD_REQUEST.into_response();
		},
	};
	if !server.is_running() {
		return shutdown_reply();
	}

	let codec = Arc::new(JsonCodec::with_max_message_size(
		Cursor::new(body),
		Vec::new(),
		max_size,
	));
	let served = tokio::time::timeout(request_timeout, server.serve_single_request(codec.clone()));
	match served.await {
		Ok(Ok(())) => {},
		Ok(Err(ServeError::ShuttingDown)) => return shutdown_reply(),
		Ok(Err(error)) => {
			warn!("Failed to serve HTTP request: {error}");
			return StatusCode::INTERNAL_SERVER_ERROR.into_response();
		},
		Err(_) => {
			debug!(timeout = ?request_timeout, "HTTP request timed out");
			codec.close().await;
			return warp::reply::with_status("request timed out", StatusCode::REQUEST_TIMEOUT)
				.into_response();
		},
	}

	json_reply(codec.take_output().await)
}

fn health_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
	warp::head()
		.or(warp::get())
		.and(warp::path("health"))
		.and(warp::path::end())
		.map(|_| warp::reply::with_status("", StatusCode::OK))
}

fn rpc_route(
	server: Arc<RpcServer>,
	config: &HttpConfig,
) -> impl Filter<Extract = (HttpResponse,), Error = Rejection> + Clone {
	let max_size = config.max_request_size;
	let request_timeout = config.request_timeout;
	warp::path::end()
		.and(warp::post())
		.and(content_length_check(max_size as u64))
		.and(warp::body::stream())
		.and(warp::any().map(move || server.clone()))
		.then(move |body, server: Arc<RpcServer>| {
			handle_rpc(server, body, max_size, request_timeout)
		})
}

async fn handle_rejection(error: Rejection) -> Result<HttpResponse, Rejection> {
	if let Some(PayloadTooLarge { length, max }) = error.find::<PayloadTooLarge>() {
		return Ok(too_large(*length, *max));
	}
	Err(error)
}

pub fn routes(
	server: Arc<RpcServer>,
	config: &HttpConfig,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
	let cors = warp::cors()
		.allow_any_origin()
		.allow_headers(vec!["content-type", "accept", "origin", "x-requested-with"])
		.allow_methods(vec!["GET", "POST"])
		.max_age(Duration::from_secs(600));

	health_route()
		.or(rpc_route(server, config))
		.recover(handle_rejection)
		.with(cors)
}

pub struct Server {
	pub rpc: Arc<RpcServer>,
	pub config: HttpConfig,
	pub shutdown: Controller<String>,
}

impl Server {
	/// Binds the listener and returns the future that serves it until shutdown is triggered.
	pub fn bind(self) -> Result<impl Future<Output = ()>> {
		let host = &self.config.http_server_host;
		let port = self.config.http_server_port;
		let addr = SocketAddr::from_str(&format!("{host}:{port}"))
			.wrap_err("Unable to parse host address from config")?;

		// warp graceful shutdown expects a signal that is [`Future<Output = ()>`]
		let shutdown_signal = self.shutdown.triggered_shutdown().map(|_| ());
		let (addr, server) = warp::serve(routes(self.rpc, &self.config))
			.try_bind_with_graceful_shutdown(addr, shutdown_signal)
			.wrap_err("Unable to bind HTTP server")?;
		info!("RPC running on http://{addr}");
		Ok(server)
	}
}
