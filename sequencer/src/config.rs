use msequencer_core::{
	api::ApiConfig,
	http::HttpConfig,
	server::DEFAULT_SHUTDOWN_GRACE_PERIOD,
	types::{duration_seconds_format, tracing_level_format},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::Level;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
	#[serde(flatten)]
	pub http: HttpConfig,
	/// Port of the newline delimited JSON over TCP listener, bound on the HTTP host (default: disabled).
	pub tcp_server_port: Option<u16>,
	/// Time given to in-flight requests once the shutdown starts (default: 3 seconds).
	#[serde(with = "duration_seconds_format")]
	pub shutdown_grace_period: Duration,
	/// Log level, default is `INFO`. See `<https://docs.rs/log/0.4.14/log/enum.LevelFilter.html>` for possible log level values. (default: `INFO`).
	#[serde(with = "tracing_level_format")]
	pub log_level: Level,
	/// If set to true, logs are displayed in JSON format, which is used for structured logging. Otherwise, plain text format is used (default: false).
	pub log_format_json: bool,
	#[serde(flatten)]
	pub api: ApiConfig,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		RuntimeConfig {
			http: HttpConfig::default(),
			tcp_server_port: None,
			shutdown_grace_period: DEFAULT_SHUTDOWN_GRACE_PERIOD,
			log_level: Level::INFO,
			log_format_json: false,
			api: ApiConfig::default(),
		}
	}
}
