use clap::{command, Parser};
use tracing::Level;

#[derive(Parser)]
#[command(version)]
pub struct CliOpts {
	/// Path to the toml configuration file
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<String>,
	/// HTTP server host name
	#[arg(long)]
	pub http_server_host: Option<String>,
	/// HTTP port
	#[arg(long)]
	pub http_server_port: Option<u16>,
	/// Enables the newline delimited JSON over TCP listener on this port
	#[arg(long)]
	pub tcp_server_port: Option<u16>,
	/// Engine API endpoint of the execution layer
	#[arg(long, value_name = "URL")]
	pub engine_url: Option<String>,
	/// Log level
	#[arg(long)]
	pub verbosity: Option<Level>,
	/// Set logs format to JSON
	#[arg(long)]
	pub logs_json: bool,
}
