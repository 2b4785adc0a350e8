use clap::Parser;
use cli::CliOpts;
use color_eyre::{
	eyre::{eyre, WrapErr},
	Result,
};
use config::RuntimeConfig;
use msequencer_core::{
	api::{self, engine::EngineClient},
	errors::validate_codes,
	http,
	registry::ServiceRegistry,
	server::RpcServer,
	shutdown::Controller,
	tcp,
	utils::{default_subscriber, install_panic_hooks, json_subscriber, spawn_in_span},
};
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tracing::{debug, error, info, span, Level};
use uuid::Uuid;

mod cli;
mod config;

const USER_SIGNAL: &str = "User signaled shutdown";

async fn run(cfg: RuntimeConfig, shutdown: Controller<String>) -> Result<()> {
	let version = clap::crate_version!();
	info!(version, "Running {}", clap::crate_name!());
	info!("Using config: {:?}", cfg);

	let engine = Arc::new(EngineClient::new(&cfg.api.engine_url));
	let mut registry = ServiceRegistry::new();
	registry
		.register_all(api::services(&cfg.api, engine))
		.wrap_err("Unable to register RPC services")?;
	for service in registry.services() {
		debug!(service = %service.name, methods = ?service.methods, "Exposed methods");
	}

	let rpc = Arc::new(RpcServer::new(
		Arc::new(registry),
		cfg.shutdown_grace_period,
	));

	let http_server = http::Server {
		rpc: rpc.clone(),
		config: cfg.http.clone(),
		shutdown: shutdown.clone(),
	};
	spawn_in_span(shutdown.with_delay(http_server.bind()?)?);

	if let Some(port) = cfg.tcp_server_port {
		let host = &cfg.http.http_server_host;
		let addr = SocketAddr::from_str(&format!("{host}:{port}"))
			.wrap_err("Unable to parse TCP server address from config")?;
		let tcp_server = tcp::Server::bind(
			rpc.clone(),
			addr,
			cfg.http.max_request_size,
			shutdown.clone(),
		)
		.await?;
		spawn_in_span(tcp_server.run());
	}

	// Drain open sessions once the shutdown is triggered
	let triggered = shutdown.triggered_shutdown();
	spawn_in_span(shutdown.with_delay(async move {
		let reason = triggered.await;
		info!("Stopping RPC server: {reason}");
		rpc.stop().await;
	})?);

	Ok(())
}

pub fn load_runtime_config(opts: &CliOpts) -> Result<RuntimeConfig> {
	let mut cfg = if let Some(cfg_path) = &opts.config {
		confy::load_path(cfg_path)
			.wrap_err(format!("Failed to load configuration from: {cfg_path}"))?
	} else {
		RuntimeConfig::default()
	};

	cfg.log_format_json = opts.logs_json || cfg.log_format_json;
	cfg.log_level = opts.verbosity.unwrap_or(cfg.log_level);

	if let Some(http_host) = opts.http_server_host.clone() {
		cfg.http.http_server_host = http_host;
	}

	if let Some(http_port) = opts.http_server_port {
		cfg.http.http_server_port = http_port;
	}

	if let Some(tcp_port) = opts.tcp_server_port {
		cfg.tcp_server_port = Some(tcp_port);
	}

	if let Some(engine_url) = &opts.engine_url {
		cfg.api.engine_url = engine_url.clone();
	}

	Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
	let shutdown = Controller::new();
	let opts = CliOpts::parse();
	let cfg = load_runtime_config(&opts)?;

	if cfg.log_format_json {
		tracing::subscriber::set_global_default(json_subscriber(cfg.log_level))?;
	} else {
		tracing::subscriber::set_global_default(default_subscriber(cfg.log_level))?;
	};

	install_panic_hooks(shutdown.clone())?;
	validate_codes().wrap_err("Refusing to start with an invalid error code table")?;

	let execution_id = Uuid::new_v4();
	let span = span!(Level::INFO, "run", execution_id = execution_id.to_string());
	// Do not enter span if logs format is not JSON
	let _enter = if cfg.log_format_json {
		Some(span.enter())
	} else {
		None
	};

	// spawn a task to watch for ctrl-c signals from user to trigger the shutdown
	spawn_in_span(shutdown.on_user_signal(USER_SIGNAL.to_string()));

	if let Err(error) = run(cfg, shutdown.clone()).await {
		error!("{error:#}");
		return Err(error.wrap_err("Starting sequencer failed"));
	};

	let reason = shutdown.completed_shutdown().await;
	if reason == USER_SIGNAL {
		info!("Sequencer stopped");
		return Ok(());
	}

	// we are not logging error here since expectation is
	// to log terminating condition before sending message to this channel
	Err(eyre!(reason).wrap_err("Running sequencer encountered an error"))
}
