use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayer_config::ConfigLoader;
use relayer_core::RelayerBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;

#[derive(Parser)]
#[command(name = "streams-relayer")]
#[command(about = "Relays data streams reports on-chain", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/relayer.toml")]
	config: PathBuf,

	#[arg(long, env = "RELAYER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the relayer
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting streams relayer");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Relayer name: {}", config.relayer.name);
	info!("HTTP port: {}", config.relayer.http_port);

	let port = config.relayer.http_port;
	let engine = RelayerBuilder::new(config)
		.with_storage_factory(relayer_storage::create_storage)
		.with_account_factory(relayer_account::create_account)
		.build()
		.context("Failed to build relayer")?;
	let engine = Arc::new(engine);

	engine.start().await.context("Failed to start relayer")?;

	let http_engine = engine.clone();
	let http_handle = tokio::spawn(async move { api::start_http_server(http_engine, port).await });

	setup_shutdown_signal().await;
	info!("Shutdown signal received, stopping services...");

	engine.shutdown();
	http_handle.abort();

	info!("Streams relayer stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Relayer name: {}", config.relayer.name);
	for feed in &config.feeds {
		info!("  Feed: {} ({})", feed.name, feed.feed_id);
	}
	for chain in config.targets.keys() {
		info!("  Target: {}", chain);
	}

	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
