//! Configuration file layout.

use crate::serde_helpers::deserialize_decimal;
use relayer_executor::TargetConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub relayer: RelayerConfig,
	/// Storage backend block, handed to the storage factory.
	#[serde(default = "empty_table")]
	pub storage: toml::Value,
	/// Signing identities, handed to the account factory.
	#[serde(default = "empty_table")]
	pub account: toml::Value,
	/// Initial values for the live settings.
	#[serde(default)]
	pub settings: SettingsConfig,
	/// EVM chains keyed by decimal chain id.
	#[serde(default = "empty_table")]
	pub chains: toml::Value,
	/// Solana clusters keyed by name.
	#[serde(default = "empty_table")]
	pub clusters: toml::Value,
	#[serde(default)]
	pub feeds: Vec<FeedConfig>,
	/// Write target per chain id or cluster name.
	#[serde(default)]
	pub targets: HashMap<String, TargetConfig>,
	#[serde(default)]
	pub contracts: Vec<ContractConfig>,
	#[serde(default)]
	pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayerConfig {
	#[serde(default = "default_name")]
	pub name: String,
	#[serde(default = "default_http_port")]
	pub http_port: u16,
	#[serde(default = "default_log_level")]
	pub log_level: String,
	/// Capacity of the event bus.
	#[serde(default = "default_event_capacity")]
	pub event_capacity: usize,
}

fn default_name() -> String {
	"streams-relayer".to_string()
}

fn default_http_port() -> u16 {
	8080
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_event_capacity() -> usize {
	1000
}

/// Seed values for the settings kept in storage. Only written when the
/// setting has never been stored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SettingsConfig {
	/// Six-field cron expression (with seconds) shared by every feed timer.
	pub interval: Option<String>,
	/// Minimum absolute price change worth a write, in report units.
	#[serde(default, deserialize_with = "deserialize_decimal")]
	pub price_delta: Option<String>,
	/// Ceiling for any single estimate, in the smallest native unit.
	#[serde(default, deserialize_with = "deserialize_decimal")]
	pub gas_cap: Option<String>,
	/// Active EVM chain.
	pub chain_id: Option<u64>,
	/// Active Solana cluster.
	pub cluster: Option<String>,
	/// Active family: `evm` or `solana`.
	pub family: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
	pub feed_id: String,
	pub name: String,
}

/// Destination contract or program of one feed on one chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractConfig {
	pub feed_id: String,
	/// Chain id or cluster name.
	pub chain: String,
	pub address: String,
	/// Extra instruction accounts, Solana only.
	#[serde(default)]
	pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	pub address: String,
	#[serde(default)]
	pub writable: bool,
	#[serde(default)]
	pub signer: bool,
}

/// Retry policy for dispatch jobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	/// How long to wait for a receipt before giving up on a transaction.
	#[serde(default = "default_receipt_timeout_secs")]
	pub receipt_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
	3
}

fn default_initial_backoff_ms() -> u64 {
	500
}

fn default_max_backoff_ms() -> u64 {
	10_000
}

fn default_receipt_timeout_secs() -> u64 {
	300
}

impl Default for DispatchConfig {
	fn default() -> Self {
		Self {
			max_retries: default_max_retries(),
			initial_backoff_ms: default_initial_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
			receipt_timeout_secs: default_receipt_timeout_secs(),
		}
	}
}
