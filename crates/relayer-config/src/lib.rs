//! Configuration loading for the streams relayer.
//!
//! The file format follows the extension (`.toml`, `.json`, `.yaml`/`.yml`).
//! `${VAR}` references are substituted from the environment before parsing,
//! and a handful of `RELAYER_`-prefixed variables override individual
//! values afterwards.

use cron::Schedule;
use regex::Regex;
use relayer_types::FeedId;
use std::env;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

mod serde_helpers;
pub mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "RELAYER_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let Some(file_path) = &self.file_path else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		let content = tokio::fs::read_to_string(file_path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ConfigError::FileNotFound(file_path.clone())
			} else {
				ConfigError::IoError(e)
			}
		})?;

		let substituted = self.substitute_env_vars(&content)?;
		let extension = Path::new(file_path)
			.extension()
			.and_then(|s| s.to_str())
			.unwrap_or("toml");
		let mut config = parse(&substituted, extension)?;

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		tracing::debug!(path = %file_path, "Configuration loaded");
		Ok(config)
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		// Find and replace ${VAR_NAME} patterns
		let re = Regex::new(r"\$\{([^}]+)\}")
			.map_err(|e| ConfigError::ParseError(e.to_string()))?;

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		let var = |name: &str| env::var(format!("{}{}", self.env_prefix, name)).ok();

		if let Some(log_level) = var("LOG_LEVEL") {
			config.relayer.log_level = log_level;
		}

		if let Some(http_port) = var("HTTP_PORT") {
			config.relayer.http_port = http_port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Some(key) = var("EVM_PRIVATE_KEY") {
			tracing::debug!("Overriding EVM private key from environment");
			set_nested(&mut config.account, &["evm", "private_key"], key)?;
		}

		if let Some(keypair) = var("SOLANA_KEYPAIR") {
			tracing::debug!("Overriding Solana keypair from environment");
			set_nested(&mut config.account, &["solana", "keypair"], keypair)?;
		}

		Ok(())
	}
}

/// Parses configuration text in the format named by `extension`.
pub fn parse(content: &str, extension: &str) -> Result<Config, ConfigError> {
	match extension {
		"toml" => toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string())),
		"json" => serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string())),
		"yaml" | "yml" => {
			serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
		},
		other => Err(ConfigError::ParseError(format!(
			"Unsupported config format: {}",
			other
		))),
	}
}

fn set_nested(root: &mut toml::Value, path: &[&str], value: String) -> Result<(), ConfigError> {
	let mut current = root;
	for (i, segment) in path.iter().enumerate() {
		let table = current.as_table_mut().ok_or_else(|| {
			ConfigError::ValidationError(format!("{} is not a table", path[..i].join(".")))
		})?;
		if i == path.len() - 1 {
			table.insert(segment.to_string(), toml::Value::String(value));
			return Ok(());
		}
		current = table
			.entry(segment.to_string())
			.or_insert(toml::Value::Table(toml::map::Map::new()));
	}
	Ok(())
}

/// Checks what can be checked without touching storage or the network.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
	let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

	if config.relayer.http_port == 0 {
		return invalid("http_port must be non-zero".into());
	}

	let settings = &config.settings;
	if let Some(interval) = &settings.interval {
		if let Err(e) = Schedule::from_str(interval) {
			return invalid(format!("Invalid interval {:?}: {}", interval, e));
		}
	}
	if let Some(delta) = &settings.price_delta {
		if delta.parse::<u128>().is_err() {
			return invalid(format!("price_delta must be a non-negative integer, got {}", delta));
		}
	}
	if let Some(cap) = &settings.gas_cap {
		if cap.parse::<u128>().is_err() {
			return invalid(format!("gas_cap must be a non-negative integer, got {}", cap));
		}
	}
	if let Some(family) = &settings.family {
		if !matches!(family.to_ascii_lowercase().as_str(), "evm" | "solana") {
			return invalid(format!("Unknown chain family: {}", family));
		}
	}

	for feed in &config.feeds {
		if let Err(e) = FeedId::from_str(&feed.feed_id) {
			return invalid(format!("Feed {}: {}", feed.name, e));
		}
	}

	for (chain, target) in &config.targets {
		if let Err(e) = target.fields() {
			return invalid(format!("Target for {}: {}", chain, e));
		}
	}

	for contract in &config.contracts {
		if let Err(e) = FeedId::from_str(&contract.feed_id) {
			return invalid(format!("Contract on {}: {}", contract.chain, e));
		}
		if contract.address.is_empty() {
			return invalid(format!("Contract for {} has no address", contract.feed_id));
		}
	}

	if config.dispatch.initial_backoff_ms == 0 {
		return invalid("initial_backoff_ms must be non-zero".into());
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const FEED: &str = "0x000359843a543ee2fe414dc14c7e7920ef10f4372990b79d6361cdc0dd1ba782";

	fn sample() -> String {
		format!(
			r#"
[relayer]
name = "test-relayer"
http_port = 9000

[storage]
backend = "memory"

[settings]
interval = "*/30 * * * * *"
price_delta = 1000000000000000000
gas_cap = "50000000000000000000"
chain_id = 421614
family = "evm"

[[feeds]]
feed_id = "{FEED}"
name = "ETH/USD"

[targets.421614]
abi = "function updatePrice(bytes32,int192)"
function_name = "updatePrice"
function_args = ["feedId", "price"]

[[contracts]]
feed_id = "{FEED}"
chain = "421614"
address = "0x1111111111111111111111111111111111111111"
"#
		)
	}

	#[test]
	fn test_parse_toml() {
		let config = parse(&sample(), "toml").unwrap();
		assert_eq!(config.relayer.name, "test-relayer");
		assert_eq!(config.settings.price_delta.as_deref(), Some("1000000000000000000"));
		assert_eq!(config.settings.gas_cap.as_deref(), Some("50000000000000000000"));
		assert_eq!(config.feeds.len(), 1);
		assert_eq!(config.targets["421614"].function_args, vec!["feedId", "price"]);
		assert_eq!(config.dispatch.max_retries, 3);
		assert!(validate_config(&config).is_ok());
	}

	#[test]
	fn test_parse_json() {
		let json = r#"{"relayer": {"http_port": 8181}, "settings": {"price_delta": 5}}"#;
		let config = parse(json, "json").unwrap();
		assert_eq!(config.relayer.http_port, 8181);
		assert_eq!(config.relayer.log_level, "info");
		assert_eq!(config.settings.price_delta.as_deref(), Some("5"));
	}

	#[test]
	fn test_validation_failures() {
		let mut config = parse(&sample(), "toml").unwrap();
		config.settings.interval = Some("every minute".into());
		assert!(matches!(
			validate_config(&config),
			Err(ConfigError::ValidationError(_))
		));

		let mut config = parse(&sample(), "toml").unwrap();
		config
			.targets
			.get_mut("421614")
			.unwrap()
			.function_args
			.push("volume".into());
		assert!(validate_config(&config).is_err());

		let mut config = parse(&sample(), "toml").unwrap();
		config.feeds[0].feed_id = "0x1234".into();
		assert!(validate_config(&config).is_err());
	}

	#[test]
	fn test_set_nested_creates_tables() {
		let mut root = toml::Value::Table(toml::map::Map::new());
		set_nested(&mut root, &["evm", "private_key"], "0xabc".into()).unwrap();
		assert_eq!(root["evm"]["private_key"].as_str(), Some("0xabc"));
	}

	#[tokio::test]
	async fn test_load_with_substitution() {
		env::set_var("RELAYER_TEST_SUBST_PORT", "9123");
		let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
		write!(file, "[relayer]\nhttp_port = ${{RELAYER_TEST_SUBST_PORT}}\n").unwrap();

		let config = ConfigLoader::new()
			.with_env_prefix("RELAYER_TEST_UNUSED_")
			.with_file(file.path())
			.load()
			.await
			.unwrap();
		assert_eq!(config.relayer.http_port, 9123);

		let missing = ConfigLoader::new().with_file("/nonexistent/relayer.toml").load().await;
		assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));
	}
}
