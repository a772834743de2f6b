//! Chain client resolution.
//!
//! Maps an EVM chain id or a Solana cluster name to its connection settings
//! and contract addresses, and hands out a [`DeliveryService`] bound to the
//! relayer's signing identity for that family. Clients are built on first
//! use and reused afterwards; the configuration they were built from never
//! changes while the process runs.

use alloy::primitives::Address as AlloyAddress;
use dashmap::DashMap;
use relayer_account::{AccountError, AccountService};
use relayer_delivery::{
	implementations::{evm::alloy::AlloyDelivery, solana::SolanaDelivery},
	DeliveryError, DeliveryService, GasGuard,
};
use relayer_types::{
	evm_address, http_url, Address, ConfigSchema, Field, FieldType, Schema, ValidationError,
};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
	#[error("No configuration for chain {0}")]
	UnknownChain(u64),
	#[error("No configuration for cluster {0}")]
	UnknownCluster(String),
	#[error("Invalid chain configuration: {0}")]
	Config(String),
	#[error(transparent)]
	Account(#[from] AccountError),
	#[error(transparent)]
	Delivery(#[from] DeliveryError),
}

impl From<ValidationError> for ChainError {
	fn from(e: ValidationError) -> Self {
		ChainError::Config(e.to_string())
	}
}

/// Virtual machine family of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamilyKind {
	/// Account-model chains.
	Evm,
	/// Program-account chains.
	Solana,
}

impl fmt::Display for ChainFamilyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChainFamilyKind::Evm => f.write_str("evm"),
			ChainFamilyKind::Solana => f.write_str("solana"),
		}
	}
}

impl FromStr for ChainFamilyKind {
	type Err = ChainError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"evm" => Ok(ChainFamilyKind::Evm),
			"solana" => Ok(ChainFamilyKind::Solana),
			other => Err(ChainError::Config(format!("Unknown chain family: {}", other))),
		}
	}
}

#[derive(Debug, Clone)]
pub struct EvmChainConfig {
	pub chain_id: u64,
	pub rpc_url: String,
	/// Verifier proxy contract.
	pub verifier_proxy: Address,
	pub confirmations: u64,
}

#[derive(Debug, Clone)]
pub struct SolanaClusterConfig {
	pub name: String,
	pub rpc_url: String,
	pub verifier_program: Address,
	pub access_controller: Address,
}

/// Parses a base58 public key into an [`Address`].
pub fn parse_pubkey(value: &str) -> Result<Address, ChainError> {
	Pubkey::from_str(value)
		.map(|key| Address(key.to_bytes().to_vec()))
		.map_err(|e| ChainError::Config(format!("Invalid public key {}: {}", value, e)))
}

fn parse_evm_address(value: &str) -> Result<Address, ChainError> {
	AlloyAddress::from_str(value)
		.map(Address::from)
		.map_err(|e| ChainError::Config(format!("Invalid address {}: {}", value, e)))
}

fn base58_pubkey(value: &toml::Value) -> Result<(), String> {
	let s = value.as_str().ok_or("Expected string")?;
	Pubkey::from_str(s)
		.map(|_| ())
		.map_err(|e| format!("Invalid public key: {}", e))
}

pub struct EvmChainSchema;

impl ConfigSchema for EvmChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![
			Field::required("rpc_url", FieldType::String).with_validator(http_url),
			Field::required("verifier_proxy", FieldType::String).with_validator(evm_address),
			Field::optional(
				"confirmations",
				FieldType::Integer {
					min: Some(1),
					max: Some(64),
				},
			),
		])
		.validate(config)
	}
}

pub struct SolanaClusterSchema;

impl ConfigSchema for SolanaClusterSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![
			Field::required("rpc_url", FieldType::String).with_validator(http_url),
			Field::required("verifier_program", FieldType::String).with_validator(base58_pubkey),
			Field::required("access_controller", FieldType::String).with_validator(base58_pubkey),
		])
		.validate(config)
	}
}

fn str_field<'a>(config: &'a toml::Value, name: &str) -> Result<&'a str, ChainError> {
	config
		.get(name)
		.and_then(|v| v.as_str())
		.ok_or_else(|| ChainError::Config(format!("{} is required", name)))
}

/// Resolved connection to one destination.
#[derive(Clone)]
pub enum ResolvedChain {
	Evm {
		config: EvmChainConfig,
		delivery: Arc<DeliveryService>,
	},
	Solana {
		config: SolanaClusterConfig,
		delivery: Arc<DeliveryService>,
	},
}

impl ResolvedChain {
	pub fn kind(&self) -> ChainFamilyKind {
		match self {
			ResolvedChain::Evm { .. } => ChainFamilyKind::Evm,
			ResolvedChain::Solana { .. } => ChainFamilyKind::Solana,
		}
	}

	pub fn delivery(&self) -> Arc<DeliveryService> {
		match self {
			ResolvedChain::Evm { delivery, .. } | ResolvedChain::Solana { delivery, .. } => {
				delivery.clone()
			},
		}
	}

	/// Key destination-specific settings are stored under: the decimal
	/// chain id or the cluster name.
	pub fn key(&self) -> String {
		match self {
			ResolvedChain::Evm { config, .. } => config.chain_id.to_string(),
			ResolvedChain::Solana { config, .. } => config.name.clone(),
		}
	}
}

/// Known destinations plus the clients built for them so far.
pub struct ChainRegistry {
	chains: HashMap<u64, EvmChainConfig>,
	clusters: HashMap<String, SolanaClusterConfig>,
	accounts: Arc<AccountService>,
	guard: GasGuard,
	receipt_timeout: Duration,
	evm_clients: DashMap<u64, Arc<DeliveryService>>,
	solana_clients: DashMap<String, Arc<DeliveryService>>,
}

impl ChainRegistry {
	pub fn new(
		chains: Vec<EvmChainConfig>,
		clusters: Vec<SolanaClusterConfig>,
		accounts: Arc<AccountService>,
		guard: GasGuard,
	) -> Self {
		Self {
			chains: chains.into_iter().map(|c| (c.chain_id, c)).collect(),
			clusters: clusters.into_iter().map(|c| (c.name.clone(), c)).collect(),
			accounts,
			guard,
			receipt_timeout: Duration::from_secs(300),
			evm_clients: DashMap::new(),
			solana_clients: DashMap::new(),
		}
	}

	pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
		self.receipt_timeout = timeout;
		self
	}

	pub fn chain_ids(&self) -> Vec<u64> {
		let mut ids: Vec<u64> = self.chains.keys().copied().collect();
		ids.sort_unstable();
		ids
	}

	pub fn cluster_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.clusters.keys().cloned().collect();
		names.sort();
		names
	}

	pub fn resolve_evm(&self, chain_id: u64) -> Result<ResolvedChain, ChainError> {
		let config = self
			.chains
			.get(&chain_id)
			.cloned()
			.ok_or(ChainError::UnknownChain(chain_id))?;

		let cached = self.evm_clients.get(&chain_id).map(|entry| entry.value().clone());
		let delivery = match cached {
			Some(existing) => existing,
			None => {
				let provider = AlloyDelivery::new(
					&config.rpc_url,
					chain_id,
					self.accounts.evm_signer()?,
					config.confirmations,
					self.receipt_timeout,
				)?;
				let delivery = Arc::new(DeliveryService::new(Box::new(provider), self.guard.clone()));
				tracing::debug!(chain_id, rpc_url = %config.rpc_url, "Created EVM client");
				self.evm_clients.insert(chain_id, delivery.clone());
				delivery
			},
		};

		Ok(ResolvedChain::Evm { config, delivery })
	}

	pub fn resolve_solana(&self, cluster: &str) -> Result<ResolvedChain, ChainError> {
		let config = self
			.clusters
			.get(cluster)
			.cloned()
			.ok_or_else(|| ChainError::UnknownCluster(cluster.to_string()))?;

		let cached = self.solana_clients.get(cluster).map(|entry| entry.value().clone());
		let delivery = match cached {
			Some(existing) => existing,
			None => {
				let provider = SolanaDelivery::new(&config.rpc_url, self.accounts.solana_keypair()?);
				let delivery = Arc::new(DeliveryService::new(Box::new(provider), self.guard.clone()));
				tracing::debug!(cluster, rpc_url = %config.rpc_url, "Created Solana client");
				self.solana_clients.insert(cluster.to_string(), delivery.clone());
				delivery
			},
		};

		Ok(ResolvedChain::Solana { config, delivery })
	}
}

/// Parses the `[chains]` table. Keys are decimal chain ids.
pub fn parse_chains(config: Option<&toml::Value>) -> Result<Vec<EvmChainConfig>, ChainError> {
	let Some(table) = config.and_then(|v| v.as_table()) else {
		return Ok(Vec::new());
	};

	let mut chains = Vec::with_capacity(table.len());
	for (key, value) in table {
		let chain_id = key
			.parse::<u64>()
			.map_err(|_| ChainError::Config(format!("Chain key {} is not a chain id", key)))?;
		EvmChainSchema.validate(value)?;

		chains.push(EvmChainConfig {
			chain_id,
			rpc_url: str_field(value, "rpc_url")?.to_string(),
			verifier_proxy: parse_evm_address(str_field(value, "verifier_proxy")?)?,
			confirmations: value
				.get("confirmations")
				.and_then(|v| v.as_integer())
				.unwrap_or(1) as u64,
		});
	}
	Ok(chains)
}

/// Parses the `[clusters]` table. Keys are cluster names.
pub fn parse_clusters(config: Option<&toml::Value>) -> Result<Vec<SolanaClusterConfig>, ChainError> {
	let Some(table) = config.and_then(|v| v.as_table()) else {
		return Ok(Vec::new());
	};

	let mut clusters = Vec::with_capacity(table.len());
	for (name, value) in table {
		SolanaClusterSchema.validate(value)?;
		clusters.push(SolanaClusterConfig {
			name: name.clone(),
			rpc_url: str_field(value, "rpc_url")?.to_string(),
			verifier_program: parse_pubkey(str_field(value, "verifier_program")?)?,
			access_controller: parse_pubkey(str_field(value, "access_controller")?)?,
		});
	}
	Ok(clusters)
}

/// Builds the registry from the `[chains]` and `[clusters]` tables.
pub fn create_registry(
	chains: Option<&toml::Value>,
	clusters: Option<&toml::Value>,
	accounts: Arc<AccountService>,
	guard: GasGuard,
) -> Result<ChainRegistry, ChainError> {
	let registry = ChainRegistry::new(
		parse_chains(chains)?,
		parse_clusters(clusters)?,
		accounts,
		guard,
	);
	tracing::info!(
		chains = ?registry.chain_ids(),
		clusters = ?registry.cluster_names(),
		"Loaded chain registry"
	);
	Ok(registry)
}

#[cfg(test)]
mod tests {
	use super::*;
	use relayer_account::create_account;

	const CONFIG: &str = r#"
[chains.421614]
rpc_url = "https://sepolia-rollup.arbitrum.io/rpc"
verifier_proxy = "0x2ff010DEbC1297f19579B4246cad07bd24F2488A"
confirmations = 2

[clusters.devnet]
rpc_url = "https://api.devnet.solana.com"
verifier_program = "Gt9S41PtjR58CbG9JhJ3J6vxesqrNAswbWYbLNTMZA3c"
access_controller = "2k3DsgwBoqrnvXKVvd7jX7aptNxdcRBdcd5HkYsGgbrb"
"#;

	fn accounts() -> Arc<AccountService> {
		let config: toml::Value = toml::from_str(&format!(
			"[evm]\nprivate_key = \"0x{}\"",
			"11".repeat(32)
		))
		.unwrap();
		Arc::new(create_account(&config).unwrap())
	}

	#[test]
	fn test_parse_tables() {
		let config: toml::Value = toml::from_str(CONFIG).unwrap();
		let chains = parse_chains(config.get("chains")).unwrap();
		let clusters = parse_clusters(config.get("clusters")).unwrap();

		assert_eq!(chains.len(), 1);
		assert_eq!(chains[0].chain_id, 421614);
		assert_eq!(chains[0].confirmations, 2);
		assert_eq!(chains[0].verifier_proxy.0.len(), 20);
		assert_eq!(clusters[0].name, "devnet");
		assert_eq!(clusters[0].verifier_program.0.len(), 32);
	}

	#[test]
	fn test_rejects_bad_entries() {
		let config: toml::Value =
			toml::from_str("[chains.mainnet]\nrpc_url = \"https://x\"\nverifier_proxy = \"0x00\"")
				.unwrap();
		assert!(matches!(
			parse_chains(config.get("chains")),
			Err(ChainError::Config(_))
		));

		let config: toml::Value =
			toml::from_str("[chains.1]\nrpc_url = \"ftp://x\"\nverifier_proxy = \"0x00\"").unwrap();
		assert!(parse_chains(config.get("chains")).is_err());
	}

	#[tokio::test]
	async fn test_resolve_and_reuse_clients() {
		let config: toml::Value = toml::from_str(CONFIG).unwrap();
		let registry = create_registry(
			config.get("chains"),
			config.get("clusters"),
			accounts(),
			GasGuard::unlimited(),
		)
		.unwrap();

		let first = registry.resolve_evm(421614).unwrap();
		let second = registry.resolve_evm(421614).unwrap();
		assert_eq!(first.kind(), ChainFamilyKind::Evm);
		assert_eq!(first.key(), "421614");
		assert!(Arc::ptr_eq(&first.delivery(), &second.delivery()));

		assert!(matches!(
			registry.resolve_evm(1),
			Err(ChainError::UnknownChain(1))
		));
		// No Solana keypair configured.
		assert!(matches!(
			registry.resolve_solana("devnet"),
			Err(ChainError::Account(_))
		));
		assert!(matches!(
			registry.resolve_solana("mainnet"),
			Err(ChainError::UnknownCluster(_))
		));
	}

	#[test]
	fn test_family_names() {
		assert_eq!("EVM".parse::<ChainFamilyKind>().unwrap(), ChainFamilyKind::Evm);
		assert_eq!(ChainFamilyKind::Solana.to_string(), "solana");
		assert!("cosmos".parse::<ChainFamilyKind>().is_err());
	}
}
