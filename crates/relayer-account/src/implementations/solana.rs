//! Ed25519 keypair for Solana clusters.

use crate::{AccountError, AccountInterface};
use relayer_types::{Address, ConfigSchema, Field, FieldType, Schema, ValidationError};
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use std::sync::Arc;

pub struct SolanaWallet {
	keypair: Arc<Keypair>,
}

impl SolanaWallet {
	/// Parses the 64-byte JSON array format written by `solana-keygen`.
	pub fn from_json_bytes(json: &str) -> Result<Self, AccountError> {
		let bytes: Vec<u8> = serde_json::from_str(json)
			.map_err(|e| AccountError::InvalidKey(format!("Keypair is not a byte array: {}", e)))?;
		#[allow(deprecated)]
		let keypair = Keypair::from_bytes(&bytes)
			.map_err(|e| AccountError::InvalidKey(format!("Invalid keypair: {}", e)))?;
		Ok(Self {
			keypair: Arc::new(keypair),
		})
	}

	pub fn from_file(path: &str) -> Result<Self, AccountError> {
		let keypair = read_keypair_file(path)
			.map_err(|e| AccountError::InvalidKey(format!("Failed to read {}: {}", path, e)))?;
		Ok(Self {
			keypair: Arc::new(keypair),
		})
	}

	pub fn keypair(&self) -> Arc<Keypair> {
		self.keypair.clone()
	}
}

pub struct SolanaWalletSchema;

impl ConfigSchema for SolanaWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![
			Field::optional("keypair", FieldType::String),
			Field::optional("keypair_path", FieldType::String),
		])
		.validate(config)?;

		if config.get("keypair").is_none() && config.get("keypair_path").is_none() {
			return Err(ValidationError::MissingField("keypair".into()));
		}
		Ok(())
	}
}

impl AccountInterface for SolanaWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SolanaWalletSchema)
	}

	fn address(&self) -> Address {
		Address(self.keypair.pubkey().to_bytes().to_vec())
	}
}

/// Creates a wallet from the `[account.solana]` table.
pub fn create_wallet(config: &toml::Value) -> Result<SolanaWallet, AccountError> {
	SolanaWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(e.to_string()))?;

	match (
		config.get("keypair").and_then(|v| v.as_str()),
		config.get("keypair_path").and_then(|v| v.as_str()),
	) {
		(Some(json), _) => SolanaWallet::from_json_bytes(json),
		(None, Some(path)) => SolanaWallet::from_file(path),
		(None, None) => Err(AccountError::MissingIdentity("solana")),
	}
}
