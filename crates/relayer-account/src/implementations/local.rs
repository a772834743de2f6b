//! Local private key wallet for EVM chains.

use crate::{AccountError, AccountInterface};
use alloy::signers::local::PrivateKeySigner;
use relayer_types::{private_key, Address, ConfigSchema, Field, FieldType, Schema, ValidationError};

/// Wallet holding a secp256k1 key in memory.
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a wallet from a hex-encoded private key (with or without 0x prefix).
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let signer = private_key_hex
			.parse::<PrivateKeySigner>()
			.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))?;

		Ok(Self { signer })
	}

	pub fn signer(&self) -> &PrivateKeySigner {
		&self.signer
	}
}

pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![
			Field::required("private_key", FieldType::String).with_validator(private_key)
		])
		.validate(config)
	}
}

impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	fn address(&self) -> Address {
		self.signer.address().into()
	}
}

/// Creates a wallet from the `[account.evm]` table.
pub fn create_wallet(config: &toml::Value) -> Result<LocalWallet, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(e.to_string()))?;

	let key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::InvalidKey("private_key is required".into()))?;

	LocalWallet::new(key)
}
