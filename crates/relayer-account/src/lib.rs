//! Signing identities.
//!
//! The relayer holds at most one identity per chain family: a local
//! secp256k1 key for EVM chains and an ed25519 keypair for Solana clusters.
//! Delivery implementations borrow the concrete signer they need from the
//! [`AccountService`].

use alloy::signers::local::PrivateKeySigner;
use relayer_types::{Address, ConfigSchema};
use solana_sdk::signature::Keypair;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod local;
	pub mod solana;
}

use implementations::{local::LocalWallet, solana::SolanaWallet};

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("No {0} signing identity configured")]
	MissingIdentity(&'static str),
}

/// Common surface of a signing identity.
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this identity.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Address transactions are sent from.
	fn address(&self) -> Address;
}

/// Holds the configured identities, one per chain family.
#[derive(Default)]
pub struct AccountService {
	evm: Option<LocalWallet>,
	solana: Option<SolanaWallet>,
}

impl AccountService {
	pub fn new(evm: Option<LocalWallet>, solana: Option<SolanaWallet>) -> Self {
		Self { evm, solana }
	}

	/// Signer for account-model chains.
	pub fn evm_signer(&self) -> Result<PrivateKeySigner, AccountError> {
		self.evm
			.as_ref()
			.map(|wallet| wallet.signer().clone())
			.ok_or(AccountError::MissingIdentity("evm"))
	}

	/// Keypair for program-account chains.
	pub fn solana_keypair(&self) -> Result<Arc<Keypair>, AccountError> {
		self.solana
			.as_ref()
			.map(|wallet| wallet.keypair())
			.ok_or(AccountError::MissingIdentity("solana"))
	}

	/// Addresses of all configured identities, keyed by family name.
	pub fn addresses(&self) -> Vec<(&'static str, Address)> {
		let mut out = Vec::new();
		if let Some(wallet) = &self.evm {
			out.push(("evm", wallet.address()));
		}
		if let Some(wallet) = &self.solana {
			out.push(("solana", wallet.address()));
		}
		out
	}
}

/// Builds the account service from the `[account]` table.
///
/// Configuration parameters:
/// - `evm.private_key`: hex secp256k1 key
/// - `solana.keypair`: JSON byte array, or `solana.keypair_path`: keypair file
pub fn create_account(config: &toml::Value) -> Result<AccountService, AccountError> {
	let evm = config
		.get("evm")
		.map(implementations::local::create_wallet)
		.transpose()?;
	let solana = config
		.get("solana")
		.map(implementations::solana::create_wallet)
		.transpose()?;

	if evm.is_none() && solana.is_none() {
		tracing::warn!("No signing identity configured; every dispatch will abort");
	}

	Ok(AccountService::new(evm, solana))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_missing_identity() {
		let service = AccountService::default();
		assert!(matches!(
			service.evm_signer(),
			Err(AccountError::MissingIdentity("evm"))
		));
		assert!(matches!(
			service.solana_keypair(),
			Err(AccountError::MissingIdentity("solana"))
		));
		assert!(service.addresses().is_empty());
	}

	#[test]
	fn test_create_from_config() {
		let config: toml::Value = toml::from_str(&format!(
			"[evm]\nprivate_key = \"0x{}\"",
			"11".repeat(32)
		))
		.unwrap();
		let service = create_account(&config).unwrap();
		assert!(service.evm_signer().is_ok());
		assert_eq!(service.addresses().len(), 1);
		assert_eq!(service.addresses()[0].1 .0.len(), 20);
	}
}
