//! Transaction delivery types.
//!
//! A [`Transaction`] describes one state-changing call independently of the
//! chain family that will carry it. EVM delivery ignores `accounts`; Solana
//! delivery turns `to` into the program id and `accounts` into the
//! instruction's account metas.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Address;

/// Account referenced by a program-account instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
	pub address: Address,
	pub is_signer: bool,
	pub is_writable: bool,
}

impl AccountMeta {
	pub fn readonly(address: Address) -> Self {
		Self {
			address,
			is_signer: false,
			is_writable: false,
		}
	}

	pub fn writable(address: Address) -> Self {
		Self {
			address,
			is_signer: false,
			is_writable: true,
		}
	}

	pub fn signer(address: Address) -> Self {
		Self {
			address,
			is_signer: true,
			is_writable: true,
		}
	}
}

/// A single contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	/// Contract address (EVM) or program id (Solana).
	pub to: Address,
	/// Calldata or instruction data.
	pub data: Vec<u8>,
	/// Native value attached to the call.
	pub value: U256,
	/// Instruction accounts, in order. Empty on EVM chains.
	pub accounts: Vec<AccountMeta>,
}

impl Transaction {
	/// Creates a call with no value and no instruction accounts.
	pub fn call(to: Address, data: Vec<u8>) -> Self {
		Self {
			to,
			data,
			value: U256::ZERO,
			accounts: Vec::new(),
		}
	}

	pub fn with_accounts(mut self, accounts: Vec<AccountMeta>) -> Self {
		self.accounts = accounts;
		self
	}
}

/// Transaction hash or signature bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl TransactionHash {
	/// Short form for log lines.
	pub fn truncated(&self) -> String {
		let hash_str = hex::encode(&self.0);
		if hash_str.len() <= 8 {
			hash_str
		} else {
			format!("{}..", &hash_str[..8])
		}
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub hash: TransactionHash,
	/// Block number (EVM) or slot (Solana) the transaction landed in.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
}
