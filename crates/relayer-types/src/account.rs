//! Account-related types.
//!
//! Addresses are stored as raw bytes so the same type can carry a 20-byte
//! EVM address or a 32-byte Solana public key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain-agnostic address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub Vec<u8>);

impl Address {
	/// Whether every byte of the address is zero.
	pub fn is_zero(&self) -> bool {
		self.0.iter().all(|b| *b == 0)
	}
}

impl From<alloy::primitives::Address> for Address {
	fn from(addr: alloy::primitives::Address) -> Self {
		Address(addr.as_slice().to_vec())
	}
}

impl TryFrom<&Address> for alloy::primitives::Address {
	type Error = String;

	fn try_from(addr: &Address) -> Result<Self, Self::Error> {
		if addr.0.len() != 20 {
			return Err(format!(
				"Expected a 20-byte address, got {} bytes",
				addr.0.len()
			));
		}
		Ok(alloy::primitives::Address::from_slice(&addr.0))
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}
