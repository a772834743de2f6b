//! Feed identity.
//!
//! A feed id is the 32-byte identifier assigned by the oracle network. Its
//! first two bytes carry the schema version of every report published for
//! the feed.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 32-byte feed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedId(pub B256);

impl FeedId {
	/// Schema version encoded in the first two bytes of the id.
	pub fn schema_version(&self) -> u16 {
		u16::from_be_bytes([self.0[0], self.0[1]])
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0 .0
	}
}

impl From<[u8; 32]> for FeedId {
	fn from(bytes: [u8; 32]) -> Self {
		Self(B256::from(bytes))
	}
}

impl fmt::Display for FeedId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for FeedId {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let hex_str = s.strip_prefix("0x").unwrap_or(s);
		if hex_str.len() != 64 {
			return Err(format!("Feed id must be 32 bytes, got {} hex chars", hex_str.len()));
		}
		let bytes = hex::decode(hex_str).map_err(|e| format!("Invalid feed id: {}", e))?;
		Ok(Self(B256::from_slice(&bytes)))
	}
}

/// A subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
	pub feed_id: FeedId,
	pub name: String,
}
