//! Report types.
//!
//! [`StreamReport`] is the latest raw report seen for a feed, as cached by
//! ingestion. [`VerifiedReport`] is what the on-chain verifier hands back and
//! is tagged by schema version.

use alloy::primitives::{Bytes, I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::FeedId;

/// Supported report schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportVersion {
	V3,
	V4,
}

/// Error returned for a version marker no decoder exists for.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid report version: {0}")]
pub struct UnsupportedVersion(pub u16);

impl TryFrom<u16> for ReportVersion {
	type Error = UnsupportedVersion;

	fn try_from(marker: u16) -> Result<Self, Self::Error> {
		match marker {
			3 => Ok(ReportVersion::V3),
			4 => Ok(ReportVersion::V4),
			other => Err(UnsupportedVersion(other)),
		}
	}
}

impl fmt::Display for ReportVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReportVersion::V3 => write!(f, "v3"),
			ReportVersion::V4 => write!(f, "v4"),
		}
	}
}

/// Latest raw report observed for a feed.
///
/// Overwritten on every arrival; no history is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReport {
	pub feed_id: FeedId,
	/// Full signed report exactly as received from the stream.
	pub raw_report: Bytes,
	pub valid_from_timestamp: u32,
	pub observations_timestamp: u32,
	pub native_fee: U256,
	pub link_fee: U256,
	pub expires_at: u32,
	/// Benchmark price for v3 reports, price for v4.
	pub price: I256,
}

/// Verified v3 report (crypto streams).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V3Report {
	pub feed_id: FeedId,
	pub valid_from_timestamp: u32,
	pub observations_timestamp: u32,
	pub native_fee: U256,
	pub link_fee: U256,
	pub expires_at: u32,
	pub benchmark_price: I256,
	pub bid: I256,
	pub ask: I256,
}

/// Verified v4 report (real-world assets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V4Report {
	pub feed_id: FeedId,
	pub valid_from_timestamp: u32,
	pub observations_timestamp: u32,
	pub native_fee: U256,
	pub link_fee: U256,
	pub expires_at: u32,
	pub price: I256,
	pub market_status: u32,
}

/// Report returned by the on-chain verifier, tagged by schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reportVersion")]
pub enum VerifiedReport {
	V3(V3Report),
	V4(V4Report),
}

impl VerifiedReport {
	pub fn version(&self) -> ReportVersion {
		match self {
			VerifiedReport::V3(_) => ReportVersion::V3,
			VerifiedReport::V4(_) => ReportVersion::V4,
		}
	}

	pub fn feed_id(&self) -> FeedId {
		match self {
			VerifiedReport::V3(r) => r.feed_id,
			VerifiedReport::V4(r) => r.feed_id,
		}
	}

	/// The price this report would write on-chain.
	pub fn price(&self) -> I256 {
		match self {
			VerifiedReport::V3(r) => r.benchmark_price,
			VerifiedReport::V4(r) => r.price,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_markers() {
		assert_eq!(ReportVersion::try_from(3), Ok(ReportVersion::V3));
		assert_eq!(ReportVersion::try_from(4), Ok(ReportVersion::V4));
		assert_eq!(ReportVersion::try_from(2), Err(UnsupportedVersion(2)));
		assert_eq!(
			UnsupportedVersion(9).to_string(),
			"Invalid report version: 9"
		);
	}
}
