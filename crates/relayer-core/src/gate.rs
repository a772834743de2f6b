//! Price deviation gate.

use alloy::primitives::{I256, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
	/// The price moved at least `price_delta` since the last write.
	Dispatch { diff: I256 },
	/// The move is too small to be worth a write.
	Skip { diff: I256 },
}

impl GateDecision {
	pub fn diff(&self) -> I256 {
		match self {
			GateDecision::Dispatch { diff } | GateDecision::Skip { diff } => *diff,
		}
	}

	pub fn should_dispatch(&self) -> bool {
		matches!(self, GateDecision::Dispatch { .. })
	}
}

/// Compares the latest price against the last written one.
///
/// A feed that has never been written counts as last written at zero. The
/// write is skipped only when `|diff| < price_delta`, so a zero delta lets
/// every tick through.
pub fn evaluate(latest: I256, last_written: Option<I256>, price_delta: U256) -> GateDecision {
	let diff = latest.saturating_sub(last_written.unwrap_or(I256::ZERO));
	if diff.unsigned_abs() < price_delta {
		GateDecision::Skip { diff }
	} else {
		GateDecision::Dispatch { diff }
	}
}
