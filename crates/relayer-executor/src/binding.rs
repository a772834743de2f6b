//! Binding of configured argument names to verified report fields.
//!
//! A write target names the report fields to pass, in order. Names are
//! checked against a closed set and against the fields the feed's report
//! version actually carries, once when the target is configured and again
//! when a report is bound.

use crate::ExecutorError;
use alloy::primitives::{B256, I256, U256};
use relayer_types::{ReportVersion, VerifiedReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportField {
	FeedId,
	ValidFromTimestamp,
	ObservationsTimestamp,
	NativeFee,
	LinkFee,
	ExpiresAt,
	/// Benchmark price on v3, price on v4.
	Price,
	BenchmarkPrice,
	Bid,
	Ask,
	MarketStatus,
}

impl ReportField {
	pub fn name(&self) -> &'static str {
		match self {
			ReportField::FeedId => "feedId",
			ReportField::ValidFromTimestamp => "validFromTimestamp",
			ReportField::ObservationsTimestamp => "observationsTimestamp",
			ReportField::NativeFee => "nativeFee",
			ReportField::LinkFee => "linkFee",
			ReportField::ExpiresAt => "expiresAt",
			ReportField::Price => "price",
			ReportField::BenchmarkPrice => "benchmarkPrice",
			ReportField::Bid => "bid",
			ReportField::Ask => "ask",
			ReportField::MarketStatus => "marketStatus",
		}
	}

	pub fn available_in(&self, version: ReportVersion) -> bool {
		match self {
			ReportField::BenchmarkPrice | ReportField::Bid | ReportField::Ask => {
				version == ReportVersion::V3
			},
			ReportField::MarketStatus => version == ReportVersion::V4,
			_ => true,
		}
	}

	/// Reads the field from a verified report.
	pub fn value(&self, report: &VerifiedReport) -> Result<FieldValue, ExecutorError> {
		let unavailable = || ExecutorError::FieldUnavailable {
			field: self.name(),
			version: report.version(),
		};

		let value = match (self, report) {
			(ReportField::FeedId, r) => FieldValue::Bytes32(r.feed_id().0),
			(ReportField::Price, r) => FieldValue::Int(r.price()),
			(ReportField::ValidFromTimestamp, VerifiedReport::V3(r)) => {
				FieldValue::U32(r.valid_from_timestamp)
			},
			(ReportField::ValidFromTimestamp, VerifiedReport::V4(r)) => {
				FieldValue::U32(r.valid_from_timestamp)
			},
			(ReportField::ObservationsTimestamp, VerifiedReport::V3(r)) => {
				FieldValue::U32(r.observations_timestamp)
			},
			(ReportField::ObservationsTimestamp, VerifiedReport::V4(r)) => {
				FieldValue::U32(r.observations_timestamp)
			},
			(ReportField::NativeFee, VerifiedReport::V3(r)) => FieldValue::Uint(r.native_fee),
			(ReportField::NativeFee, VerifiedReport::V4(r)) => FieldValue::Uint(r.native_fee),
			(ReportField::LinkFee, VerifiedReport::V3(r)) => FieldValue::Uint(r.link_fee),
			(ReportField::LinkFee, VerifiedReport::V4(r)) => FieldValue::Uint(r.link_fee),
			(ReportField::ExpiresAt, VerifiedReport::V3(r)) => FieldValue::U32(r.expires_at),
			(ReportField::ExpiresAt, VerifiedReport::V4(r)) => FieldValue::U32(r.expires_at),
			(ReportField::BenchmarkPrice, VerifiedReport::V3(r)) => {
				FieldValue::Int(r.benchmark_price)
			},
			(ReportField::Bid, VerifiedReport::V3(r)) => FieldValue::Int(r.bid),
			(ReportField::Ask, VerifiedReport::V3(r)) => FieldValue::Int(r.ask),
			(ReportField::MarketStatus, VerifiedReport::V4(r)) => FieldValue::U32(r.market_status),
			_ => return Err(unavailable()),
		};
		Ok(value)
	}
}

impl fmt::Display for ReportField {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for ReportField {
	type Err = ExecutorError;

	/// Accepts camelCase and snake_case spellings.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized: String = s
			.chars()
			.filter(|c| *c != '_')
			.flat_map(char::to_lowercase)
			.collect();

		let field = match normalized.as_str() {
			"feedid" => ReportField::FeedId,
			"validfromtimestamp" => ReportField::ValidFromTimestamp,
			"observationstimestamp" => ReportField::ObservationsTimestamp,
			"nativefee" => ReportField::NativeFee,
			"linkfee" => ReportField::LinkFee,
			"expiresat" => ReportField::ExpiresAt,
			"price" => ReportField::Price,
			"benchmarkprice" => ReportField::BenchmarkPrice,
			"bid" => ReportField::Bid,
			"ask" => ReportField::Ask,
			"marketstatus" => ReportField::MarketStatus,
			_ => return Err(ExecutorError::UnknownField(s.to_string())),
		};
		Ok(field)
	}
}

/// A bound report value before it is encoded for a particular chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
	Bytes32(B256),
	U32(u32),
	Uint(U256),
	Int(I256),
}

/// What to call on the destination with a verified report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
	/// JSON ABI, or a single human-readable function signature. Unused on
	/// Solana.
	#[serde(default)]
	pub abi: String,
	#[serde(alias = "function_name")]
	pub function_name: String,
	/// Report field names, in argument order.
	#[serde(default, alias = "function_args")]
	pub function_args: Vec<String>,
}

impl TargetConfig {
	pub fn fields(&self) -> Result<Vec<ReportField>, ExecutorError> {
		self.function_args.iter().map(|name| name.parse()).collect()
	}

	/// Rejects argument names the given report version does not carry.
	pub fn validate_for(&self, version: ReportVersion) -> Result<(), ExecutorError> {
		for field in self.fields()? {
			if !field.available_in(version) {
				return Err(ExecutorError::FieldUnavailable {
					field: field.name(),
					version,
				});
			}
		}
		Ok(())
	}

	/// Reads every configured argument from `report`, in order.
	pub fn bind(&self, report: &VerifiedReport) -> Result<Vec<(ReportField, FieldValue)>, ExecutorError> {
		self.fields()?
			.into_iter()
			.map(|field| Ok((field, field.value(report)?)))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use relayer_types::{FeedId, V3Report, V4Report};

	fn v3() -> VerifiedReport {
		VerifiedReport::V3(V3Report {
			feed_id: FeedId::from([3u8; 32]),
			valid_from_timestamp: 1,
			observations_timestamp: 2,
			native_fee: U256::from(3u64),
			link_fee: U256::from(4u64),
			expires_at: 5,
			benchmark_price: I256::try_from(600).unwrap(),
			bid: I256::try_from(599).unwrap(),
			ask: I256::try_from(601).unwrap(),
		})
	}

	fn v4() -> VerifiedReport {
		VerifiedReport::V4(V4Report {
			feed_id: FeedId::from([4u8; 32]),
			valid_from_timestamp: 1,
			observations_timestamp: 2,
			native_fee: U256::from(3u64),
			link_fee: U256::from(4u64),
			expires_at: 5,
			price: I256::try_from(-700).unwrap(),
			market_status: 2,
		})
	}

	fn target(args: &[&str]) -> TargetConfig {
		TargetConfig {
			abi: String::new(),
			function_name: "update".into(),
			function_args: args.iter().map(|s| s.to_string()).collect(),
		}
	}

	#[test]
	fn test_accepts_both_spellings() {
		assert_eq!("feedId".parse::<ReportField>().unwrap(), ReportField::FeedId);
		assert_eq!("feed_id".parse::<ReportField>().unwrap(), ReportField::FeedId);
		assert_eq!(
			"observations_timestamp".parse::<ReportField>().unwrap(),
			ReportField::ObservationsTimestamp
		);
		assert!(matches!(
			"volume".parse::<ReportField>(),
			Err(ExecutorError::UnknownField(name)) if name == "volume"
		));
	}

	#[test]
	fn test_binds_in_configured_order() {
		let bound = target(&["price", "feedId", "observationsTimestamp"])
			.bind(&v3())
			.unwrap();
		assert_eq!(bound[0].1, FieldValue::Int(I256::try_from(600).unwrap()));
		assert_eq!(bound[1].1, FieldValue::Bytes32(B256::from([3u8; 32])));
		assert_eq!(bound[2].1, FieldValue::U32(2));

		let bound = target(&["price", "marketStatus"]).bind(&v4()).unwrap();
		assert_eq!(bound[0].1, FieldValue::Int(I256::try_from(-700).unwrap()));
		assert_eq!(bound[1].1, FieldValue::U32(2));
	}

	#[test]
	fn test_version_specific_fields() {
		assert!(target(&["bid", "ask"]).validate_for(ReportVersion::V3).is_ok());
		assert!(matches!(
			target(&["bid"]).validate_for(ReportVersion::V4),
			Err(ExecutorError::FieldUnavailable { field: "bid", .. })
		));
		assert!(target(&["marketStatus"]).validate_for(ReportVersion::V3).is_err());
		assert!(target(&["marketStatus"]).bind(&v3()).is_err());
		assert!(target(&["nope"]).validate_for(ReportVersion::V3).is_err());
	}

	#[test]
	fn test_target_config_accepts_snake_case_keys() {
		let config: TargetConfig = serde_json::from_str(
			r#"{"abi": "function update(int192)", "function_name": "update", "function_args": ["price"]}"#,
		)
		.unwrap();
		assert_eq!(config.function_name, "update");
		assert_eq!(config.function_args, vec!["price"]);
	}
}
