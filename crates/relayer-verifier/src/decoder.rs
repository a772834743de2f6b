//! Report wire format.
//!
//! A full report is `abi.encode(bytes32[3] context, bytes reportBlob, ...)`
//! followed by the signature arrays, which the relayer never inspects. The
//! blob starts with the 32-byte feed id, whose first two bytes name the
//! layout of the rest of the blob.

use crate::VerifierError;
use alloy::primitives::{Bytes, B256, I256, U256};
use alloy::sol;
use alloy::sol_types::{sol_data, SolType};
use relayer_types::{
	FeedId, ReportVersion, StreamReport, V3Report, V4Report, VerifiedReport,
};

sol! {
	/// Crypto streams layout. Fees and prices are 192-bit on the wire; a
	/// padded word decodes the same as a 256-bit one.
	struct ReportV3 {
		bytes32 feedId;
		uint32 validFromTimestamp;
		uint32 observationsTimestamp;
		uint256 nativeFee;
		uint256 linkFee;
		uint32 expiresAt;
		int256 benchmarkPrice;
		int256 bid;
		int256 ask;
	}

	/// Real-world asset layout.
	struct ReportV4 {
		bytes32 feedId;
		uint32 validFromTimestamp;
		uint32 observationsTimestamp;
		uint256 nativeFee;
		uint256 linkFee;
		uint32 expiresAt;
		int256 price;
		uint32 marketStatus;
	}
}

type Envelope = (sol_data::FixedArray<sol_data::FixedBytes<32>, 3>, sol_data::Bytes);

/// Splits a full report into its context words and report blob.
pub fn decode_full_report(full_report: &[u8]) -> Result<([B256; 3], Bytes), VerifierError> {
	<Envelope as SolType>::abi_decode_params(full_report)
		.map_err(|e| VerifierError::Decode(format!("Malformed report envelope: {}", e)))
}

/// Schema version of a report blob: the big-endian `u16` in its first two
/// bytes.
pub fn report_version(blob: &[u8]) -> Result<ReportVersion, VerifierError> {
	let marker = match blob {
		[hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
		_ => return Err(VerifierError::Decode("Report blob is too short".into())),
	};

	ReportVersion::try_from(marker).map_err(|e| {
		tracing::error!(version = marker, "Invalid report version");
		VerifierError::UnsupportedVersion(e)
	})
}

fn decode_v3(blob: &[u8]) -> Result<V3Report, VerifierError> {
	let r = <ReportV3 as SolType>::abi_decode(blob)
		.map_err(|e| VerifierError::Decode(format!("Malformed v3 report: {}", e)))?;
	Ok(V3Report {
		feed_id: FeedId(r.feedId),
		valid_from_timestamp: r.validFromTimestamp,
		observations_timestamp: r.observationsTimestamp,
		native_fee: r.nativeFee,
		link_fee: r.linkFee,
		expires_at: r.expiresAt,
		benchmark_price: r.benchmarkPrice,
		bid: r.bid,
		ask: r.ask,
	})
}

fn decode_v4(blob: &[u8]) -> Result<V4Report, VerifierError> {
	let r = <ReportV4 as SolType>::abi_decode(blob)
		.map_err(|e| VerifierError::Decode(format!("Malformed v4 report: {}", e)))?;
	Ok(V4Report {
		feed_id: FeedId(r.feedId),
		valid_from_timestamp: r.validFromTimestamp,
		observations_timestamp: r.observationsTimestamp,
		native_fee: r.nativeFee,
		link_fee: r.linkFee,
		expires_at: r.expiresAt,
		price: r.price,
		market_status: r.marketStatus,
	})
}

/// Decodes a report blob with the layout of `version`.
pub fn decode_verified(version: ReportVersion, blob: &[u8]) -> Result<VerifiedReport, VerifierError> {
	match version {
		ReportVersion::V3 => decode_v3(blob).map(VerifiedReport::V3),
		ReportVersion::V4 => decode_v4(blob).map(VerifiedReport::V4),
	}
}

/// Decodes the header fields of a full report for the ingestion cache.
pub fn decode_stream_report(full_report: &[u8]) -> Result<StreamReport, VerifierError> {
	let (_, blob) = decode_full_report(full_report)?;
	let version = report_version(&blob)?;

	let (feed_id, valid_from, observations, native_fee, link_fee, expires_at, price): (
		FeedId,
		u32,
		u32,
		U256,
		U256,
		u32,
		I256,
	) = match decode_verified(version, &blob)? {
		VerifiedReport::V3(r) => (
			r.feed_id,
			r.valid_from_timestamp,
			r.observations_timestamp,
			r.native_fee,
			r.link_fee,
			r.expires_at,
			r.benchmark_price,
		),
		VerifiedReport::V4(r) => (
			r.feed_id,
			r.valid_from_timestamp,
			r.observations_timestamp,
			r.native_fee,
			r.link_fee,
			r.expires_at,
			r.price,
		),
	};

	Ok(StreamReport {
		feed_id,
		raw_report: Bytes::copy_from_slice(full_report),
		valid_from_timestamp: valid_from,
		observations_timestamp: observations,
		native_fee,
		link_fee,
		expires_at,
		price,
	})
}
