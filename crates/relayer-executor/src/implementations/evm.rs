//! Contract writes on EVM chains, encoded from the target's ABI.

use crate::binding::{FieldValue, ReportField, TargetConfig};
use crate::{ExecutorError, ExecutorInterface, WriteTarget};
use alloy::dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy::json_abi::{Function, JsonAbi};
use alloy::primitives::{I256, U256};
use async_trait::async_trait;
use relayer_delivery::DeliveryService;
use relayer_types::{Transaction, TransactionReceipt, VerifiedReport};
use std::sync::Arc;

/// Parses the target ABI and picks the configured function.
///
/// The ABI may be a JSON array or a single human-readable signature such
/// as `function updatePrice(bytes32,int192)`. With overloads, the one whose
/// arity matches the configured arguments wins.
pub fn resolve_function(target: &TargetConfig) -> Result<Function, ExecutorError> {
	let source = target.abi.trim();
	let abi: JsonAbi = if source.starts_with('[') {
		serde_json::from_str(source)
			.map_err(|e| ExecutorError::Config(format!("Invalid ABI JSON: {}", e)))?
	} else {
		JsonAbi::parse([source])
			.map_err(|e| ExecutorError::Config(format!("Invalid ABI signature: {}", e)))?
	};

	abi.function(&target.function_name)
		.and_then(|overloads| {
			overloads
				.iter()
				.find(|f| f.inputs.len() == target.function_args.len())
		})
		.cloned()
		.ok_or_else(|| {
			ExecutorError::Config(format!(
				"ABI has no function {} taking {} arguments",
				target.function_name,
				target.function_args.len()
			))
		})
}

fn signed_fits(value: I256, bits: usize) -> bool {
	if bits >= 256 {
		return true;
	}
	let limit = I256::ONE << (bits - 1);
	value >= -limit && value < limit
}

/// Converts a bound value to the ABI type of its parameter.
pub fn coerce(field: ReportField, value: FieldValue, ty: &DynSolType) -> Result<DynSolValue, ExecutorError> {
	let mismatch = || ExecutorError::TypeMismatch {
		field: field.name(),
		expected: ty.sol_type_name().into_owned(),
	};

	let unsigned = |v: U256, bits: usize| {
		if v.bit_len() <= bits {
			Ok(DynSolValue::Uint(v, bits))
		} else {
			Err(mismatch())
		}
	};
	let signed = |v: I256, bits: usize| {
		if signed_fits(v, bits) {
			Ok(DynSolValue::Int(v, bits))
		} else {
			Err(mismatch())
		}
	};

	match (value, ty) {
		(FieldValue::Bytes32(b), DynSolType::FixedBytes(32)) => Ok(DynSolValue::FixedBytes(b, 32)),
		(FieldValue::U32(v), DynSolType::Uint(bits)) => unsigned(U256::from(v), *bits),
		(FieldValue::U32(v), DynSolType::Int(bits)) => signed(I256::from_raw(U256::from(v)), *bits),
		(FieldValue::Uint(v), DynSolType::Uint(bits)) => unsigned(v, *bits),
		(FieldValue::Uint(v), DynSolType::Int(bits)) => {
			signed(I256::try_from(v).map_err(|_| mismatch())?, *bits)
		},
		(FieldValue::Int(v), DynSolType::Int(bits)) => signed(v, *bits),
		(FieldValue::Int(v), DynSolType::Uint(bits)) if !v.is_negative() => {
			unsigned(v.into_raw(), *bits)
		},
		_ => Err(mismatch()),
	}
}

/// Encodes the call for `report` against `target`.
pub fn encode_call(target: &TargetConfig, report: &VerifiedReport) -> Result<Vec<u8>, ExecutorError> {
	let function = resolve_function(target)?;
	let bound = target.bind(report)?;

	let values = bound
		.into_iter()
		.zip(function.inputs.iter())
		.map(|((field, value), param)| {
			let ty = param.resolve().map_err(|e| {
				ExecutorError::Config(format!("Unsupported parameter type {}: {}", param.ty, e))
			})?;
			coerce(field, value, &ty)
		})
		.collect::<Result<Vec<_>, _>>()?;

	function
		.abi_encode_input(&values)
		.map_err(|e| ExecutorError::Config(format!("Failed to encode {}: {}", function.name, e)))
}

pub struct EvmExecutor {
	delivery: Arc<DeliveryService>,
}

impl EvmExecutor {
	pub fn new(delivery: Arc<DeliveryService>) -> Self {
		Self { delivery }
	}
}

#[async_trait]
impl ExecutorInterface for EvmExecutor {
	async fn execute(
		&self,
		report: &VerifiedReport,
		target: &WriteTarget,
	) -> Result<TransactionReceipt, ExecutorError> {
		let data = encode_call(&target.target, report)?;
		let outcome = self
			.delivery
			.send_guarded("write", Transaction::call(target.contract.clone(), data))
			.await?;

		if !outcome.receipt.success {
			return Err(ExecutorError::TransactionFailed(outcome.receipt.hash));
		}

		tracing::info!(
			feed_id = %report.feed_id(),
			contract = %target.contract,
			function = %target.target.function_name,
			tx_hash = %outcome.receipt.hash.truncated(),
			"Wrote report"
		);
		Ok(outcome.receipt)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{keccak256, B256};
	use alloy::sol_types::SolValue;
	use async_trait::async_trait;
	use relayer_delivery::{DeliveryError, DeliveryInterface, GasGuard};
	use relayer_types::{Address, FeedId, TransactionHash, V3Report};
	use std::sync::Mutex;

	fn report(price: i64) -> VerifiedReport {
		VerifiedReport::V3(V3Report {
			feed_id: FeedId::from([3u8; 32]),
			valid_from_timestamp: 10,
			observations_timestamp: 11,
			native_fee: U256::from(1u64),
			link_fee: U256::from(2u64),
			expires_at: 12,
			benchmark_price: I256::try_from(price).unwrap(),
			bid: I256::ZERO,
			ask: I256::ZERO,
		})
	}

	fn target(abi: &str, args: &[&str]) -> TargetConfig {
		TargetConfig {
			abi: abi.to_string(),
			function_name: "updatePrice".into(),
			function_args: args.iter().map(|s| s.to_string()).collect(),
		}
	}

	#[test]
	fn test_encodes_human_readable_signature() {
		let target = target(
			"function updatePrice(bytes32 feedId, int192 price, uint32 timestamp)",
			&["feedId", "price", "observationsTimestamp"],
		);
		let data = encode_call(&target, &report(-5)).unwrap();

		let selector = &keccak256("updatePrice(bytes32,int192,uint32)")[..4];
		assert_eq!(&data[..4], selector);
		let expected = (B256::from([3u8; 32]), I256::try_from(-5).unwrap(), U256::from(11u64))
			.abi_encode_params();
		assert_eq!(&data[4..], expected.as_slice());
	}

	#[test]
	fn test_encodes_json_abi() {
		let abi = r#"[{"type":"function","name":"updatePrice","stateMutability":"nonpayable","outputs":[],
			"inputs":[{"name":"price","type":"int256","internalType":"int256"}]}]"#;
		let data = encode_call(&target(abi, &["price"]), &report(42)).unwrap();
		assert_eq!(data.len(), 4 + 32);
	}

	#[test]
	fn test_rejects_mismatches() {
		// Negative price into an unsigned parameter.
		let err = encode_call(
			&target("function updatePrice(uint256)", &["price"]),
			&report(-1),
		)
		.unwrap_err();
		assert!(matches!(err, ExecutorError::TypeMismatch { field: "price", .. }));

		// Arity does not match any overload.
		assert!(matches!(
			encode_call(&target("function updatePrice(int256)", &["price", "bid"]), &report(1)),
			Err(ExecutorError::Config(_))
		));

		// Value does not fit the declared width.
		assert!(coerce(
			ReportField::Price,
			FieldValue::Int(I256::try_from(1i64 << 40).unwrap()),
			&DynSolType::Int(32)
		)
		.is_err());
	}

	struct MockChain {
		success: bool,
		sent: Arc<Mutex<Vec<Transaction>>>,
	}

	#[async_trait]
	impl DeliveryInterface for MockChain {
		fn signer(&self) -> Address {
			Address(vec![0xaa; 20])
		}
		fn native_decimals(&self) -> u8 {
			18
		}
		async fn call(&self, _tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
			Ok(vec![])
		}
		async fn estimate(&self, _tx: &Transaction) -> Result<u64, DeliveryError> {
			Ok(50_000)
		}
		async fn simulate(&self, _tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
			Ok(vec![])
		}
		async fn submit(&self, tx: Transaction) -> Result<TransactionReceipt, DeliveryError> {
			self.sent.lock().unwrap().push(tx);
			Ok(TransactionReceipt {
				hash: TransactionHash(vec![0xcc; 32]),
				block_number: 3,
				success: self.success,
			})
		}
	}

	#[tokio::test]
	async fn test_execute_sends_to_feed_contract() {
		let sent = Arc::new(Mutex::new(Vec::new()));
		let executor = EvmExecutor::new(Arc::new(DeliveryService::new(
			Box::new(MockChain {
				success: true,
				sent: sent.clone(),
			}),
			GasGuard::unlimited(),
		)));
		let write = WriteTarget {
			target: target("function updatePrice(int192)", &["price"]),
			contract: Address(vec![0x77; 20]),
			accounts: vec![],
		};

		let receipt = executor.execute(&report(9), &write).await.unwrap();
		assert_eq!(receipt.block_number, 3);
		assert_eq!(sent.lock().unwrap()[0].to, Address(vec![0x77; 20]));
	}

	#[tokio::test]
	async fn test_failed_receipt_is_an_error() {
		let executor = EvmExecutor::new(Arc::new(DeliveryService::new(
			Box::new(MockChain {
				success: false,
				sent: Arc::new(Mutex::new(Vec::new())),
			}),
			GasGuard::unlimited(),
		)));
		let write = WriteTarget {
			target: target("function updatePrice(int192)", &["price"]),
			contract: Address(vec![0x77; 20]),
			accounts: vec![],
		};

		assert!(matches!(
			executor.execute(&report(9), &write).await,
			Err(ExecutorError::TransactionFailed(_))
		));
	}
}
