//! Transaction delivery for the streams relayer.
//!
//! Every state-changing call the relayer makes (fee token approval, report
//! verification, the final write) goes through [`DeliveryService::send_guarded`]:
//! estimate, check the estimate against the gas cap, simulate, submit and
//! wait for the receipt. Nothing is submitted when the estimate is over the
//! cap or the simulation fails.

use alloy::primitives::{utils::format_units, U256};
use async_trait::async_trait;
use relayer_types::{Address, Transaction, TransactionReceipt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
	pub mod solana;
}

/// Errors that can occur during delivery operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// Transport or node failure. The only retryable kind.
	#[error("Network error: {0}")]
	Network(String),
	/// The call reverted during estimation or simulation.
	#[error("Simulation failed: {0}")]
	Simulation(String),
	/// The estimate is above the configured ceiling.
	#[error("Gas estimate {estimate} exceeds gas cap of {formatted_cap}")]
	GasCapExceeded {
		estimate: u64,
		cap: U256,
		formatted_cap: String,
	},
	/// The transaction could not be built.
	#[error("Invalid transaction: {0}")]
	InvalidTransaction(String),
}

impl DeliveryError {
	pub fn is_transient(&self) -> bool {
		matches!(self, DeliveryError::Network(_))
	}
}

/// Low-level interface to one chain, implemented once per chain family.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Address transactions are sent from.
	fn signer(&self) -> Address;

	/// Decimals of the native currency, used when formatting the gas cap.
	fn native_decimals(&self) -> u8;

	/// Read-only call returning the raw output.
	async fn call(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError>;

	/// Estimated gas (EVM) or compute units (Solana) the call would consume.
	async fn estimate(&self, tx: &Transaction) -> Result<u64, DeliveryError>;

	/// Executes the call against current state without committing it and
	/// returns its output.
	async fn simulate(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError>;

	/// Signs, submits and waits for the transaction to be confirmed.
	async fn submit(&self, tx: Transaction) -> Result<TransactionReceipt, DeliveryError>;
}

/// Source of the current gas ceiling. Consulted on every check.
#[async_trait]
pub trait GasCapSource: Send + Sync {
	/// `None` means no ceiling is enforced.
	async fn gas_cap(&self) -> Option<U256>;
}

#[async_trait]
impl GasCapSource for Option<U256> {
	async fn gas_cap(&self) -> Option<U256> {
		*self
	}
}

/// Rejects estimates above the configured gas cap.
#[derive(Clone)]
pub struct GasGuard {
	source: Arc<dyn GasCapSource>,
}

impl GasGuard {
	pub fn new(source: Arc<dyn GasCapSource>) -> Self {
		Self { source }
	}

	/// A guard that never rejects.
	pub fn unlimited() -> Self {
		Self::new(Arc::new(None::<U256>))
	}

	pub fn fixed(cap: U256) -> Self {
		Self::new(Arc::new(Some(cap)))
	}

	/// Checks `estimate` against the cap as configured right now.
	pub async fn check(&self, label: &str, estimate: u64, decimals: u8) -> Result<(), DeliveryError> {
		let Some(cap) = self.source.gas_cap().await else {
			return Ok(());
		};

		if U256::from(estimate) > cap {
			let formatted_cap = format_units(cap, decimals).unwrap_or_else(|_| cap.to_string());
			warn!(
				call = label,
				gas_cap = %formatted_cap,
				estimate,
				"Gas estimate exceeds gas cap, aborting"
			);
			return Err(DeliveryError::GasCapExceeded {
				estimate,
				cap,
				formatted_cap,
			});
		}

		Ok(())
	}
}

/// Result of a guarded send.
#[derive(Debug, Clone)]
pub struct GuardedOutcome {
	/// Output of the simulation that preceded submission.
	pub output: Vec<u8>,
	pub receipt: TransactionReceipt,
}

/// Chain client plus the gas guard every write passes through.
pub struct DeliveryService {
	provider: Box<dyn DeliveryInterface>,
	guard: GasGuard,
}

impl DeliveryService {
	pub fn new(provider: Box<dyn DeliveryInterface>, guard: GasGuard) -> Self {
		Self { provider, guard }
	}

	pub fn signer(&self) -> Address {
		self.provider.signer()
	}

	pub async fn call(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
		self.provider.call(tx).await
	}

	/// Estimate, guard, simulate, submit, confirm.
	///
	/// The receipt is returned whatever its status; callers decide what a
	/// failed receipt means for them.
	pub async fn send_guarded(
		&self,
		label: &str,
		tx: Transaction,
	) -> Result<GuardedOutcome, DeliveryError> {
		let estimate = self.provider.estimate(&tx).await?;
		debug!(call = label, estimate, "Estimated call");

		self.guard
			.check(label, estimate, self.provider.native_decimals())
			.await?;

		let output = self.provider.simulate(&tx).await?;
		let receipt = self.provider.submit(tx).await?;

		debug!(
			call = label,
			tx_hash = %receipt.hash.truncated(),
			success = receipt.success,
			"Call confirmed"
		);

		Ok(GuardedOutcome { output, receipt })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use relayer_types::TransactionHash;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::sync::RwLock;

	#[derive(Default)]
	struct Counters {
		simulate: AtomicUsize,
		submit: AtomicUsize,
	}

	struct MockDelivery {
		estimate: u64,
		counters: Arc<Counters>,
	}

	#[async_trait]
	impl DeliveryInterface for MockDelivery {
		fn signer(&self) -> Address {
			Address(vec![0x11; 20])
		}

		fn native_decimals(&self) -> u8 {
			18
		}

		async fn call(&self, _tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
			Ok(vec![])
		}

		async fn estimate(&self, _tx: &Transaction) -> Result<u64, DeliveryError> {
			Ok(self.estimate)
		}

		async fn simulate(&self, _tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
			self.counters.simulate.fetch_add(1, Ordering::SeqCst);
			Ok(vec![1, 2, 3])
		}

		async fn submit(&self, _tx: Transaction) -> Result<TransactionReceipt, DeliveryError> {
			self.counters.submit.fetch_add(1, Ordering::SeqCst);
			Ok(TransactionReceipt {
				hash: TransactionHash(vec![0xaa; 32]),
				block_number: 7,
				success: true,
			})
		}
	}

	fn tx() -> Transaction {
		Transaction::call(Address(vec![0x22; 20]), vec![0xde, 0xad])
	}

	#[tokio::test]
	async fn test_estimate_over_cap_never_submits() {
		let counters = Arc::new(Counters::default());
		let service = DeliveryService::new(
			Box::new(MockDelivery {
				estimate: 1234,
				counters: counters.clone(),
			}),
			GasGuard::fixed(U256::from(500)),
		);

		let err = service.send_guarded("verify", tx()).await.unwrap_err();
		match err {
			DeliveryError::GasCapExceeded {
				estimate,
				cap,
				ref formatted_cap,
			} => {
				assert_eq!(estimate, 1234);
				assert_eq!(cap, U256::from(500));
				assert_eq!(formatted_cap, "0.000000000000000500");
			}
			other => panic!("unexpected error: {other}"),
		}
		assert!(err.to_string().contains("1234"));
		assert_eq!(counters.simulate.load(Ordering::SeqCst), 0);
		assert_eq!(counters.submit.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_estimate_within_cap_submits() {
		let counters = Arc::new(Counters::default());
		let service = DeliveryService::new(
			Box::new(MockDelivery {
				estimate: 500,
				counters: counters.clone(),
			}),
			GasGuard::fixed(U256::from(500)),
		);

		let outcome = service.send_guarded("approve", tx()).await.unwrap();
		assert_eq!(outcome.output, vec![1, 2, 3]);
		assert!(outcome.receipt.success);
		assert_eq!(counters.submit.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_unlimited_guard_and_live_cap() {
		assert!(GasGuard::unlimited().check("x", u64::MAX, 18).await.is_ok());

		struct LiveCap(RwLock<Option<U256>>);

		#[async_trait]
		impl GasCapSource for LiveCap {
			async fn gas_cap(&self) -> Option<U256> {
				*self.0.read().await
			}
		}

		let source = Arc::new(LiveCap(RwLock::new(None)));
		let guard = GasGuard::new(source.clone());
		assert!(guard.check("x", 1_000, 18).await.is_ok());

		*source.0.write().await = Some(U256::from(999));
		assert!(guard.check("x", 1_000, 18).await.is_err());
	}
}
