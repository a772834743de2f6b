//! Final write of a verified report to its destination.
//!
//! The executor binds the configured report fields, encodes the call for
//! the destination family and sends it through the destination's
//! [`DeliveryService`](relayer_delivery::DeliveryService). A receipt is
//! returned only for a successful transaction.

use async_trait::async_trait;
use relayer_chains::ResolvedChain;
use relayer_delivery::DeliveryError;
use relayer_types::{AccountMeta, Address, ReportVersion, TransactionHash, TransactionReceipt, VerifiedReport};
use thiserror::Error;

pub mod binding;

/// Re-export implementations
pub mod implementations {
	pub mod evm;
	pub mod solana;
}

pub use binding::{FieldValue, ReportField, TargetConfig};

#[derive(Debug, Error)]
pub enum ExecutorError {
	#[error("Unknown report field: {0}")]
	UnknownField(String),
	#[error("Field {field} is not part of {version} reports")]
	FieldUnavailable {
		field: &'static str,
		version: ReportVersion,
	},
	#[error("Cannot pass {field} as {expected}")]
	TypeMismatch {
		field: &'static str,
		expected: String,
	},
	#[error("Invalid target configuration: {0}")]
	Config(String),
	#[error("Transaction {0} was not successful")]
	TransactionFailed(TransactionHash),
	#[error(transparent)]
	Delivery(#[from] DeliveryError),
}

impl ExecutorError {
	pub fn is_transient(&self) -> bool {
		matches!(self, ExecutorError::Delivery(e) if e.is_transient())
	}
}

/// Fully resolved destination of one write.
#[derive(Debug, Clone)]
pub struct WriteTarget {
	pub target: TargetConfig,
	/// Contract address (EVM) or program id (Solana) for this feed.
	pub contract: Address,
	/// Instruction accounts after the signer. Empty on EVM chains.
	pub accounts: Vec<AccountMeta>,
}

#[async_trait]
pub trait ExecutorInterface: Send + Sync {
	/// Writes `report` to the destination and returns the successful receipt.
	async fn execute(
		&self,
		report: &VerifiedReport,
		target: &WriteTarget,
	) -> Result<TransactionReceipt, ExecutorError>;
}

/// Builds the executor for a resolved destination.
pub fn create_executor(chain: &ResolvedChain) -> Box<dyn ExecutorInterface> {
	match chain {
		ResolvedChain::Evm { delivery, .. } => {
			Box::new(implementations::evm::EvmExecutor::new(delivery.clone()))
		},
		ResolvedChain::Solana { delivery, .. } => {
			Box::new(implementations::solana::SolanaExecutor::new(delivery.clone()))
		},
	}
}
