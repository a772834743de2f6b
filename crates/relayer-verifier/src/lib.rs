//! On-chain report verification.
//!
//! A verifier takes the latest raw report for a feed, pays for and submits
//! its verification on the destination chain, and decodes the verified
//! payload the verifier contract or program hands back. Every transaction it
//! sends goes through the destination's [`DeliveryService`], so the gas cap
//! applies to the approval and to the verification alike.
//!
//! [`DeliveryService`]: relayer_delivery::DeliveryService

use async_trait::async_trait;
use relayer_chains::ResolvedChain;
use relayer_delivery::DeliveryError;
use relayer_types::{StreamReport, UnsupportedVersion, VerifiedReport};
use thiserror::Error;

pub mod decoder;

/// Re-export implementations
pub mod implementations {
	pub mod evm;
	pub mod solana;
}

/// Errors that can occur while verifying a report.
#[derive(Debug, Error)]
pub enum VerifierError {
	/// The report bytes do not match the expected layout.
	#[error("Decode error: {0}")]
	Decode(String),
	/// The report carries a version no layout exists for.
	#[error(transparent)]
	UnsupportedVersion(#[from] UnsupportedVersion),
	/// The fee manager, reward manager or fee token resolved to zero.
	#[error("invalid contract addresses")]
	InvalidContracts,
	#[error("LINK approval transaction was not successful")]
	ApprovalFailed,
	#[error("Verify transaction was not successful")]
	VerificationFailed,
	#[error(transparent)]
	Delivery(#[from] DeliveryError),
}

impl VerifierError {
	/// Whether retrying the whole job could succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, VerifierError::Delivery(e) if e.is_transient())
	}
}

#[async_trait]
pub trait VerifierInterface: Send + Sync {
	/// Verifies `report` on chain and returns the decoded verified payload.
	async fn verify(&self, report: &StreamReport) -> Result<VerifiedReport, VerifierError>;
}

/// Builds the verifier for a resolved destination.
pub fn create_verifier(chain: &ResolvedChain) -> Box<dyn VerifierInterface> {
	match chain {
		ResolvedChain::Evm { config, delivery } => Box::new(
			implementations::evm::EvmVerifier::new(delivery.clone(), config.verifier_proxy.clone()),
		),
		ResolvedChain::Solana { config, delivery } => {
			Box::new(implementations::solana::SolanaVerifier::new(
				delivery.clone(),
				config.verifier_program.clone(),
				config.access_controller.clone(),
			))
		},
	}
}
