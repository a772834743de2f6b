//! Verification through the verifier program on Solana clusters.
//!
//! There is no fee quote or approval step; access is granted through the
//! access-controller account. The verified payload comes back as the
//! program's return data, read from the simulation that precedes
//! submission.

use crate::decoder::{decode_full_report, decode_verified, report_version};
use crate::{VerifierError, VerifierInterface};
use async_trait::async_trait;
use relayer_delivery::{
	implementations::solana::anchor_discriminator, DeliveryError, DeliveryService,
};
use relayer_types::{AccountMeta, Address, StreamReport, Transaction, VerifiedReport};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

fn pubkey(address: &Address) -> Result<Pubkey, VerifierError> {
	Pubkey::try_from(address.0.as_slice()).map_err(|_| {
		VerifierError::Delivery(DeliveryError::InvalidTransaction(format!(
			"{} is not a 32-byte public key",
			address
		)))
	})
}

fn address(key: Pubkey) -> Address {
	Address(key.to_bytes().to_vec())
}

pub struct SolanaVerifier {
	delivery: Arc<DeliveryService>,
	program: Address,
	access_controller: Address,
}

impl SolanaVerifier {
	pub fn new(delivery: Arc<DeliveryService>, program: Address, access_controller: Address) -> Self {
		Self {
			delivery,
			program,
			access_controller,
		}
	}

	/// Builds the `verify` instruction for a full report.
	///
	/// Accounts, in order: verifier state, access controller, signer, and
	/// the config account derived from the report's first context word.
	pub fn verify_instruction(&self, full_report: &[u8]) -> Result<Transaction, VerifierError> {
		if full_report.len() < 32 {
			return Err(VerifierError::Decode("Report is too short".into()));
		}
		let program_id = pubkey(&self.program)?;
		let (verifier_state, _) = Pubkey::find_program_address(&[b"verifier"], &program_id);
		let (config, _) = Pubkey::find_program_address(&[&full_report[..32]], &program_id);

		// Borsh `Vec<u8>`: u32 little-endian length then the bytes.
		let mut data = Vec::with_capacity(8 + 4 + full_report.len());
		data.extend_from_slice(&anchor_discriminator("verify"));
		data.extend_from_slice(&(full_report.len() as u32).to_le_bytes());
		data.extend_from_slice(full_report);

		Ok(Transaction::call(self.program.clone(), data).with_accounts(vec![
			AccountMeta::readonly(address(verifier_state)),
			AccountMeta::readonly(self.access_controller.clone()),
			AccountMeta::signer(self.delivery.signer()),
			AccountMeta::readonly(address(config)),
		]))
	}
}

#[async_trait]
impl VerifierInterface for SolanaVerifier {
	async fn verify(&self, report: &StreamReport) -> Result<VerifiedReport, VerifierError> {
		let (_, blob) = decode_full_report(&report.raw_report)?;
		let version = report_version(&blob)?;

		let tx = self.verify_instruction(&report.raw_report)?;
		let outcome = self.delivery.send_guarded("verify", tx).await?;

		if !outcome.receipt.success {
			tracing::error!(
				feed_id = %report.feed_id,
				tx_hash = %outcome.receipt.hash.truncated(),
				"Verify transaction was not successful"
			);
			return Err(VerifierError::VerificationFailed);
		}

		let decoded = decode_verified(version, &outcome.output)?;
		tracing::info!(
			feed_id = %report.feed_id,
			version = %version,
			price = %decoded.price(),
			tx_hash = %outcome.receipt.hash.truncated(),
			"Report verified"
		);
		Ok(decoded)
	}
}
