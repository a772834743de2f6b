//! Delivery for Solana clusters.
//!
//! A [`Transaction`] maps onto a single instruction: `to` is the program id,
//! `data` the instruction data and `accounts` the account metas. The payer
//! keypair signs and pays for every transaction. Estimates are the compute
//! units consumed by a simulation.

use crate::{DeliveryError, DeliveryInterface};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use relayer_types::{Address, Transaction, TransactionHash, TransactionReceipt};
use solana_client::{
	client_error::ClientError, nonblocking::rpc_client::RpcClient,
	rpc_response::RpcSimulateTransactionResult,
};
use solana_sdk::{
	commitment_config::CommitmentConfig,
	hash::hash,
	instruction::{AccountMeta, Instruction},
	pubkey::Pubkey,
	signature::{Keypair, Signer},
	transaction::Transaction as SolanaTransaction,
};
use std::sync::Arc;

fn network(context: &str, e: ClientError) -> DeliveryError {
	DeliveryError::Network(format!("{}: {}", context, e))
}

fn pubkey(address: &Address) -> Result<Pubkey, DeliveryError> {
	Pubkey::try_from(address.0.as_slice()).map_err(|_| {
		DeliveryError::InvalidTransaction(format!("{} is not a 32-byte public key", address))
	})
}

/// Anchor instruction discriminator: the first eight bytes of
/// `sha256("global:<name>")`.
pub fn anchor_discriminator(name: &str) -> [u8; 8] {
	let digest = hash(format!("global:{}", name).as_bytes());
	let mut out = [0u8; 8];
	out.copy_from_slice(&digest.to_bytes()[..8]);
	out
}

/// Builds the instruction a [`Transaction`] describes.
pub fn instruction(tx: &Transaction) -> Result<Instruction, DeliveryError> {
	let program_id = pubkey(&tx.to)?;
	let accounts = tx
		.accounts
		.iter()
		.map(|meta| {
			Ok(AccountMeta {
				pubkey: pubkey(&meta.address)?,
				is_signer: meta.is_signer,
				is_writable: meta.is_writable,
			})
		})
		.collect::<Result<Vec<_>, DeliveryError>>()?;

	Ok(Instruction::new_with_bytes(program_id, &tx.data, accounts))
}

pub struct SolanaDelivery {
	rpc: RpcClient,
	payer: Arc<Keypair>,
}

impl SolanaDelivery {
	pub fn new(rpc_url: &str, payer: Arc<Keypair>) -> Self {
		Self {
			rpc: RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed()),
			payer,
		}
	}

	async fn build(&self, tx: &Transaction) -> Result<SolanaTransaction, DeliveryError> {
		let ix = instruction(tx)?;
		let blockhash = self
			.rpc
			.get_latest_blockhash()
			.await
			.map_err(|e| network("Failed to fetch blockhash", e))?;

		Ok(SolanaTransaction::new_signed_with_payer(
			&[ix],
			Some(&self.payer.pubkey()),
			&[self.payer.as_ref()],
			blockhash,
		))
	}

	async fn run_simulation(
		&self,
		tx: &Transaction,
	) -> Result<RpcSimulateTransactionResult, DeliveryError> {
		let signed = self.build(tx).await?;
		let result = self
			.rpc
			.simulate_transaction(&signed)
			.await
			.map_err(|e| network("Simulation request failed", e))?
			.value;

		if let Some(err) = &result.err {
			let logs = result.logs.clone().unwrap_or_default();
			return Err(DeliveryError::Simulation(format!(
				"{:?}; logs: {}",
				err,
				logs.join(" | ")
			)));
		}
		Ok(result)
	}
}

#[async_trait]
impl DeliveryInterface for SolanaDelivery {
	fn signer(&self) -> Address {
		Address(self.payer.pubkey().to_bytes().to_vec())
	}

	fn native_decimals(&self) -> u8 {
		9
	}

	async fn call(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
		self.simulate(tx).await
	}

	async fn estimate(&self, tx: &Transaction) -> Result<u64, DeliveryError> {
		Ok(self.run_simulation(tx).await?.units_consumed.unwrap_or(0))
	}

	async fn simulate(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
		let result = self.run_simulation(tx).await?;
		match result.return_data {
			Some(return_data) => STANDARD.decode(&return_data.data.0).map_err(|e| {
				DeliveryError::Simulation(format!("Return data is not base64: {}", e))
			}),
			None => Ok(Vec::new()),
		}
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionReceipt, DeliveryError> {
		let signed = self.build(&tx).await?;
		let signature = signed.signatures.first().copied().unwrap_or_default();
		let hash = TransactionHash(signature.as_ref().to_vec());
		tracing::info!(tx_hash = %hash.truncated(), "Submitted transaction");

		match self.rpc.send_and_confirm_transaction(&signed).await {
			Ok(_) => {
				let slot = self.rpc.get_slot().await.unwrap_or_default();
				Ok(TransactionReceipt {
					hash,
					block_number: slot,
					success: true,
				})
			},
			// Landed but failed on chain.
			Err(e) if e.get_transaction_error().is_some() => {
				tracing::warn!(tx_hash = %hash.truncated(), error = %e, "Transaction failed");
				Ok(TransactionReceipt {
					hash,
					block_number: 0,
					success: false,
				})
			},
			Err(e) => Err(network("Failed to send transaction", e)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use relayer_types::AccountMeta as RelayerAccountMeta;

	#[test]
	fn test_instruction_preserves_account_order() {
		let program = Pubkey::new_unique();
		let first = Pubkey::new_unique();
		let second = Pubkey::new_unique();

		let tx = Transaction::call(Address(program.to_bytes().to_vec()), vec![1, 2, 3]).with_accounts(
			vec![
				RelayerAccountMeta::writable(Address(first.to_bytes().to_vec())),
				RelayerAccountMeta::signer(Address(second.to_bytes().to_vec())),
			],
		);

		let ix = instruction(&tx).unwrap();
		assert_eq!(ix.program_id, program);
		assert_eq!(ix.data, vec![1, 2, 3]);
		assert_eq!(ix.accounts[0].pubkey, first);
		assert!(ix.accounts[0].is_writable && !ix.accounts[0].is_signer);
		assert_eq!(ix.accounts[1].pubkey, second);
		assert!(ix.accounts[1].is_signer);
	}

	#[test]
	fn test_rejects_evm_sized_program_id() {
		let tx = Transaction::call(Address(vec![0x22; 20]), vec![]);
		assert!(matches!(
			instruction(&tx),
			Err(DeliveryError::InvalidTransaction(_))
		));
	}

	#[test]
	fn test_anchor_discriminator() {
		// sha256("global:initialize")[..8]
		assert_eq!(
			anchor_discriminator("initialize"),
			[0xaf, 0xaf, 0x6d, 0x1f, 0x0d, 0x98, 0x9b, 0xed]
		);
	}

	#[test]
	fn test_signer_is_payer() {
		let payer = Arc::new(Keypair::new());
		let delivery = SolanaDelivery::new("http://localhost:8899", payer.clone());
		assert_eq!(delivery.signer().0, payer.pubkey().to_bytes().to_vec());
		assert_eq!(delivery.native_decimals(), 9);
	}
}
