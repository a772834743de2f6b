//! Program writes on Solana clusters.
//!
//! The call is an Anchor instruction: the discriminator for
//! `function_name` followed by the Borsh encoding of each bound field. Feed
//! ids are `[u8; 32]`, timestamps and market status `u32`, fees `u128` and
//! prices `i128`. The signer is always the first account, followed by the
//! accounts configured for the feed.

use crate::binding::{FieldValue, ReportField, TargetConfig};
use crate::{ExecutorError, ExecutorInterface, WriteTarget};
use async_trait::async_trait;
use relayer_delivery::{implementations::solana::anchor_discriminator, DeliveryService};
use relayer_types::{AccountMeta, Transaction, TransactionReceipt, VerifiedReport};
use std::sync::Arc;

fn borsh_value(field: ReportField, value: FieldValue, out: &mut Vec<u8>) -> Result<(), ExecutorError> {
	match value {
		FieldValue::Bytes32(b) => out.extend_from_slice(b.as_slice()),
		FieldValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
		FieldValue::Uint(v) => {
			let v = u128::try_from(v).map_err(|_| ExecutorError::TypeMismatch {
				field: field.name(),
				expected: "u128".into(),
			})?;
			out.extend_from_slice(&v.to_le_bytes());
		},
		FieldValue::Int(v) => {
			let v = i128::try_from(v).map_err(|_| ExecutorError::TypeMismatch {
				field: field.name(),
				expected: "i128".into(),
			})?;
			out.extend_from_slice(&v.to_le_bytes());
		},
	}
	Ok(())
}

/// Instruction data for `report` against `target`.
pub fn encode_instruction(target: &TargetConfig, report: &VerifiedReport) -> Result<Vec<u8>, ExecutorError> {
	if target.function_name.is_empty() {
		return Err(ExecutorError::Config("function_name is required".into()));
	}

	let mut data = anchor_discriminator(&target.function_name).to_vec();
	for (field, value) in target.bind(report)? {
		borsh_value(field, value, &mut data)?;
	}
	Ok(data)
}

pub struct SolanaExecutor {
	delivery: Arc<DeliveryService>,
}

impl SolanaExecutor {
	pub fn new(delivery: Arc<DeliveryService>) -> Self {
		Self { delivery }
	}
}

#[async_trait]
impl ExecutorInterface for SolanaExecutor {
	async fn execute(
		&self,
		report: &VerifiedReport,
		target: &WriteTarget,
	) -> Result<TransactionReceipt, ExecutorError> {
		let data = encode_instruction(&target.target, report)?;

		let mut accounts = Vec::with_capacity(target.accounts.len() + 1);
		accounts.push(AccountMeta::signer(self.delivery.signer()));
		accounts.extend(target.accounts.iter().cloned());

		let tx = Transaction::call(target.contract.clone(), data).with_accounts(accounts);
		let outcome = self.delivery.send_guarded("write", tx).await?;

		if !outcome.receipt.success {
			return Err(ExecutorError::TransactionFailed(outcome.receipt.hash));
		}

		tracing::info!(
			feed_id = %report.feed_id(),
			program = %target.contract,
			instruction = %target.target.function_name,
			tx_hash = %outcome.receipt.hash.truncated(),
			"Wrote report"
		);
		Ok(outcome.receipt)
	}
}
