//! Alloy-based delivery for EVM chains.
//!
//! The provider carries the signing wallet, so `submit` only has to hand a
//! transaction request to the node and wait for the receipt.

use crate::{DeliveryError, DeliveryInterface};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::Address as AlloyAddress;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::{local::PrivateKeySigner, Signer};
use alloy::transports::{http::reqwest::Url, RpcError, TransportErrorKind};
use async_trait::async_trait;
use relayer_types::{Address, Transaction, TransactionHash, TransactionReceipt};
use std::time::Duration;

/// Maps a node error to a delivery error. A JSON-RPC error response means
/// the node evaluated the call and rejected it; anything else is transport.
fn classify(context: &str, e: RpcError<TransportErrorKind>) -> DeliveryError {
	match e {
		RpcError::ErrorResp(payload) => {
			DeliveryError::Simulation(format!("{}: {}", context, payload))
		},
		other => DeliveryError::Network(format!("{}: {}", context, other)),
	}
}

pub struct AlloyDelivery {
	provider: DynProvider,
	from: AlloyAddress,
	confirmations: u64,
	receipt_timeout: Duration,
}

impl AlloyDelivery {
	pub fn new(
		rpc_url: &str,
		chain_id: u64,
		signer: PrivateKeySigner,
		confirmations: u64,
		receipt_timeout: Duration,
	) -> Result<Self, DeliveryError> {
		let url: Url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::Network(format!("Invalid RPC URL: {}", e)))?;

		let signer = signer.with_chain_id(Some(chain_id));
		let from = signer.address();

		let provider = ProviderBuilder::new()
			.wallet(EthereumWallet::from(signer))
			.connect_http(url)
			.erased();

		Ok(Self {
			provider,
			from,
			confirmations,
			receipt_timeout,
		})
	}

	fn request(&self, tx: &Transaction) -> Result<TransactionRequest, DeliveryError> {
		let to = AlloyAddress::try_from(&tx.to).map_err(DeliveryError::InvalidTransaction)?;
		Ok(TransactionRequest::default()
			.with_from(self.from)
			.with_to(to)
			.with_input(tx.data.clone())
			.with_value(tx.value))
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn signer(&self) -> Address {
		self.from.into()
	}

	fn native_decimals(&self) -> u8 {
		18
	}

	async fn call(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
		let output = self
			.provider
			.call(self.request(tx)?)
			.await
			.map_err(|e| classify("Call failed", e))?;
		Ok(output.to_vec())
	}

	async fn estimate(&self, tx: &Transaction) -> Result<u64, DeliveryError> {
		self.provider
			.estimate_gas(self.request(tx)?)
			.await
			.map_err(|e| classify("Gas estimation failed", e))
	}

	async fn simulate(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
		let output = self
			.provider
			.call(self.request(tx)?)
			.await
			.map_err(|e| classify("Simulation reverted", e))?;
		Ok(output.to_vec())
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionReceipt, DeliveryError> {
		let request = self.request(&tx)?;

		let pending = self
			.provider
			.send_transaction(request)
			.await
			.map_err(|e| classify("Failed to send transaction", e))?;

		let hash = TransactionHash(pending.tx_hash().0.to_vec());
		tracing::info!(tx_hash = %hash.truncated(), "Submitted transaction");

		let receipt = pending
			.with_required_confirmations(self.confirmations)
			.with_timeout(Some(self.receipt_timeout))
			.get_receipt()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get receipt: {}", e)))?;

		Ok(TransactionReceipt {
			hash: TransactionHash(receipt.transaction_hash.0.to_vec()),
			block_number: receipt.block_number.unwrap_or(0),
			success: receipt.status(),
		})
	}
}
