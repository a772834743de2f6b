//! Verification through the verifier proxy on EVM chains.
//!
//! The proxy charges for verification through its fee manager. Before each
//! verification the relayer quotes the fee, approves the reward manager to
//! pull it in the fee token, and then calls `verify` with the fee token as
//! the parameter payload.
//!
//! The approval and the verification are separate transactions. If the
//! approval lands and the verification then fails, the allowance stays in
//! place and is not reclaimed; the next job approves again.

use crate::decoder::{decode_full_report, decode_verified, report_version};
use crate::{VerifierError, VerifierInterface};
use alloy::primitives::{Address as AlloyAddress, Bytes, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use relayer_delivery::{DeliveryError, DeliveryService};
use relayer_types::{Address, StreamReport, Transaction, VerifiedReport};
use std::sync::Arc;

sol! {
	interface IVerifierProxy {
		function verify(bytes calldata payload, bytes calldata parameterPayload) external payable returns (bytes memory verifierResponse);
		function s_feeManager() external view returns (address);
	}

	struct Asset {
		address assetAddress;
		uint256 amount;
	}

	interface IFeeManager {
		function getFeeAndReward(address subscriber, bytes memory unverifiedReport, address quoteAddress) external returns (Asset memory fee, Asset memory reward, uint256 totalDiscount);
		function i_rewardManager() external view returns (address);
		function i_linkAddress() external view returns (address);
	}

	interface IERC20 {
		function approve(address spender, uint256 amount) external returns (bool);
	}
}

fn to_alloy(address: &Address) -> Result<AlloyAddress, VerifierError> {
	AlloyAddress::try_from(address)
		.map_err(|e| VerifierError::Delivery(DeliveryError::InvalidTransaction(e)))
}

fn decode_output<T: SolValue + From<<T::SolType as alloy::sol_types::SolType>::RustType>>(
	label: &str,
	output: &[u8],
) -> Result<T, VerifierError> {
	T::abi_decode(output)
		.map_err(|e| VerifierError::Decode(format!("Unexpected {} output: {}", label, e)))
}

/// Contracts the fee flow touches, resolved from the proxy on every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeContracts {
	pub fee_manager: AlloyAddress,
	pub reward_manager: AlloyAddress,
	pub fee_token: AlloyAddress,
}

pub struct EvmVerifier {
	delivery: Arc<DeliveryService>,
	proxy: Address,
}

impl EvmVerifier {
	pub fn new(delivery: Arc<DeliveryService>, proxy: Address) -> Self {
		Self { delivery, proxy }
	}

	async fn read_address(
		&self,
		label: &str,
		target: AlloyAddress,
		data: Vec<u8>,
	) -> Result<AlloyAddress, VerifierError> {
		let output = self
			.delivery
			.call(&Transaction::call(target.into(), data))
			.await?;
		decode_output::<AlloyAddress>(label, &output)
	}

	/// Walks proxy → fee manager → reward manager and fee token.
	pub async fn fee_contracts(&self) -> Result<FeeContracts, VerifierError> {
		let proxy = to_alloy(&self.proxy)?;

		let fee_manager = self
			.read_address(
				"s_feeManager",
				proxy,
				IVerifierProxy::s_feeManagerCall {}.abi_encode(),
			)
			.await?;
		if fee_manager.is_zero() {
			tracing::error!(proxy = %proxy, "Verifier proxy has no fee manager");
			return Err(VerifierError::InvalidContracts);
		}

		let reward_manager = self
			.read_address(
				"i_rewardManager",
				fee_manager,
				IFeeManager::i_rewardManagerCall {}.abi_encode(),
			)
			.await?;
		let fee_token = self
			.read_address(
				"i_linkAddress",
				fee_manager,
				IFeeManager::i_linkAddressCall {}.abi_encode(),
			)
			.await?;

		if reward_manager.is_zero() || fee_token.is_zero() {
			tracing::error!(
				fee_manager = %fee_manager,
				reward_manager = %reward_manager,
				fee_token = %fee_token,
				"invalid contract addresses"
			);
			return Err(VerifierError::InvalidContracts);
		}

		Ok(FeeContracts {
			fee_manager,
			reward_manager,
			fee_token,
		})
	}

	/// Fee owed in the fee token for verifying `blob`.
	pub async fn quote_fee(
		&self,
		contracts: &FeeContracts,
		blob: &Bytes,
	) -> Result<U256, VerifierError> {
		let subscriber = to_alloy(&self.delivery.signer())?;
		let call = IFeeManager::getFeeAndRewardCall {
			subscriber,
			unverifiedReport: blob.clone(),
			quoteAddress: contracts.fee_token,
		};
		let output = self
			.delivery
			.call(&Transaction::call(contracts.fee_manager.into(), call.abi_encode()))
			.await?;
		let (fee, _reward, _discount) = decode_output::<(Asset, Asset, U256)>("getFeeAndReward", &output)?;
		Ok(fee.amount)
	}

	async fn approve(&self, contracts: &FeeContracts, amount: U256) -> Result<(), VerifierError> {
		let call = IERC20::approveCall {
			spender: contracts.reward_manager,
			amount,
		};
		let outcome = self
			.delivery
			.send_guarded(
				"approve",
				Transaction::call(contracts.fee_token.into(), call.abi_encode()),
			)
			.await?;

		if !outcome.receipt.success {
			tracing::error!(
				tx_hash = %outcome.receipt.hash.truncated(),
				"LINK approval transaction was not successful"
			);
			return Err(VerifierError::ApprovalFailed);
		}

		tracing::info!(
			tx_hash = %outcome.receipt.hash.truncated(),
			amount = %amount,
			"Approved verification fee"
		);
		Ok(())
	}
}

#[async_trait]
impl VerifierInterface for EvmVerifier {
	async fn verify(&self, report: &StreamReport) -> Result<VerifiedReport, VerifierError> {
		let (_, blob) = decode_full_report(&report.raw_report)?;
		let version = report_version(&blob)?;

		let contracts = self.fee_contracts().await?;
		let fee = self.quote_fee(&contracts, &blob).await?;
		tracing::debug!(feed_id = %report.feed_id, fee = %fee, "Quoted verification fee");

		self.approve(&contracts, fee).await?;

		let call = IVerifierProxy::verifyCall {
			payload: report.raw_report.clone(),
			parameterPayload: contracts.fee_token.abi_encode().into(),
		};
		let outcome = self
			.delivery
			.send_guarded(
				"verify",
				Transaction::call(self.proxy.clone(), call.abi_encode()),
			)
			.await?;

		if !outcome.receipt.success {
			tracing::error!(
				feed_id = %report.feed_id,
				tx_hash = %outcome.receipt.hash.truncated(),
				"Verify transaction was not successful after fee approval"
			);
			return Err(VerifierError::VerificationFailed);
		}

		let verified = decode_output::<Bytes>("verify", &outcome.output)?;
		let decoded = decode_verified(version, &verified)?;

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

#[cfg(test)]
mod tests {
	use super::*;
	use crate::decoder::tests::{full_report, v3_blob};
	use alloy::primitives::I256;
	use relayer_delivery::{DeliveryInterface, GasGuard};
	use relayer_types::{TransactionHash, TransactionReceipt};
	use std::sync::Mutex;

	const PROXY: AlloyAddress = AlloyAddress::new([0x01; 20]);
	const FEE_MANAGER: AlloyAddress = AlloyAddress::new([0x02; 20]);
	const REWARD_MANAGER: AlloyAddress = AlloyAddress::new([0x03; 20]);
	const LINK: AlloyAddress = AlloyAddress::new([0x04; 20]);

	/// Chain double answering by function selector.
	struct MockChain {
		fee_manager: AlloyAddress,
		approve_succeeds: bool,
		verified: Vec<u8>,
		/// Selectors of every state-changing call, per stage.
		sent: Arc<Mutex<Vec<(&'static str, [u8; 4])>>>,
	}

	fn selector(data: &[u8]) -> [u8; 4] {
		data[..4].try_into().unwrap()
	}

	#[async_trait]
	impl DeliveryInterface for MockChain {
		fn signer(&self) -> Address {
			Address(vec![0xaa; 20])
		}

		fn native_decimals(&self) -> u8 {
			18
		}

		async fn call(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
			let sel = selector(&tx.data);
			let output = if sel == IVerifierProxy::s_feeManagerCall::SELECTOR {
				self.fee_manager.abi_encode()
			} else if sel == IFeeManager::i_rewardManagerCall::SELECTOR {
				REWARD_MANAGER.abi_encode()
			} else if sel == IFeeManager::i_linkAddressCall::SELECTOR {
				LINK.abi_encode()
			} else if sel == IFeeManager::getFeeAndRewardCall::SELECTOR {
				let fee = Asset {
					assetAddress: LINK,
					amount: U256::from(777u64),
				};
				let reward = fee.clone();
				(fee, reward, U256::ZERO).abi_encode()
			} else {
				panic!("unexpected read {:?}", sel)
			};
			Ok(output)
		}

		async fn estimate(&self, tx: &Transaction) -> Result<u64, DeliveryError> {
			self.sent.lock().unwrap().push(("estimate", selector(&tx.data)));
			Ok(21_000)
		}

		async fn simulate(&self, tx: &Transaction) -> Result<Vec<u8>, DeliveryError> {
			self.sent.lock().unwrap().push(("simulate", selector(&tx.data)));
			if selector(&tx.data) == IVerifierProxy::verifyCall::SELECTOR {
				Ok((Bytes::from(self.verified.clone()),).abi_encode_params())
			} else {
				Ok(true.abi_encode())
			}
		}

		async fn submit(&self, tx: Transaction) -> Result<TransactionReceipt, DeliveryError> {
			let sel = selector(&tx.data);
			self.sent.lock().unwrap().push(("submit", sel));
			let success = sel != IERC20::approveCall::SELECTOR || self.approve_succeeds;
			Ok(TransactionReceipt {
				hash: TransactionHash(vec![0xbb; 32]),
				block_number: 1,
				success,
			})
		}
	}

	fn verifier(chain: MockChain) -> EvmVerifier {
		EvmVerifier::new(
			Arc::new(DeliveryService::new(Box::new(chain), GasGuard::unlimited())),
			PROXY.into(),
		)
	}

	fn stream_report() -> StreamReport {
		crate::decoder::decode_stream_report(&full_report(v3_blob(5_000))).unwrap()
	}

	#[tokio::test]
	async fn test_quote_approve_verify() {
		let sent = Arc::new(Mutex::new(Vec::new()));
		let verifier = verifier(MockChain {
			fee_manager: FEE_MANAGER,
			approve_succeeds: true,
			verified: v3_blob(5_000),
			sent: sent.clone(),
		});

		let report = verifier.verify(&stream_report()).await.unwrap();
		assert_eq!(report.price(), I256::try_from(5_000).unwrap());

		let submitted: Vec<[u8; 4]> = sent
			.lock()
			.unwrap()
			.iter()
			.filter(|(stage, _)| *stage == "submit")
			.map(|(_, sel)| *sel)
			.collect();
		assert_eq!(
			submitted,
			vec![IERC20::approveCall::SELECTOR, IVerifierProxy::verifyCall::SELECTOR]
		);
	}

	#[tokio::test]
	async fn test_failed_approval_stops_before_verify() {
		let sent = Arc::new(Mutex::new(Vec::new()));
		let verifier = verifier(MockChain {
			fee_manager: FEE_MANAGER,
			approve_succeeds: false,
			verified: v3_blob(5_000),
			sent: sent.clone(),
		});

		let err = verifier.verify(&stream_report()).await.unwrap_err();
		assert!(matches!(err, VerifierError::ApprovalFailed));
		assert_eq!(err.to_string(), "LINK approval transaction was not successful");
		assert!(sent
			.lock()
			.unwrap()
			.iter()
			.all(|(_, sel)| *sel != IVerifierProxy::verifyCall::SELECTOR));
	}

	#[tokio::test]
	async fn test_zero_fee_manager_aborts() {
		let sent = Arc::new(Mutex::new(Vec::new()));
		let verifier = verifier(MockChain {
			fee_manager: AlloyAddress::ZERO,
			approve_succeeds: true,
			verified: vec![],
			sent: sent.clone(),
		});

		let err = verifier.verify(&stream_report()).await.unwrap_err();
		assert_eq!(err.to_string(), "invalid contract addresses");
		assert!(sent.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_quote_reads_fee_amount() {
		let verifier = verifier(MockChain {
			fee_manager: FEE_MANAGER,
			approve_succeeds: true,
			verified: vec![],
			sent: Arc::new(Mutex::new(Vec::new())),
		});

		let contracts = verifier.fee_contracts().await.unwrap();
		assert_eq!(contracts.reward_manager, REWARD_MANAGER);
		assert_eq!(contracts.fee_token, LINK);
		let fee = verifier
			.quote_fee(&contracts, &Bytes::from(v3_blob(1)))
			.await
			.unwrap();
		assert_eq!(fee, U256::from(777u64));
	}
}
