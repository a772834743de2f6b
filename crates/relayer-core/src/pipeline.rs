//! Dispatch pipeline: verify the latest report and write it on-chain.

use crate::gate;
use crate::limiter::{DispatchJob, JobHandler};
use crate::settings::{Destination, Settings};
use crate::{ReportCache, RelayerError};
use async_trait::async_trait;
use relayer_chains::{ChainFamilyKind, ChainRegistry};
use relayer_executor::{create_executor, ExecutorInterface, WriteTarget};
use relayer_types::{
	DispatchEvent, EventBus, PipelineState, RelayerEvent, ReportVersion,
};
use relayer_verifier::{create_verifier, VerifierInterface};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verifier and executor for the destination writes currently go to.
#[derive(Clone)]
pub struct ChainFamily {
	pub kind: ChainFamilyKind,
	/// Chain id or cluster name, used to look up the target and contracts.
	pub key: String,
	pub verifier: Arc<dyn VerifierInterface>,
	pub executor: Arc<dyn ExecutorInterface>,
}

/// Picks the active destination for a job.
#[async_trait]
pub trait FamilyResolver: Send + Sync {
	async fn resolve(&self) -> Result<ChainFamily, RelayerError>;
}

/// Resolves the destination named by the live settings against the chain
/// registry. Read per job, so a settings change applies to the next job.
pub struct RegistryResolver {
	registry: Arc<ChainRegistry>,
	settings: Arc<Settings>,
}

impl RegistryResolver {
	pub fn new(registry: Arc<ChainRegistry>, settings: Arc<Settings>) -> Self {
		Self { registry, settings }
	}
}

#[async_trait]
impl FamilyResolver for RegistryResolver {
	async fn resolve(&self) -> Result<ChainFamily, RelayerError> {
		let chain = match self.settings.destination().await? {
			Destination::Evm(chain_id) => self.registry.resolve_evm(chain_id)?,
			Destination::Solana(cluster) => self.registry.resolve_solana(&cluster)?,
		};

		Ok(ChainFamily {
			kind: chain.kind(),
			key: chain.key(),
			verifier: Arc::from(create_verifier(&chain)),
			executor: Arc::from(create_executor(&chain)),
		})
	}
}

pub struct Pipeline {
	settings: Arc<Settings>,
	cache: Arc<ReportCache>,
	resolver: Arc<dyn FamilyResolver>,
	event_bus: EventBus,
}

impl Pipeline {
	pub fn new(
		settings: Arc<Settings>,
		cache: Arc<ReportCache>,
		resolver: Arc<dyn FamilyResolver>,
		event_bus: EventBus,
	) -> Self {
		Self {
			settings,
			cache,
			resolver,
			event_bus,
		}
	}

	fn transition(&self, job: &DispatchJob, state: PipelineState) {
		debug!(job_id = %job.id, feed_id = %job.feed_id, %state, "Dispatch transition");
		self.event_bus
			.publish(RelayerEvent::Dispatch(DispatchEvent::Transition {
				job_id: job.id.clone(),
				feed_id: job.feed_id,
				state,
			}));
	}

	fn abort(&self, job: &DispatchJob, stage: &str, error: impl Display) -> PipelineState {
		warn!(
			job_id = %job.id,
			feed_id = %job.feed_id,
			stage,
			error = %error,
			"Dispatch aborted"
		);
		self.transition(job, PipelineState::Aborted);
		PipelineState::Aborted
	}

	/// Runs one job to a terminal state.
	///
	/// The report used is whatever is cached when the job runs, not when it
	/// was queued, and it is gated again against the last written price.
	pub async fn run(&self, job: &DispatchJob) -> Result<PipelineState, RelayerError> {
		self.transition(job, PipelineState::Received);

		let Some(report) = self.cache.latest(&job.feed_id) else {
			return Ok(self.abort(job, "received", "no report cached for feed"));
		};

		let last_written = self.settings.last_written_price(&job.feed_id).await?;
		let price_delta = self.settings.price_delta().await?;
		let decision = gate::evaluate(report.price, last_written, price_delta);
		if !decision.should_dispatch() {
			debug!(
				job_id = %job.id,
				feed_id = %job.feed_id,
				diff = %decision.diff(),
				"Price no longer deviates, skipping"
			);
			self.transition(job, PipelineState::Filtered);
			return Ok(PipelineState::Filtered);
		}

		let version = match ReportVersion::try_from(report.feed_id.schema_version()) {
			Ok(version) => version,
			Err(e) => return Ok(self.abort(job, "received", e)),
		};

		let family = match self.resolver.resolve().await {
			Ok(family) => family,
			Err(RelayerError::Storage(e)) => return Err(e.into()),
			Err(e) => return Ok(self.abort(job, "resolve", e)),
		};

		let Some(target) = self.settings.target(&family.key).await? else {
			return Ok(self.abort(
				job,
				"resolve",
				format!("no write target configured for {}", family.key),
			));
		};
		if let Err(e) = target.validate_for(version) {
			return Ok(self.abort(job, "resolve", e));
		}
		let Some(contract) = self.settings.contract(&job.feed_id, &family.key).await? else {
			return Ok(self.abort(
				job,
				"resolve",
				format!("no contract configured on {}", family.key),
			));
		};
		let write_target = WriteTarget {
			target,
			contract: contract.address,
			accounts: contract.accounts,
		};

		self.transition(job, PipelineState::Verifying);
		let verified = match family.verifier.verify(&report).await {
			Ok(verified) => verified,
			Err(e) if e.is_transient() => return Err(e.into()),
			Err(e) => return Ok(self.abort(job, "verifying", e)),
		};
		self.transition(job, PipelineState::Verified);

		self.transition(job, PipelineState::Executing);
		let receipt = match family.executor.execute(&verified, &write_target).await {
			Ok(receipt) => receipt,
			Err(e) if e.is_transient() => return Err(e.into()),
			Err(e) => return Ok(self.abort(job, "executing", e)),
		};

		let price = verified.price();
		if let Err(e) = self.settings.set_last_written_price(&job.feed_id, price).await {
			tracing::error!(
				feed_id = %job.feed_id,
				error = %e,
				"Write confirmed but last written price was not stored"
			);
		}

		info!(
			job_id = %job.id,
			feed_id = %job.feed_id,
			chain = %family.key,
			tx_hash = %receipt.hash.truncated(),
			%price,
			"Report written"
		);
		self.event_bus
			.publish(RelayerEvent::Dispatch(DispatchEvent::Written {
				job_id: job.id.clone(),
				feed_id: job.feed_id,
				tx_hash: receipt.hash,
				price,
			}));
		self.transition(job, PipelineState::Confirmed);
		Ok(PipelineState::Confirmed)
	}
}

#[async_trait]
impl JobHandler for Pipeline {
	async fn handle(&self, job: &DispatchJob) -> Result<PipelineState, RelayerError> {
		self.run(job).await
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::settings::ContractRecord;
	use alloy::primitives::{Bytes, I256, U256};
	use relayer_delivery::DeliveryError;
	use relayer_executor::{ExecutorError, TargetConfig};
	use relayer_storage::{implementations::memory::MemoryStorage, StorageService};
	use relayer_types::{
		Address, FeedId, StreamReport, TransactionHash, TransactionReceipt, V3Report,
		VerifiedReport,
	};
	use relayer_verifier::VerifierError;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;

	pub(crate) const CHAIN: &str = "421614";

	pub(crate) fn feed_id() -> FeedId {
		"0x000359843a543ee2fe414dc14c7e7920ef10f4372990b79d6361cdc0dd1ba782"
			.parse()
			.unwrap()
	}

	pub(crate) fn price(value: &str) -> I256 {
		I256::from_dec_str(value).unwrap()
	}

	pub(crate) fn stream_report(price: I256) -> StreamReport {
		StreamReport {
			feed_id: feed_id(),
			raw_report: Bytes::from(vec![0xaa; 8]),
			valid_from_timestamp: 1_700_000_000,
			observations_timestamp: 1_700_000_000,
			native_fee: U256::from(1u64),
			link_fee: U256::from(2u64),
			expires_at: 1_700_086_400,
			price,
		}
	}

	/// Verifies whatever it is given, or fails with a canned error.
	#[derive(Default)]
	pub(crate) struct MockVerifier {
		pub calls: AtomicUsize,
		pub fail: Mutex<Option<fn() -> VerifierError>>,
	}

	#[async_trait]
	impl VerifierInterface for MockVerifier {
		async fn verify(&self, report: &StreamReport) -> Result<VerifiedReport, VerifierError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if let Some(fail) = *self.fail.lock().unwrap() {
				return Err(fail());
			}
			Ok(VerifiedReport::V3(V3Report {
				feed_id: report.feed_id,
				valid_from_timestamp: report.valid_from_timestamp,
				observations_timestamp: report.observations_timestamp,
				native_fee: report.native_fee,
				link_fee: report.link_fee,
				expires_at: report.expires_at,
				benchmark_price: report.price,
				bid: report.price,
				ask: report.price,
			}))
		}
	}

	/// Records writes, or fails with a canned error.
	#[derive(Default)]
	pub(crate) struct MockExecutor {
		pub writes: Mutex<Vec<(I256, Address)>>,
		pub fail: Mutex<Option<fn() -> ExecutorError>>,
	}

	#[async_trait]
	impl ExecutorInterface for MockExecutor {
		async fn execute(
			&self,
			report: &VerifiedReport,
			target: &WriteTarget,
		) -> Result<TransactionReceipt, ExecutorError> {
			target.target.bind(report)?;
			if let Some(fail) = *self.fail.lock().unwrap() {
				return Err(fail());
			}
			self.writes
				.lock()
				.unwrap()
				.push((report.price(), target.contract.clone()));
			Ok(TransactionReceipt {
				hash: TransactionHash(vec![0xab; 32]),
				block_number: 1,
				success: true,
			})
		}
	}

	pub(crate) struct FixedResolver {
		pub verifier: Arc<MockVerifier>,
		pub executor: Arc<MockExecutor>,
	}

	#[async_trait]
	impl FamilyResolver for FixedResolver {
		async fn resolve(&self) -> Result<ChainFamily, RelayerError> {
			Ok(ChainFamily {
				kind: ChainFamilyKind::Evm,
				key: CHAIN.to_string(),
				verifier: self.verifier.clone(),
				executor: self.executor.clone(),
			})
		}
	}

	pub(crate) fn target(args: &[&str]) -> TargetConfig {
		TargetConfig {
			abi: "function updatePrice(bytes32 feedId, int192 price)".into(),
			function_name: "updatePrice".into(),
			function_args: args.iter().map(|s| s.to_string()).collect(),
		}
	}

	pub(crate) fn contract() -> ContractRecord {
		ContractRecord {
			address: Address(vec![0x42; 20]),
			accounts: Vec::new(),
		}
	}

	struct Harness {
		pipeline: Pipeline,
		settings: Arc<Settings>,
		cache: Arc<ReportCache>,
		verifier: Arc<MockVerifier>,
		executor: Arc<MockExecutor>,
		event_bus: EventBus,
	}

	async fn harness() -> Harness {
		let settings = Arc::new(Settings::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		)))));
		settings
			.set_target(CHAIN, &target(&["feedId", "benchmarkPrice"]))
			.await
			.unwrap();
		settings
			.set_contract(&feed_id(), CHAIN, &contract())
			.await
			.unwrap();

		let cache = Arc::new(ReportCache::new());
		let verifier = Arc::new(MockVerifier::default());
		let executor = Arc::new(MockExecutor::default());
		let event_bus = EventBus::new(64);
		let pipeline = Pipeline::new(
			settings.clone(),
			cache.clone(),
			Arc::new(FixedResolver {
				verifier: verifier.clone(),
				executor: executor.clone(),
			}),
			event_bus.clone(),
		);

		Harness {
			pipeline,
			settings,
			cache,
			verifier,
			executor,
			event_bus,
		}
	}

	fn states(events: &mut tokio::sync::broadcast::Receiver<RelayerEvent>) -> Vec<PipelineState> {
		let mut states = Vec::new();
		while let Ok(event) = events.try_recv() {
			if let RelayerEvent::Dispatch(DispatchEvent::Transition { state, .. }) = event {
				states.push(state);
			}
		}
		states
	}

	#[tokio::test]
	async fn test_writes_deviating_price_with_zero_delta() {
		let h = harness().await;
		let mut events = h.event_bus.subscribe();
		h.settings
			.set_last_written_price(&feed_id(), price("18624904418177297500"))
			.await
			.unwrap();
		h.cache.insert(stream_report(price("18854937605278083000")));

		let job = DispatchJob::new(feed_id(), price("230033187100785500"));
		let state = h.pipeline.run(&job).await.unwrap();

		assert_eq!(state, PipelineState::Confirmed);
		assert_eq!(
			*h.executor.writes.lock().unwrap(),
			vec![(price("18854937605278083000"), Address(vec![0x42; 20]))]
		);
		assert_eq!(
			h.settings.last_written_price(&feed_id()).await.unwrap(),
			Some(price("18854937605278083000"))
		);
		assert_eq!(
			states(&mut events),
			vec![
				PipelineState::Received,
				PipelineState::Verifying,
				PipelineState::Verified,
				PipelineState::Executing,
				PipelineState::Confirmed,
			]
		);
	}

	#[tokio::test]
	async fn test_duplicate_job_is_filtered_after_write() {
		let h = harness().await;
		h.settings.set_price_delta(U256::from(1000u64)).await.unwrap();
		h.cache.insert(stream_report(price("5000")));

		let first = DispatchJob::new(feed_id(), price("5000"));
		let second = DispatchJob::new(feed_id(), price("5000"));
		assert_eq!(h.pipeline.run(&first).await.unwrap(), PipelineState::Confirmed);
		assert_eq!(h.pipeline.run(&second).await.unwrap(), PipelineState::Filtered);
		assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_gas_cap_abort_keeps_last_written_price() {
		let h = harness().await;
		*h.verifier.fail.lock().unwrap() = Some(|| {
			VerifierError::Delivery(DeliveryError::GasCapExceeded {
				estimate: 1234,
				cap: U256::from(500u64),
				formatted_cap: "0.000000000000000500".into(),
			})
		});
		h.settings
			.set_last_written_price(&feed_id(), price("100"))
			.await
			.unwrap();
		h.cache.insert(stream_report(price("200")));

		let state = h.pipeline.run(&DispatchJob::new(feed_id(), price("100"))).await.unwrap();
		assert_eq!(state, PipelineState::Aborted);
		assert!(h.executor.writes.lock().unwrap().is_empty());
		assert_eq!(
			h.settings.last_written_price(&feed_id()).await.unwrap(),
			Some(price("100"))
		);
	}

	#[tokio::test]
	async fn test_network_failure_is_returned_for_retry() {
		let h = harness().await;
		*h.verifier.fail.lock().unwrap() =
			Some(|| VerifierError::Delivery(DeliveryError::Network("connection reset".into())));
		h.cache.insert(stream_report(price("200")));

		let result = h.pipeline.run(&DispatchJob::new(feed_id(), price("200"))).await;
		assert!(matches!(result, Err(RelayerError::Verifier(_))));
	}

	#[tokio::test]
	async fn test_reverted_write_aborts_and_keeps_last_written_price() {
		let h = harness().await;
		*h.executor.fail.lock().unwrap() =
			Some(|| ExecutorError::TransactionFailed(TransactionHash(vec![0xcd; 32])));
		h.settings
			.set_last_written_price(&feed_id(), price("100"))
			.await
			.unwrap();
		h.cache.insert(stream_report(price("200")));
		let mut events = h.event_bus.subscribe();

		let state = h.pipeline.run(&DispatchJob::new(feed_id(), price("100"))).await.unwrap();
		assert_eq!(state, PipelineState::Aborted);
		assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 1);
		assert_eq!(
			h.settings.last_written_price(&feed_id()).await.unwrap(),
			Some(price("100"))
		);
		assert_eq!(
			states(&mut events),
			vec![
				PipelineState::Received,
				PipelineState::Verifying,
				PipelineState::Verified,
				PipelineState::Executing,
				PipelineState::Aborted,
			]
		);
	}

	#[tokio::test]
	async fn test_write_network_failure_is_returned_for_retry() {
		let h = harness().await;
		*h.executor.fail.lock().unwrap() =
			Some(|| ExecutorError::Delivery(DeliveryError::Network("timed out".into())));
		h.settings
			.set_last_written_price(&feed_id(), price("100"))
			.await
			.unwrap();
		h.cache.insert(stream_report(price("200")));

		let result = h.pipeline.run(&DispatchJob::new(feed_id(), price("100"))).await;
		assert!(matches!(result, Err(RelayerError::Executor(_))));
		assert_eq!(
			h.settings.last_written_price(&feed_id()).await.unwrap(),
			Some(price("100"))
		);
	}

	#[tokio::test]
	async fn test_unavailable_field_aborts_before_verifying() {
		let h = harness().await;
		h.settings
			.set_target(CHAIN, &target(&["feedId", "marketStatus"]))
			.await
			.unwrap();
		h.cache.insert(stream_report(price("200")));

		let state = h.pipeline.run(&DispatchJob::new(feed_id(), price("200"))).await.unwrap();
		assert_eq!(state, PipelineState::Aborted);
		assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_missing_contract_aborts() {
		let h = harness().await;
		h.cache.insert(stream_report(price("200")));
		let mut bytes = [0x77u8; 32];
		bytes[..2].copy_from_slice(&3u16.to_be_bytes());
		let other = FeedId::from(bytes);
		h.cache.insert(StreamReport {
			feed_id: other,
			..stream_report(price("200"))
		});

		let state = h.pipeline.run(&DispatchJob::new(other, price("200"))).await.unwrap();
		assert_eq!(state, PipelineState::Aborted);
	}

	#[tokio::test]
	async fn test_missing_target_aborts() {
		let h = harness().await;
		let pipeline = Pipeline::new(
			Arc::new(Settings::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))),
			h.cache.clone(),
			Arc::new(FixedResolver {
				verifier: h.verifier.clone(),
				executor: h.executor.clone(),
			}),
			h.event_bus.clone(),
		);
		h.cache.insert(stream_report(price("200")));

		let state = pipeline.run(&DispatchJob::new(feed_id(), price("200"))).await.unwrap();
		assert_eq!(state, PipelineState::Aborted);
		assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_no_cached_report_aborts() {
		let h = harness().await;
		let state = h.pipeline.run(&DispatchJob::new(feed_id(), price("1"))).await.unwrap();
		assert_eq!(state, PipelineState::Aborted);
	}
}
