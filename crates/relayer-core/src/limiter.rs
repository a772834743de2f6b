//! Serial dispatch queue.
//!
//! Jobs run one at a time in submission order. A job that fails with a
//! retryable error, or panics, is retried with exponential backoff before
//! the queue moves on; exhausting the retries aborts that job only.

use crate::RelayerError;
use alloy::primitives::I256;
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use relayer_config::DispatchConfig;
use relayer_types::{DispatchEvent, EventBus, FeedId, PipelineState, RelayerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, warn};

/// Work item created when a feed's gate fires.
#[derive(Debug, Clone)]
pub struct DispatchJob {
	pub id: String,
	pub feed_id: FeedId,
	/// Price difference that admitted the job.
	pub diff: I256,
}

impl DispatchJob {
	pub fn new(feed_id: FeedId, diff: I256) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			feed_id,
			diff,
		}
	}
}

/// Runs one job to a terminal state.
///
/// `Err` means the attempt failed in a way worth retrying. Permanent
/// failures come back as `Ok(PipelineState::Aborted)`.
#[async_trait]
pub trait JobHandler: Send + Sync {
	async fn handle(&self, job: &DispatchJob) -> Result<PipelineState, RelayerError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl RetryPolicy {
	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_backoff)
			.with_max_interval(self.max_backoff)
			.with_max_elapsed_time(None)
			.build()
	}
}

impl From<&DispatchConfig> for RetryPolicy {
	fn from(config: &DispatchConfig) -> Self {
		Self {
			max_retries: config.max_retries,
			initial_backoff: Duration::from_millis(config.initial_backoff_ms),
			max_backoff: Duration::from_millis(config.max_backoff_ms),
		}
	}
}

pub struct DispatchLimiter {
	sender: mpsc::UnboundedSender<DispatchJob>,
	worker: JoinHandle<()>,
}

impl DispatchLimiter {
	/// Starts the worker. Must be called from within a Tokio runtime.
	pub fn start(handler: Arc<dyn JobHandler>, policy: RetryPolicy, event_bus: EventBus) -> Self {
		let (sender, receiver) = mpsc::unbounded_channel();
		let worker = tokio::spawn(run_worker(receiver, handler, policy, event_bus));
		Self { sender, worker }
	}

	pub fn enqueue(&self, job: DispatchJob) -> Result<(), RelayerError> {
		self.sender
			.send(job)
			.map_err(|_| RelayerError::Service("Dispatch queue is closed".into()))
	}

	/// Stops the worker. Queued jobs are dropped and an in-flight attempt is
	/// cancelled.
	pub fn shutdown(&self) {
		self.worker.abort();
	}
}

async fn run_worker(
	mut receiver: mpsc::UnboundedReceiver<DispatchJob>,
	handler: Arc<dyn JobHandler>,
	policy: RetryPolicy,
	event_bus: EventBus,
) {
	while let Some(job) = receiver.recv().await {
		process(&job, &handler, &policy, &event_bus).await;
	}
	debug!("Dispatch queue closed");
}

/// Aborts the attempt if the worker is aborted while waiting on it.
struct CancelOnDrop(AbortHandle);

impl Drop for CancelOnDrop {
	fn drop(&mut self) {
		self.0.abort();
	}
}

async fn process(
	job: &DispatchJob,
	handler: &Arc<dyn JobHandler>,
	policy: &RetryPolicy,
	event_bus: &EventBus,
) {
	let mut backoff = policy.backoff();
	let mut attempts = 0;

	loop {
		let attempt = {
			let handler = handler.clone();
			let job = job.clone();
			tokio::spawn(async move { handler.handle(&job).await })
		};
		let _cancel = CancelOnDrop(attempt.abort_handle());

		let failure = match attempt.await {
			Ok(Ok(state)) => {
				debug!(job_id = %job.id, feed_id = %job.feed_id, %state, "Dispatch job finished");
				return;
			},
			Ok(Err(e)) => e.to_string(),
			Err(e) if e.is_panic() => format!("job panicked: {}", e),
			Err(e) => format!("job cancelled: {}", e),
		};

		attempts += 1;
		if attempts > policy.max_retries {
			error!(
				job_id = %job.id,
				feed_id = %job.feed_id,
				attempts,
				error = %failure,
				"Dispatch job failed, giving up"
			);
			break;
		}

		match backoff.next_backoff() {
			Some(delay) => {
				warn!(
					job_id = %job.id,
					feed_id = %job.feed_id,
					"Dispatch attempt {}/{} failed, retrying in {:?}: {}",
					attempts,
					policy.max_retries,
					delay,
					failure
				);
				tokio::time::sleep(delay).await;
			},
			None => {
				error!(job_id = %job.id, attempts, error = %failure, "Dispatch backoff exhausted");
				break;
			},
		}
	}

	event_bus.publish(RelayerEvent::Dispatch(DispatchEvent::Transition {
		job_id: job.id.clone(),
		feed_id: job.feed_id,
		state: PipelineState::Aborted,
	}));
}
