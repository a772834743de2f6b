//! Timer tick: gate the cached report and queue a job when it deviates.

use crate::gate::{self, GateDecision};
use crate::limiter::{DispatchJob, DispatchLimiter};
use crate::scheduler::TickHandler;
use crate::settings::Settings;
use crate::{RelayerError, ReportCache};
use async_trait::async_trait;
use relayer_types::{DispatchEvent, EventBus, FeedId, RelayerEvent};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct FeedTicker {
	settings: Arc<Settings>,
	cache: Arc<ReportCache>,
	limiter: Arc<DispatchLimiter>,
	event_bus: EventBus,
}

impl FeedTicker {
	pub fn new(
		settings: Arc<Settings>,
		cache: Arc<ReportCache>,
		limiter: Arc<DispatchLimiter>,
		event_bus: EventBus,
	) -> Self {
		Self {
			settings,
			cache,
			limiter,
			event_bus,
		}
	}

	/// Returns the queued job, if the gate let one through.
	pub async fn tick(&self, feed_id: FeedId) -> Result<Option<DispatchJob>, RelayerError> {
		let Some(report) = self.cache.latest(&feed_id) else {
			trace!(%feed_id, "No report cached yet");
			return Ok(None);
		};
		if report.price.is_zero() {
			trace!(%feed_id, "Cached price is zero");
			return Ok(None);
		}

		let last_written = self.settings.last_written_price(&feed_id).await?;
		let price_delta = self.settings.price_delta().await?;

		match gate::evaluate(report.price, last_written, price_delta) {
			GateDecision::Skip { diff } => {
				debug!(%feed_id, %diff, %price_delta, "Price within delta, skipping");
				Ok(None)
			},
			GateDecision::Dispatch { diff } => {
				let job = DispatchJob::new(feed_id, diff);
				debug!(job_id = %job.id, %feed_id, %diff, "Queueing dispatch job");
				self.event_bus
					.publish(RelayerEvent::Dispatch(DispatchEvent::Queued {
						job_id: job.id.clone(),
						feed_id,
						diff,
					}));
				self.limiter.enqueue(job.clone())?;
				Ok(Some(job))
			},
		}
	}
}

#[async_trait]
impl TickHandler for FeedTicker {
	async fn on_tick(&self, feed_id: FeedId) {
		if let Err(e) = self.tick(feed_id).await {
			warn!(%feed_id, error = %e, "Feed tick failed");
		}
	}
}
