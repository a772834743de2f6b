//! Per-feed timers.
//!
//! Every registered feed gets its own timer task. All timers share one cron
//! schedule; replacing it re-times every running timer without restarting
//! it.

use crate::RelayerError;
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use dashmap::{mapref::entry::Entry, DashMap};
use relayer_types::FeedId;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Called each time a feed's timer fires.
#[async_trait]
pub trait TickHandler: Send + Sync {
	async fn on_tick(&self, feed_id: FeedId);
}

pub fn parse_schedule(expression: &str) -> Result<Schedule, RelayerError> {
	Schedule::from_str(expression)
		.map_err(|e| RelayerError::Config(format!("Invalid interval {:?}: {}", expression, e)))
}

pub struct FeedScheduler {
	schedule: watch::Sender<Schedule>,
	timers: DashMap<FeedId, JoinHandle<()>>,
	handler: Arc<dyn TickHandler>,
}

impl FeedScheduler {
	pub fn new(schedule: Schedule, handler: Arc<dyn TickHandler>) -> Self {
		let (schedule, _) = watch::channel(schedule);
		Self {
			schedule,
			timers: DashMap::new(),
			handler,
		}
	}

	/// Starts a timer for `feed_id`. Returns `false` if one is already running.
	pub fn add_feed(&self, feed_id: FeedId) -> bool {
		match self.timers.entry(feed_id) {
			Entry::Occupied(_) => false,
			Entry::Vacant(slot) => {
				slot.insert(tokio::spawn(run_timer(
					feed_id,
					self.schedule.subscribe(),
					self.handler.clone(),
				)));
				tracing::debug!(%feed_id, "Started feed timer");
				true
			},
		}
	}

	/// Stops the feed's timer. Returns `false` if it had none.
	pub fn remove_feed(&self, feed_id: &FeedId) -> bool {
		match self.timers.remove(feed_id) {
			Some((_, timer)) => {
				timer.abort();
				tracing::debug!(%feed_id, "Stopped feed timer");
				true
			},
			None => false,
		}
	}

	/// Re-times every running timer to `schedule`.
	pub fn set_schedule(&self, schedule: Schedule) {
		self.schedule.send_replace(schedule);
	}

	pub fn feeds(&self) -> Vec<FeedId> {
		let mut feeds: Vec<FeedId> = self.timers.iter().map(|entry| *entry.key()).collect();
		feeds.sort();
		feeds
	}

	pub fn stop_all(&self) {
		for entry in self.timers.iter() {
			entry.value().abort();
		}
		self.timers.clear();
	}
}

impl Drop for FeedScheduler {
	fn drop(&mut self) {
		self.stop_all();
	}
}

async fn run_timer(
	feed_id: FeedId,
	mut schedule: watch::Receiver<Schedule>,
	handler: Arc<dyn TickHandler>,
) {
	loop {
		let next = schedule.borrow_and_update().upcoming(Utc).next();
		let Some(next) = next else {
			tracing::warn!(%feed_id, "Schedule has no upcoming time, timer idle");
			if schedule.changed().await.is_err() {
				return;
			}
			continue;
		};
		let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

		tokio::select! {
			_ = tokio::time::sleep(delay) => handler.on_tick(feed_id).await,
			changed = schedule.changed() => {
				if changed.is_err() {
					return;
				}
				tracing::debug!(%feed_id, "Schedule changed, re-timing");
			}
		}
	}
}
