//! Latest report per feed.

use dashmap::DashMap;
use relayer_types::{FeedId, StreamReport};

/// Holds the most recent [`StreamReport`] seen for each feed.
///
/// Arrivals overwrite unconditionally, so a later arrival with an older
/// observation timestamp still replaces the cached report.
#[derive(Default)]
pub struct ReportCache {
	reports: DashMap<FeedId, StreamReport>,
}

impl ReportCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, report: StreamReport) {
		self.reports.insert(report.feed_id, report);
	}

	pub fn latest(&self, feed_id: &FeedId) -> Option<StreamReport> {
		self.reports.get(feed_id).map(|entry| entry.value().clone())
	}

	pub fn remove(&self, feed_id: &FeedId) {
		self.reports.remove(feed_id);
	}

	pub fn len(&self) -> usize {
		self.reports.len()
	}

	pub fn is_empty(&self) -> bool {
		self.reports.is_empty()
	}
}
