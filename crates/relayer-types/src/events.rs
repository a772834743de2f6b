//! Relayer events and the broadcast bus that carries them.

use alloy::primitives::I256;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::{FeedId, TransactionHash};

/// States a dispatch job moves through.
///
/// `Aborted` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
	Received,
	Filtered,
	Verifying,
	Verified,
	Executing,
	Confirmed,
	Aborted,
}

impl PipelineState {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			PipelineState::Filtered | PipelineState::Confirmed | PipelineState::Aborted
		)
	}
}

impl fmt::Display for PipelineState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			PipelineState::Received => "received",
			PipelineState::Filtered => "filtered",
			PipelineState::Verifying => "verifying",
			PipelineState::Verified => "verified",
			PipelineState::Executing => "executing",
			PipelineState::Confirmed => "confirmed",
			PipelineState::Aborted => "aborted",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RelayerEvent {
	Report(ReportEvent),
	Dispatch(DispatchEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReportEvent {
	Received {
		feed_id: FeedId,
		observations_timestamp: u32,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
	Queued {
		job_id: String,
		feed_id: FeedId,
		diff: I256,
	},
	Transition {
		job_id: String,
		feed_id: FeedId,
		state: PipelineState,
	},
	Written {
		job_id: String,
		feed_id: FeedId,
		tx_hash: TransactionHash,
		price: I256,
	},
}

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<RelayerEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<RelayerEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Having no subscribers is not an error.
	pub fn publish(&self, event: RelayerEvent) {
		let _ = self.sender.send(event);
	}
}
