//! Live settings and per-feed state kept in storage.
//!
//! Nothing here is cached: every read goes to storage, so a change made
//! through the API or directly in the store applies to the next tick or
//! the next gas check.

use crate::RelayerError;
use alloy::primitives::{I256, U256};
use async_trait::async_trait;
use cron::Schedule;
use relayer_chains::ChainFamilyKind;
use relayer_delivery::GasCapSource;
use relayer_executor::TargetConfig;
use relayer_storage::StorageService;
use relayer_types::{AccountMeta, Address, Feed, FeedId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

const SETTINGS: &str = "settings";
const PRICES: &str = "price";
const FEEDS: &str = "feeds";
const FEED: &str = "feed";
const TARGETS: &str = "target";
const CONTRACTS: &str = "contract";

/// Every minute, on the minute.
pub const DEFAULT_INTERVAL: &str = "0 * * * * *";

/// Destination contract or program for one feed on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
	pub address: Address,
	#[serde(default)]
	pub accounts: Vec<AccountMeta>,
}

/// Where writes currently go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
	Evm(u64),
	Solana(String),
}

fn parse_decimal<T: FromStr>(name: &str, value: &str) -> Result<T, RelayerError> {
	value
		.parse()
		.map_err(|_| RelayerError::Config(format!("{} is not a valid integer: {}", name, value)))
}

pub struct Settings {
	storage: Arc<StorageService>,
}

impl Settings {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	async fn get(&self, name: &str) -> Result<Option<String>, RelayerError> {
		Ok(self.storage.retrieve_optional(SETTINGS, name).await?)
	}

	async fn put(&self, name: &str, value: &str) -> Result<(), RelayerError> {
		Ok(self.storage.store(SETTINGS, name, &value.to_string()).await?)
	}

	/// Writes `value` only if the setting has never been stored.
	pub async fn seed(&self, name: &str, value: &str) -> Result<bool, RelayerError> {
		if self.storage.exists(SETTINGS, name).await? {
			return Ok(false);
		}
		self.put(name, value).await?;
		Ok(true)
	}

	/// Minimum absolute change worth a write. Zero when unset.
	pub async fn price_delta(&self) -> Result<U256, RelayerError> {
		match self.get("price_delta").await? {
			Some(value) => parse_decimal("price_delta", &value),
			None => Ok(U256::ZERO),
		}
	}

	pub async fn set_price_delta(&self, delta: U256) -> Result<(), RelayerError> {
		self.put("price_delta", &delta.to_string()).await
	}

	/// Gas ceiling in the smallest native unit. `None` when unset.
	pub async fn gas_cap(&self) -> Result<Option<U256>, RelayerError> {
		self.get("gas_cap")
			.await?
			.map(|value| parse_decimal("gas_cap", &value))
			.transpose()
	}

	pub async fn set_gas_cap(&self, cap: Option<U256>) -> Result<(), RelayerError> {
		match cap {
			Some(cap) => self.put("gas_cap", &cap.to_string()).await,
			None => Ok(self.storage.remove(SETTINGS, "gas_cap").await?),
		}
	}

	pub async fn interval(&self) -> Result<String, RelayerError> {
		Ok(self
			.get("interval")
			.await?
			.unwrap_or_else(|| DEFAULT_INTERVAL.to_string()))
	}

	/// Stores a new timer schedule after checking that it parses.
	pub async fn set_interval(&self, expression: &str) -> Result<Schedule, RelayerError> {
		let schedule = Schedule::from_str(expression)
			.map_err(|e| RelayerError::Config(format!("Invalid interval {:?}: {}", expression, e)))?;
		self.put("interval", expression).await?;
		Ok(schedule)
	}

	/// Active destination, from `family` plus `chain_id` or `cluster`.
	pub async fn destination(&self) -> Result<Destination, RelayerError> {
		let family = match self.get("family").await? {
			Some(name) => ChainFamilyKind::from_str(&name)?,
			None => ChainFamilyKind::Evm,
		};

		match family {
			ChainFamilyKind::Evm => {
				let chain_id = self
					.get("chain_id")
					.await?
					.ok_or_else(|| RelayerError::Config("No chain_id configured".into()))?;
				Ok(Destination::Evm(parse_decimal("chain_id", &chain_id)?))
			},
			ChainFamilyKind::Solana => {
				let cluster = self
					.get("cluster")
					.await?
					.ok_or_else(|| RelayerError::Config("No cluster configured".into()))?;
				Ok(Destination::Solana(cluster))
			},
		}
	}

	pub async fn set_setting(&self, name: &str, value: &str) -> Result<(), RelayerError> {
		self.put(name, value).await
	}

	pub async fn last_written_price(&self, feed_id: &FeedId) -> Result<Option<I256>, RelayerError> {
		let Some(value) = self
			.storage
			.retrieve_optional::<String>(PRICES, &feed_id.to_string())
			.await?
		else {
			return Ok(None);
		};
		I256::from_dec_str(&value)
			.map(Some)
			.map_err(|e| RelayerError::Config(format!("Stored price for {} is invalid: {}", feed_id, e)))
	}

	pub async fn set_last_written_price(&self, feed_id: &FeedId, price: I256) -> Result<(), RelayerError> {
		Ok(self
			.storage
			.store(PRICES, &feed_id.to_string(), &price.to_string())
			.await?)
	}

	pub async fn feeds(&self) -> Result<Vec<Feed>, RelayerError> {
		let mut feeds = Vec::new();
		for id in self.storage.set_members(FEEDS, "all").await? {
			if let Some(feed) = self.storage.retrieve_optional::<Feed>(FEED, &id).await? {
				feeds.push(feed);
			}
		}
		Ok(feeds)
	}

	pub async fn has_feed(&self, feed_id: &FeedId) -> Result<bool, RelayerError> {
		Ok(self
			.storage
			.set_contains(FEEDS, "all", &feed_id.to_string())
			.await?)
	}

	/// Registers a feed. Returns `false` if it was already registered.
	pub async fn add_feed(&self, feed: &Feed) -> Result<bool, RelayerError> {
		let id = feed.feed_id.to_string();
		self.storage.store(FEED, &id, feed).await?;
		Ok(self.storage.set_add(FEEDS, "all", &id).await?)
	}

	/// Unregisters a feed and forgets its last written price.
	pub async fn remove_feed(&self, feed_id: &FeedId) -> Result<bool, RelayerError> {
		let id = feed_id.to_string();
		let removed = self.storage.set_remove(FEEDS, "all", &id).await?;
		self.storage.remove(FEED, &id).await?;
		self.storage.remove(PRICES, &id).await?;
		Ok(removed)
	}

	pub async fn target(&self, chain: &str) -> Result<Option<TargetConfig>, RelayerError> {
		Ok(self.storage.retrieve_optional(TARGETS, chain).await?)
	}

	pub async fn set_target(&self, chain: &str, target: &TargetConfig) -> Result<(), RelayerError> {
		Ok(self.storage.store(TARGETS, chain, target).await?)
	}

	pub async fn contract(
		&self,
		feed_id: &FeedId,
		chain: &str,
	) -> Result<Option<ContractRecord>, RelayerError> {
		Ok(self
			.storage
			.retrieve_optional(CONTRACTS, &format!("{}:{}", feed_id, chain))
			.await?)
	}

	pub async fn set_contract(
		&self,
		feed_id: &FeedId,
		chain: &str,
		record: &ContractRecord,
	) -> Result<(), RelayerError> {
		Ok(self
			.storage
			.store(CONTRACTS, &format!("{}:{}", feed_id, chain), record)
			.await?)
	}
}

#[async_trait]
impl GasCapSource for Settings {
	async fn gas_cap(&self) -> Option<U256> {
		match Settings::gas_cap(self).await {
			Ok(cap) => cap,
			Err(e) => {
				// Unreadable cap rejects every estimate.
				tracing::error!(error = %e, "Failed to read gas cap");
				Some(U256::ZERO)
			},
		}
	}
}
