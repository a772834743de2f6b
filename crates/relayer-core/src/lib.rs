//! Relayer engine.
//!
//! Two independent halves share one [`ReportCache`]. Ingestion decodes
//! incoming reports and overwrites the cache entry of their feed. Dispatch is
//! driven by one timer per feed: each tick gates the cached price against the
//! last written price and, when it moved enough, queues a job on the serial
//! [`DispatchLimiter`]. The [`Pipeline`] then verifies the latest report on
//! the active destination and writes it through the configured target.

use relayer_account::{AccountError, AccountService};
use relayer_config::Config;
use relayer_delivery::GasGuard;
use relayer_storage::{StorageInterface, StorageService};
use relayer_types::{
	AccountMeta, Address, EventBus, Feed, FeedId, RelayerEvent, ReportEvent, ReportVersion,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod cache;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod pipeline;
pub mod scheduler;
pub mod settings;
pub mod ticker;

pub use cache::ReportCache;
pub use error::RelayerError;
pub use limiter::{DispatchJob, DispatchLimiter, RetryPolicy};
pub use pipeline::{ChainFamily, FamilyResolver, Pipeline, RegistryResolver};
pub use scheduler::FeedScheduler;
pub use settings::{ContractRecord, Settings};

use scheduler::parse_schedule;
use ticker::FeedTicker;

pub struct RelayerEngine {
	config: Config,
	settings: Arc<Settings>,
	cache: Arc<ReportCache>,
	accounts: Arc<AccountService>,
	scheduler: FeedScheduler,
	limiter: Arc<DispatchLimiter>,
	event_bus: EventBus,
}

impl RelayerEngine {
	/// Seeds storage from the config file and starts a timer per registered
	/// feed.
	pub async fn start(&self) -> Result<(), RelayerError> {
		self.seed().await?;

		let interval = self.settings.interval().await?;
		self.scheduler.set_schedule(parse_schedule(&interval)?);

		let feeds = self.settings.feeds().await?;
		for feed in &feeds {
			self.scheduler.add_feed(feed.feed_id);
		}

		let identities: Vec<String> = self
			.accounts
			.addresses()
			.iter()
			.map(|(family, address)| format!("{}={}", family, address))
			.collect();
		info!(
			name = %self.config.relayer.name,
			feeds = feeds.len(),
			%interval,
			?identities,
			"Relayer started"
		);
		Ok(())
	}

	async fn seed(&self) -> Result<(), RelayerError> {
		let seeds = &self.config.settings;
		if let Some(interval) = &seeds.interval {
			parse_schedule(interval)?;
		}
		let values = [
			("interval", seeds.interval.clone()),
			("price_delta", seeds.price_delta.clone()),
			("gas_cap", seeds.gas_cap.clone()),
			("chain_id", seeds.chain_id.map(|id| id.to_string())),
			("cluster", seeds.cluster.clone()),
			("family", seeds.family.clone()),
		];
		for (name, value) in values {
			if let Some(value) = value {
				if self.settings.seed(name, &value).await? {
					debug!(setting = name, %value, "Seeded setting");
				}
			}
		}

		// Feeds removed at runtime must stay removed across restarts.
		if self.settings.seed("feeds_seeded", "true").await? {
			for feed in &self.config.feeds {
				self.settings
					.add_feed(&Feed {
						feed_id: parse_feed_id(&feed.feed_id)?,
						name: feed.name.clone(),
					})
					.await?;
			}
		}

		for (chain, target) in &self.config.targets {
			if self.settings.target(chain).await?.is_none() {
				self.settings.set_target(chain, target).await?;
			}
		}

		for contract in &self.config.contracts {
			let feed_id = parse_feed_id(&contract.feed_id)?;
			if self.settings.contract(&feed_id, &contract.chain).await?.is_some() {
				continue;
			}
			let accounts = contract
				.accounts
				.iter()
				.map(|account| {
					Ok(AccountMeta {
						address: relayer_chains::parse_pubkey(&account.address)?,
						is_signer: account.signer,
						is_writable: account.writable,
					})
				})
				.collect::<Result<Vec<_>, RelayerError>>()?;
			let record = ContractRecord {
				address: parse_contract_address(&contract.chain, &contract.address)?,
				accounts,
			};
			self.settings
				.set_contract(&feed_id, &contract.chain, &record)
				.await?;
		}

		Ok(())
	}

	/// Decodes a full report and caches it. Reports for feeds that are not
	/// registered are dropped and `None` is returned.
	pub async fn ingest(&self, full_report: &[u8]) -> Result<Option<FeedId>, RelayerError> {
		let report = relayer_verifier::decoder::decode_stream_report(full_report)?;
		let feed_id = report.feed_id;

		if !self.settings.has_feed(&feed_id).await? {
			debug!(%feed_id, "Dropping report for unregistered feed");
			return Ok(None);
		}

		debug!(
			%feed_id,
			observations_timestamp = report.observations_timestamp,
			price = %report.price,
			"Report received"
		);
		self.event_bus
			.publish(RelayerEvent::Report(ReportEvent::Received {
				feed_id,
				observations_timestamp: report.observations_timestamp,
			}));
		self.cache.insert(report);
		Ok(Some(feed_id))
	}

	/// Registers a feed and starts its timer. Returns `false` if it was
	/// already registered.
	pub async fn add_feed(&self, feed: Feed) -> Result<bool, RelayerError> {
		ReportVersion::try_from(feed.feed_id.schema_version())
			.map_err(|e| RelayerError::Config(format!("Feed {}: {}", feed.feed_id, e)))?;

		let added = self.settings.add_feed(&feed).await?;
		self.scheduler.add_feed(feed.feed_id);
		if added {
			info!(feed_id = %feed.feed_id, name = %feed.name, "Feed added");
		}
		Ok(added)
	}

	/// Stops the feed's timer and forgets its cached report and last written
	/// price.
	pub async fn remove_feed(&self, feed_id: &FeedId) -> Result<bool, RelayerError> {
		self.scheduler.remove_feed(feed_id);
		self.cache.remove(feed_id);
		let removed = self.settings.remove_feed(feed_id).await?;
		if removed {
			info!(%feed_id, "Feed removed");
		}
		Ok(removed)
	}

	pub async fn feeds(&self) -> Result<Vec<Feed>, RelayerError> {
		self.settings.feeds().await
	}

	/// Stores a new cron interval and re-times every running timer.
	pub async fn set_interval(&self, expression: &str) -> Result<(), RelayerError> {
		let schedule = self.settings.set_interval(expression).await?;
		self.scheduler.set_schedule(schedule);
		info!(interval = expression, "Interval updated");
		Ok(())
	}

	pub fn shutdown(&self) {
		self.scheduler.stop_all();
		self.limiter.shutdown();
		info!("Relayer stopped");
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn settings(&self) -> &Arc<Settings> {
		&self.settings
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}
}

fn parse_feed_id(value: &str) -> Result<FeedId, RelayerError> {
	FeedId::from_str(value).map_err(RelayerError::Config)
}

/// Hex address on EVM chains (numeric keys), base58 program id otherwise.
fn parse_contract_address(chain: &str, value: &str) -> Result<Address, RelayerError> {
	if chain.parse::<u64>().is_ok() {
		let address = alloy::primitives::Address::from_str(value)
			.map_err(|e| RelayerError::Config(format!("Invalid contract address {}: {}", value, e)))?;
		Ok(address.into())
	} else {
		Ok(relayer_chains::parse_pubkey(value)?)
	}
}

type StorageFactory = Box<dyn Fn(&toml::Value) -> Box<dyn StorageInterface> + Send>;
type AccountFactory = Box<dyn Fn(&toml::Value) -> Result<AccountService, AccountError> + Send>;

pub struct RelayerBuilder {
	config: Config,
	storage_factory: Option<StorageFactory>,
	account_factory: Option<AccountFactory>,
	resolver: Option<Arc<dyn FamilyResolver>>,
}

impl RelayerBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factory: None,
			account_factory: None,
			resolver: None,
		}
	}

	pub fn with_storage_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Box<dyn StorageInterface> + Send + 'static,
	{
		self.storage_factory = Some(Box::new(factory));
		self
	}

	pub fn with_account_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<AccountService, AccountError> + Send + 'static,
	{
		self.account_factory = Some(Box::new(factory));
		self
	}

	/// Overrides how the destination is resolved for each job. By default it
	/// comes from the chain registry and the live settings.
	pub fn with_resolver(mut self, resolver: Arc<dyn FamilyResolver>) -> Self {
		self.resolver = Some(resolver);
		self
	}

	/// Builds the engine and starts its dispatch worker. Must be called from
	/// within a Tokio runtime.
	pub fn build(self) -> Result<RelayerEngine, RelayerError> {
		let storage_backend = self
			.storage_factory
			.ok_or_else(|| RelayerError::Config("Storage factory not provided".into()))?(
			&self.config.storage,
		);
		let storage = Arc::new(StorageService::new(storage_backend));

		let accounts = self
			.account_factory
			.ok_or_else(|| RelayerError::Config("Account factory not provided".into()))?(
			&self.config.account,
		)
		.map_err(|e| RelayerError::Config(e.to_string()))?;
		let accounts = Arc::new(accounts);

		let settings = Arc::new(Settings::new(storage));
		let cache = Arc::new(ReportCache::new());
		let event_bus = EventBus::new(self.config.relayer.event_capacity);

		let resolver = match self.resolver {
			Some(resolver) => resolver,
			None => {
				let registry = relayer_chains::create_registry(
					Some(&self.config.chains),
					Some(&self.config.clusters),
					accounts.clone(),
					GasGuard::new(settings.clone()),
				)?
				.with_receipt_timeout(Duration::from_secs(self.config.dispatch.receipt_timeout_secs));
				Arc::new(RegistryResolver::new(Arc::new(registry), settings.clone()))
			},
		};

		let pipeline = Arc::new(Pipeline::new(
			settings.clone(),
			cache.clone(),
			resolver,
			event_bus.clone(),
		));
		let limiter = Arc::new(DispatchLimiter::start(
			pipeline,
			RetryPolicy::from(&self.config.dispatch),
			event_bus.clone(),
		));
		let ticker = Arc::new(FeedTicker::new(
			settings.clone(),
			cache.clone(),
			limiter.clone(),
			event_bus.clone(),
		));

		let interval = self
			.config
			.settings
			.interval
			.as_deref()
			.unwrap_or(settings::DEFAULT_INTERVAL);
		let scheduler = FeedScheduler::new(parse_schedule(interval)?, ticker);

		Ok(RelayerEngine {
			config: self.config,
			settings,
			cache,
			accounts,
			scheduler,
			limiter,
			event_bus,
		})
	}
}
