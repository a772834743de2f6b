//! Storage module for the streams relayer.
//!
//! This module provides the key-value persistence the relayer keeps its
//! settings, feed registry and last written prices in. Backends only move
//! bytes; [`StorageService`] layers typed values, lists and set membership
//! on top.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::Mutex;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Low-level interface for storage backends.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes under the given key, replacing any previous value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key. Missing keys are not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Typed storage operations over a byte-level backend.
///
/// Keys are formed as `namespace:id`. Values are JSON encoded. Lists and
/// sets are stored as a single JSON array under their key, so every
/// mutation is one read and one write of that key. Set mutations hold
/// `mutation_lock` across both.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
	mutation_lock: Mutex<()>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self {
			backend,
			mutation_lock: Mutex::new(()),
		}
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Stores a serializable value.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Retrieves and deserializes a value.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps a missing key to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Reads a list. A missing list is empty.
	pub async fn get_list<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Vec<T>, StorageError> {
		Ok(self
			.retrieve_optional::<Vec<T>>(namespace, id)
			.await?
			.unwrap_or_default())
	}

	/// Replaces a list.
	pub async fn set_list<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		items: &[T],
	) -> Result<(), StorageError> {
		self.store(namespace, id, &items).await
	}

	/// Adds a member to a set. Returns `false` if it was already present.
	pub async fn set_add(&self, namespace: &str, id: &str, member: &str) -> Result<bool, StorageError> {
		let _guard = self.mutation_lock.lock().await;
		let mut members = self.set_members(namespace, id).await?;
		if !members.insert(member.to_string()) {
			return Ok(false);
		}
		self.store(namespace, id, &members).await?;
		Ok(true)
	}

	/// Removes a member from a set. Returns `false` if it was not present.
	pub async fn set_remove(
		&self,
		namespace: &str,
		id: &str,
		member: &str,
	) -> Result<bool, StorageError> {
		let _guard = self.mutation_lock.lock().await;
		let mut members = self.set_members(namespace, id).await?;
		if !members.remove(member) {
			return Ok(false);
		}
		self.store(namespace, id, &members).await?;
		Ok(true)
	}

	pub async fn set_contains(
		&self,
		namespace: &str,
		id: &str,
		member: &str,
	) -> Result<bool, StorageError> {
		Ok(self.set_members(namespace, id).await?.contains(member))
	}

	/// All members of a set in sorted order. A missing set is empty.
	pub async fn set_members(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<BTreeSet<String>, StorageError> {
		Ok(self
			.retrieve_optional::<BTreeSet<String>>(namespace, id)
			.await?
			.unwrap_or_default())
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `backend`: `"memory"` or `"file"` (default: `"file"`)
/// - `storage_path`: base directory for file storage (default: `"./data/storage"`)
pub fn create_storage(config: &toml::Value) -> Box<dyn StorageInterface> {
	match config.get("backend").and_then(|v| v.as_str()) {
		Some("memory") => Box::new(implementations::memory::MemoryStorage::new()),
		_ => implementations::file::create_storage(config),
	}
}
