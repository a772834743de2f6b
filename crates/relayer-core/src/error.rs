//! Error types for the relayer core.

use relayer_chains::ChainError;
use relayer_executor::ExecutorError;
use relayer_storage::StorageError;
use relayer_verifier::VerifierError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayerError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Chain(#[from] ChainError),
	#[error(transparent)]
	Verifier(#[from] VerifierError),
	#[error(transparent)]
	Executor(#[from] ExecutorError),
	#[error("Service error: {0}")]
	Service(String),
}
