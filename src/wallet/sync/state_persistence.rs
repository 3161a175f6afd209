//! State persistence for account sessions.
//!
//! Snapshots hold the local balance projection, the friend directory and the last processed
//! block. Secrets are never written; a restored session still recovers its key from the secret
//! and its balance from the ledger, and uses the snapshot for everything the ledger cannot tell it.

use crate::crypto::PublicKey;
use crate::wallet::sync::repositories::{FileSnapshotRepository, SnapshotRepository};
use crate::wallet::{AccountState, FriendDirectory, SessionError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Everything about one account that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
	pub public_key: PublicKey,
	pub account: AccountState,
	pub friends: FriendDirectory,
	pub last_block: u64,
}

/// Service for saving and restoring account snapshots.
pub struct StatePersistenceService {
	repository: Box<dyn SnapshotRepository + Send + Sync>,
}

impl StatePersistenceService {
	/// Create a file-backed service for the given data directory.
	pub fn new(data_dir: PathBuf) -> Self {
		Self::with_repository(Box::new(FileSnapshotRepository::new(data_dir)))
	}

	pub fn with_repository(repository: Box<dyn SnapshotRepository + Send + Sync>) -> Self {
		Self { repository }
	}

	pub async fn save(&self, snapshot: &AccountSnapshot) -> Result<(), SessionError> {
		debug!(
			"Persisting snapshot for {} at block {}",
			snapshot.public_key, snapshot.last_block
		);
		self.repository.save(snapshot).await
	}

	pub async fn load(&self, public_key: &PublicKey) -> Result<Option<AccountSnapshot>, SessionError> {
		self.repository.load(public_key).await
	}
}
