use crate::crypto::PublicKey;
use crate::wallet::SessionError;
use crate::wallet::sync::state_persistence::AccountSnapshot;

use std::path::PathBuf;
use tracing::{info, warn};

/// Repository for account snapshot persistence
#[async_trait::async_trait]
pub trait SnapshotRepository {
	async fn save(&self, snapshot: &AccountSnapshot) -> Result<(), SessionError>;
	async fn load(&self, public_key: &PublicKey) -> Result<Option<AccountSnapshot>, SessionError>;
}

/// File-based implementation of SnapshotRepository
///
/// One JSON document per key, named after the key's binding, plus a small metadata file.
pub struct FileSnapshotRepository {
	data_dir: PathBuf,
}

impl FileSnapshotRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_snapshot_filename(&self, public_key: &PublicKey) -> PathBuf {
		self.data_dir
			.join(format!("account_{}.json", hex::encode(public_key.binding())))
	}

	fn get_metadata_filename(&self, public_key: &PublicKey) -> PathBuf {
		self.data_dir
			.join(format!("account_{}.meta.json", hex::encode(public_key.binding())))
	}
}

#[async_trait::async_trait]
impl SnapshotRepository for FileSnapshotRepository {
	async fn save(&self, snapshot: &AccountSnapshot) -> Result<(), SessionError> {
		tokio::fs::create_dir_all(&self.data_dir)
			.await
			.map_err(|e| {
				SessionError::Persistence(format!("Failed to create data directory: {}", e))
			})?;

		let metadata = serde_json::json!({
			"last_block": snapshot.last_block,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});
		let metadata_filename = self.get_metadata_filename(&snapshot.public_key);
		let metadata = serde_json::to_string_pretty(&metadata).map_err(|e| {
			SessionError::Persistence(format!("Failed to serialize snapshot metadata: {}", e))
		})?;
		tokio::fs::write(&metadata_filename, metadata)
			.await
			.map_err(|e| {
				SessionError::Persistence(format!("Failed to write snapshot metadata: {}", e))
			})?;

		let content = serde_json::to_string_pretty(snapshot).map_err(|e| {
			SessionError::Persistence(format!("Failed to serialize account snapshot: {}", e))
		})?;

		// Write to a sibling file first so a crash never leaves a truncated snapshot
		let filename = self.get_snapshot_filename(&snapshot.public_key);
		let staging = filename.with_extension("json.tmp");
		tokio::fs::write(&staging, content).await.map_err(|e| {
			SessionError::Persistence(format!("Failed to write account snapshot: {}", e))
		})?;
		tokio::fs::rename(&staging, &filename).await.map_err(|e| {
			SessionError::Persistence(format!("Failed to move account snapshot into place: {}", e))
		})?;

		info!(
			"Saved account snapshot to {:?} at block {}",
			filename, snapshot.last_block
		);
		Ok(())
	}

	async fn load(&self, public_key: &PublicKey) -> Result<Option<AccountSnapshot>, SessionError> {
		let filename = self.get_snapshot_filename(public_key);
		if !tokio::fs::try_exists(&filename).await? {
			return Ok(None);
		}

		let content = tokio::fs::read_to_string(&filename).await.map_err(|e| {
			SessionError::Persistence(format!("Failed to read account snapshot: {}", e))
		})?;
		let snapshot: AccountSnapshot = serde_json::from_str(&content).map_err(|e| {
			SessionError::Persistence(format!("Failed to parse account snapshot: {}", e))
		})?;

		if snapshot.public_key != *public_key {
			warn!(
				"Snapshot {:?} belongs to {}, ignoring it",
				filename, snapshot.public_key
			);
			return Ok(None);
		}

		info!(
			"Loaded account snapshot from {:?} at block {}",
			filename, snapshot.last_block
		);
		Ok(Some(snapshot))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Keypair;
	use crate::wallet::{AccountState, FriendDirectory};

	fn snapshot(public_key: PublicKey) -> AccountSnapshot {
		let mut friends = FriendDirectory::new();
		friends.add("bob", *Keypair::generate().public());
		AccountSnapshot {
			public_key,
			account: AccountState {
				available: 40,
				pending: -5,
				nonce_used: true,
				last_roll_over: 9,
			},
			friends,
			last_block: 17,
		}
	}

	#[tokio::test]
	async fn saved_snapshot_loads_back() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileSnapshotRepository::new(dir.path().join("nested"));
		let key = *Keypair::generate().public();
		let saved = snapshot(key);

		repo.save(&saved).await.unwrap();
		assert_eq!(repo.load(&key).await.unwrap(), Some(saved));
	}

	#[tokio::test]
	async fn unknown_key_has_no_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileSnapshotRepository::new(dir.path().to_path_buf());
		repo.save(&snapshot(*Keypair::generate().public())).await.unwrap();

		let other = *Keypair::generate().public();
		assert_eq!(repo.load(&other).await.unwrap(), None);
	}

	#[tokio::test]
	async fn corrupt_snapshot_is_a_persistence_error() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileSnapshotRepository::new(dir.path().to_path_buf());
		let key = *Keypair::generate().public();
		tokio::fs::write(repo.get_snapshot_filename(&key), "{ not json")
			.await
			.unwrap();

		assert!(matches!(
			repo.load(&key).await,
			Err(SessionError::Persistence(_))
		));
	}
}
