use crate::crypto::PublicKey;
use crate::wallet::SessionError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Names of counterparties and their public keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FriendDirectory {
	friends: HashMap<String, PublicKey>,
}

impl FriendDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Bind `name` to `key`, replacing any previous binding.
	pub fn add(&mut self, name: &str, key: PublicKey) {
		if self.friends.insert(name.to_string(), key).is_some() {
			info!("Friend \"{}\" updated", name);
		} else {
			info!("Friend \"{}\" added", name);
		}
	}

	pub fn remove(&mut self, name: &str) -> Result<PublicKey, SessionError> {
		let key = self
			.friends
			.remove(name)
			.ok_or_else(|| SessionError::UnknownParty(name.to_string()))?;
		info!("Friend \"{}\" removed", name);
		Ok(key)
	}

	/// All entries, sorted by name.
	pub fn list(&self) -> Vec<(String, PublicKey)> {
		let mut entries: Vec<_> = self
			.friends
			.iter()
			.map(|(name, key)| (name.clone(), *key))
			.collect();
		entries.sort_by(|a, b| a.0.cmp(&b.0));
		entries
	}

	pub fn get(&self, name: &str) -> Option<&PublicKey> {
		self.friends.get(name)
	}

	pub fn resolve(&self, name: &str) -> Result<PublicKey, SessionError> {
		self.get(name)
			.copied()
			.ok_or_else(|| SessionError::UnknownParty(name.to_string()))
	}

	pub fn len(&self) -> usize {
		self.friends.len()
	}

	pub fn is_empty(&self) -> bool {
		self.friends.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Keypair;

	#[test]
	fn add_resolve_remove() {
		let mut directory = FriendDirectory::new();
		let bob = *Keypair::generate().public();
		directory.add("bob", bob);
		assert_eq!(directory.resolve("bob").unwrap(), bob);
		assert_eq!(directory.remove("bob").unwrap(), bob);
		assert!(matches!(
			directory.resolve("bob"),
			Err(SessionError::UnknownParty(name)) if name == "bob"
		));
		assert!(directory.remove("bob").is_err());
	}

	#[test]
	fn list_is_sorted_and_rebinding_replaces() {
		let mut directory = FriendDirectory::new();
		let first = *Keypair::generate().public();
		let second = *Keypair::generate().public();
		directory.add("carol", first);
		directory.add("alice", first);
		directory.add("carol", second);
		let names: Vec<_> = directory.list().into_iter().map(|(n, _)| n).collect();
		assert_eq!(names, vec!["alice", "carol"]);
		assert_eq!(directory.resolve("carol").unwrap(), second);
		assert_eq!(directory.len(), 2);
	}
}
