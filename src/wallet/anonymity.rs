//! Anonymity set construction.
//!
//! The real sender and receiver are hidden among decoys in a shuffled list whose length is a
//! power of two. The proof system additionally requires the sender and receiver to sit at
//! positions of different parity.

use crate::crypto::PublicKey;
use crate::utils::is_valid_set_size;
use crate::wallet::{FriendDirectory, SessionError};

use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

/// Counterparties of a transfer, resolved but not yet shuffled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParties {
	pub sender: PublicKey,
	pub receiver: PublicKey,
	pub decoys: Vec<PublicKey>,
	/// Identity when no beneficiary was named.
	pub beneficiary: PublicKey,
}

impl ResolvedParties {
	pub fn size(&self) -> usize {
		2 + self.decoys.len()
	}
}

/// Shuffled participant list ready for a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymitySet {
	pub parties: Vec<PublicKey>,
	pub sender_index: usize,
	pub receiver_index: usize,
	pub beneficiary: PublicKey,
}

pub struct AnonymitySetBuilder<'a> {
	directory: &'a FriendDirectory,
}

impl<'a> AnonymitySetBuilder<'a> {
	pub fn new(directory: &'a FriendDirectory) -> Self {
		Self { directory }
	}

	/// Check the request and resolve every name, without shuffling.
	pub fn validate(
		&self,
		sender: &PublicKey,
		receiver: &str,
		decoys: &[String],
		beneficiary: Option<&str>,
	) -> Result<ResolvedParties, SessionError> {
		let size = 2 + decoys.len();
		if !is_valid_set_size(size) {
			return Err(SessionError::invalid_set_size(size));
		}

		let receiver_key = self.directory.resolve(receiver)?;
		if receiver_key == *sender {
			return Err(SessionError::SelfTransfer);
		}

		let mut seen: HashSet<PublicKey> = HashSet::from([*sender, receiver_key]);
		let mut decoy_keys = Vec::with_capacity(decoys.len());
		for name in decoys {
			let key = self.directory.resolve(name)?;
			if !seen.insert(key) {
				return Err(SessionError::DuplicateParty(name.clone()));
			}
			decoy_keys.push(key);
		}

		let beneficiary = match beneficiary {
			Some(name) => self.directory.resolve(name)?,
			None => PublicKey::identity(),
		};

		Ok(ResolvedParties {
			sender: *sender,
			receiver: receiver_key,
			decoys: decoy_keys,
			beneficiary,
		})
	}

	pub fn build(
		&self,
		sender: &PublicKey,
		receiver: &str,
		decoys: &[String],
		beneficiary: Option<&str>,
	) -> Result<AnonymitySet, SessionError> {
		let resolved = self.validate(sender, receiver, decoys, beneficiary)?;
		Ok(shuffle(resolved, &mut rand::rng()))
	}
}

/// Fisher–Yates shuffle of `[sender, receiver, ..decoys]` followed by parity correction.
pub fn shuffle<R: Rng + ?Sized>(resolved: ResolvedParties, rng: &mut R) -> AnonymitySet {
	let mut parties = Vec::with_capacity(resolved.size());
	parties.push(resolved.sender);
	parties.push(resolved.receiver);
	parties.extend(resolved.decoys);

	// origin[i] is the pre-shuffle position of the key now at slot i
	let mut origin: Vec<usize> = (0..parties.len()).collect();
	for m in (1..parties.len()).rev() {
		let i = rng.random_range(0..=m);
		parties.swap(i, m);
		origin.swap(i, m);
	}

	let position = |original: usize| origin.iter().position(|&o| o == original).unwrap_or(0);
	let sender_index = position(0);
	let mut receiver_index = position(1);

	if sender_index % 2 == receiver_index % 2 {
		let neighbour = if receiver_index % 2 == 0 {
			receiver_index + 1
		} else {
			receiver_index - 1
		};
		parties.swap(receiver_index, neighbour);
		receiver_index = neighbour;
	}

	debug!(
		"Anonymity set of {}: sender at {}, receiver at {}",
		parties.len(),
		sender_index,
		receiver_index
	);

	AnonymitySet {
		parties,
		sender_index,
		receiver_index,
		beneficiary: resolved.beneficiary,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Keypair;

	fn directory(names: &[&str]) -> FriendDirectory {
		let mut directory = FriendDirectory::new();
		for name in names {
			directory.add(name, *Keypair::generate().public());
		}
		directory
	}

	fn names(names: &[&str]) -> Vec<String> {
		names.iter().map(|n| n.to_string()).collect()
	}

	#[test]
	fn outputs_satisfy_size_and_parity_invariants() {
		let directory = directory(&["bob", "carol", "dave", "erin", "frank", "grace", "heidi"]);
		let me = *Keypair::generate().public();
		let builder = AnonymitySetBuilder::new(&directory);
		let decoy_sets = [
			names(&[]),
			names(&["carol", "dave"]),
			names(&["carol", "dave", "erin", "frank", "grace", "heidi"]),
		];

		for decoys in &decoy_sets {
			for _ in 0..200 {
				let set = builder.build(&me, "bob", decoys, None).unwrap();
				assert!(is_valid_set_size(set.parties.len()));
				assert_eq!(set.parties.len(), 2 + decoys.len());
				assert_ne!(set.sender_index % 2, set.receiver_index % 2);
				assert_eq!(set.parties[set.sender_index], me);
				assert_eq!(set.parties[set.receiver_index], directory.resolve("bob").unwrap());
				assert!(set.beneficiary.is_identity());
			}
		}
	}

	#[test]
	fn every_slot_is_reachable_for_the_sender() {
		let directory = directory(&["bob", "carol", "dave"]);
		let me = *Keypair::generate().public();
		let builder = AnonymitySetBuilder::new(&directory);
		let mut seen = [false; 4];
		for _ in 0..400 {
			let set = builder
				.build(&me, "bob", &names(&["carol", "dave"]), None)
				.unwrap();
			seen[set.sender_index] = true;
		}
		assert_eq!(seen, [true; 4]);
	}

	#[test]
	fn size_errors_come_before_name_resolution() {
		let directory = directory(&["bob"]);
		let me = *Keypair::generate().public();
		let builder = AnonymitySetBuilder::new(&directory);
		let err = builder
			.build(&me, "nobody", &names(&["x", "y", "z"]), None)
			.unwrap_err();
		assert!(matches!(
			err,
			SessionError::InvalidAnonymitySetSize {
				size: 5,
				add: 3,
				remove: 1
			}
		));
	}

	#[test]
	fn self_transfer_is_rejected_regardless_of_decoys() {
		let mut directory = directory(&["carol", "dave"]);
		let me = Keypair::generate();
		directory.add("me", *me.public());
		let builder = AnonymitySetBuilder::new(&directory);
		for decoys in [names(&[]), names(&["carol", "dave"])] {
			assert!(matches!(
				builder.build(me.public(), "me", &decoys, None),
				Err(SessionError::SelfTransfer)
			));
		}
	}

	#[test]
	fn unknown_names_and_duplicates_are_rejected() {
		let directory = directory(&["bob", "carol"]);
		let me = *Keypair::generate().public();
		let builder = AnonymitySetBuilder::new(&directory);
		assert!(matches!(
			builder.build(&me, "bob", &names(&["carol", "mallory"]), None),
			Err(SessionError::UnknownParty(name)) if name == "mallory"
		));
		assert!(matches!(
			builder.build(&me, "bob", &names(&["carol", "bob"]), None),
			Err(SessionError::DuplicateParty(name)) if name == "bob"
		));
		assert!(matches!(
			builder.build(&me, "bob", &[], Some("miner")),
			Err(SessionError::UnknownParty(name)) if name == "miner"
		));
	}

	#[test]
	fn named_beneficiary_is_resolved() {
		let directory = directory(&["bob", "miner"]);
		let me = *Keypair::generate().public();
		let set = AnonymitySetBuilder::new(&directory)
			.build(&me, "bob", &[], Some("miner"))
			.unwrap();
		assert_eq!(set.beneficiary, directory.resolve("miner").unwrap());
	}
}
