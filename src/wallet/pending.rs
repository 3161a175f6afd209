use crate::ledger::TxId;
use crate::utils::Clock;
use crate::wallet::TxEffect;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
	/// Broadcast, receipt not yet seen by the orchestrator.
	InFlight,
	/// The ledger event arrived while the orchestrator was still waiting.
	Seen { timestamp: u64 },
	/// The orchestrator applied the effect; the event has not arrived yet.
	Confirmed,
	/// The orchestrator stopped waiting without knowing the outcome.
	Abandoned,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
	inserted: Duration,
	effect: TxEffect,
	state: TxState,
}

/// What the reconciler should do with an event, given the registry's view of its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
	/// Not one of ours.
	Untracked,
	/// Ours, and its effect is applied by the orchestrator.
	Own,
	/// Ours, but the orchestrator gave up on it. The reconciler applies the effect.
	Orphaned(TxEffect),
}

/// Transactions this client originated whose events have not been seen yet.
///
/// Exactly one side applies each transaction's effect. The orchestrator inserts before broadcast
/// and applies the effect on a successful receipt; the reconciler applies it only when the
/// orchestrator abandoned the transaction. Entries that never match are evicted after `ttl`.
pub struct PendingTxRegistry {
	clock: Arc<dyn Clock>,
	ttl: Duration,
	entries: Mutex<HashMap<TxId, Entry>>,
}

impl PendingTxRegistry {
	pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
		Self {
			clock,
			ttl,
			entries: Mutex::new(HashMap::new()),
		}
	}

	fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<TxId, Entry>> {
		self.entries.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Track `tx_id` before it is broadcast.
	pub fn insert(&self, tx_id: TxId, effect: TxEffect) {
		let now = self.clock.now();
		let mut entries = self.entries();
		Self::sweep_locked(&mut entries, now, self.ttl);
		entries.insert(
			tx_id,
			Entry {
				inserted: now,
				effect,
				state: TxState::InFlight,
			},
		);
	}

	/// Track the transaction under the id the node reported instead of the precomputed one.
	pub fn rename(&self, from: &TxId, to: TxId) {
		let mut entries = self.entries();
		if let Some(entry) = entries.remove(from) {
			entries.insert(to, entry);
		}
	}

	/// Forget a transaction that was never broadcast or that reverted.
	pub fn release(&self, tx_id: &TxId) {
		self.entries().remove(tx_id);
	}

	/// The orchestrator applied the effect of `tx_id`.
	pub fn confirm(&self, tx_id: &TxId) {
		let mut entries = self.entries();
		match entries.get(tx_id).map(|entry| entry.state) {
			Some(TxState::Seen { .. }) => {
				entries.remove(tx_id);
			}
			Some(_) => {
				if let Some(entry) = entries.get_mut(tx_id) {
					entry.state = TxState::Confirmed;
				}
			}
			None => {}
		}
	}

	/// The orchestrator stopped waiting for `tx_id`.
	///
	/// Returns the settlement timestamp if the event was already seen, in which case the caller
	/// must apply the effect itself. Otherwise the reconciler applies it when the event arrives.
	pub fn abandon(&self, tx_id: &TxId) -> Option<u64> {
		let mut entries = self.entries();
		match entries.get(tx_id).map(|entry| entry.state) {
			Some(TxState::Seen { timestamp }) => {
				entries.remove(tx_id);
				Some(timestamp)
			}
			Some(_) => {
				if let Some(entry) = entries.get_mut(tx_id) {
					entry.state = TxState::Abandoned;
				}
				None
			}
			None => None,
		}
	}

	/// Record that the event for `tx_id` settled at `timestamp`.
	pub fn observe(&self, tx_id: &TxId, timestamp: u64) -> Sighting {
		let mut entries = self.entries();
		let Some(entry) = entries.get_mut(tx_id) else {
			return Sighting::Untracked;
		};
		match entry.state {
			TxState::InFlight => {
				entry.state = TxState::Seen { timestamp };
				Sighting::Own
			}
			TxState::Seen { .. } => Sighting::Own,
			TxState::Confirmed => {
				entries.remove(tx_id);
				Sighting::Own
			}
			TxState::Abandoned => {
				let effect = entry.effect;
				entries.remove(tx_id);
				Sighting::Orphaned(effect)
			}
		}
	}

	pub fn contains(&self, tx_id: &TxId) -> bool {
		self.entries().contains_key(tx_id)
	}

	pub fn len(&self) -> usize {
		self.entries().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Evict entries older than the TTL. Returns how many were dropped.
	pub fn sweep(&self) -> usize {
		let now = self.clock.now();
		Self::sweep_locked(&mut self.entries(), now, self.ttl)
	}

	fn sweep_locked(entries: &mut HashMap<TxId, Entry>, now: Duration, ttl: Duration) -> usize {
		let before = entries.len();
		entries.retain(|tx_id, entry| {
			let keep = now.saturating_sub(entry.inserted) < ttl;
			if !keep && entry.state == TxState::Abandoned {
				warn!("Abandoned transaction {} never appeared on the ledger", tx_id);
			}
			keep
		});
		let evicted = before - entries.len();
		if evicted > 0 {
			debug!("Evicted {} unmatched pending transaction(s)", evicted);
		}
		evicted
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::utils::ManualClock;

	fn registry() -> (Arc<ManualClock>, PendingTxRegistry) {
		let clock = Arc::new(ManualClock::new(Duration::ZERO));
		let registry = PendingTxRegistry::new(clock.clone(), Duration::from_secs(60));
		(clock, registry)
	}

	fn tx(id: &str) -> TxId {
		TxId(id.to_string())
	}

	#[test]
	fn confirmed_transactions_are_skipped_once() {
		let (_, registry) = registry();
		registry.insert(tx("0x01"), TxEffect::credit(5));
		registry.confirm(&tx("0x01"));
		assert!(registry.contains(&tx("0x01")));

		assert_eq!(registry.observe(&tx("0x01"), 12), Sighting::Own);
		assert_eq!(registry.observe(&tx("0x01"), 12), Sighting::Untracked);
		assert!(registry.is_empty());
	}

	#[test]
	fn event_before_receipt_is_left_to_the_orchestrator() {
		let (_, registry) = registry();
		registry.insert(tx("0x01"), TxEffect::credit(5));
		assert_eq!(registry.observe(&tx("0x01"), 12), Sighting::Own);
		registry.confirm(&tx("0x01"));
		assert!(registry.is_empty());

		registry.insert(tx("0x02"), TxEffect::spend(3));
		assert_eq!(registry.observe(&tx("0x02"), 14), Sighting::Own);
		assert_eq!(registry.abandon(&tx("0x02")), Some(14));
		assert!(registry.is_empty());
	}

	#[test]
	fn abandoned_transactions_are_handed_to_the_reconciler() {
		let (_, registry) = registry();
		registry.insert(tx("0x01"), TxEffect::spend(12));
		assert_eq!(registry.abandon(&tx("0x01")), None);
		assert_eq!(
			registry.observe(&tx("0x01"), 20),
			Sighting::Orphaned(TxEffect::spend(12))
		);
		assert!(registry.is_empty());
	}

	#[test]
	fn renamed_entries_match_the_node_id() {
		let (_, registry) = registry();
		registry.insert(tx("0x01"), TxEffect::credit(5));
		registry.rename(&tx("0x01"), tx("0x99"));
		assert_eq!(registry.observe(&tx("0x01"), 1), Sighting::Untracked);
		assert_eq!(registry.observe(&tx("0x99"), 1), Sighting::Own);

		registry.release(&tx("0x99"));
		assert!(registry.is_empty());
	}

	#[test]
	fn stale_entries_are_evicted() {
		let (clock, registry) = registry();
		registry.insert(tx("0x01"), TxEffect::default());
		clock.advance(Duration::from_secs(30));
		registry.insert(tx("0x02"), TxEffect::default());
		clock.advance(Duration::from_secs(30));

		assert_eq!(registry.sweep(), 1);
		assert!(!registry.contains(&tx("0x01")));
		assert!(registry.contains(&tx("0x02")));

		clock.advance(Duration::from_secs(30));
		registry.insert(tx("0x03"), TxEffect::default());
		assert_eq!(registry.len(), 1);
	}
}
