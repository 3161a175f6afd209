//! Progress tracking for ledger reconciliation.

use crate::ledger::EventClass;
use crate::wallet::sync::events::ReconcileEvent;

use std::collections::HashMap;
use tracing::info;

/// Blocks between two periodic progress lines.
const LOG_INTERVAL_BLOCKS: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
	pub applied: usize,
	pub self_originated: usize,
	pub irrelevant: usize,
	pub discarded: usize,
}

/// Counts what the reconciler did with each event class.
#[derive(Debug, Clone)]
pub struct ReconcileProgressTracker {
	start_block: u64,
	highest_block: u64,
	counts: HashMap<EventClass, ClassCounts>,
	/// Discards that could not be attributed to a class, such as lagged subscriptions.
	unclassified_discards: usize,
	credited: u64,
	debited: u64,
	last_logged_block: u64,
}

impl ReconcileProgressTracker {
	pub fn new(start_block: u64) -> Self {
		Self {
			start_block,
			highest_block: start_block,
			counts: HashMap::new(),
			unclassified_discards: 0,
			credited: 0,
			debited: 0,
			last_logged_block: start_block,
		}
	}

	fn entry(&mut self, class: EventClass) -> &mut ClassCounts {
		self.counts.entry(class).or_default()
	}

	pub fn record(&mut self, event: &ReconcileEvent) {
		match event {
			ReconcileEvent::Applied {
				class,
				block_number,
				credited,
				debited,
			} => {
				self.entry(*class).applied += 1;
				self.highest_block = self.highest_block.max(*block_number);
				self.credited = self.credited.saturating_add(*credited);
				self.debited = self.debited.saturating_add(*debited);
			}
			ReconcileEvent::SelfOriginated { class, .. } => self.entry(*class).self_originated += 1,
			ReconcileEvent::Irrelevant {
				class,
				block_number,
			} => {
				self.entry(*class).irrelevant += 1;
				self.highest_block = self.highest_block.max(*block_number);
			}
			ReconcileEvent::Discarded { class: Some(class), .. } => self.entry(*class).discarded += 1,
			ReconcileEvent::Discarded { class: None, .. } => self.unclassified_discards += 1,
			ReconcileEvent::StreamEnded => {}
		}
	}

	pub fn counts(&self, class: EventClass) -> ClassCounts {
		self.counts.get(&class).copied().unwrap_or_default()
	}

	/// Log every [`LOG_INTERVAL_BLOCKS`] blocks or when forced.
	pub fn log_progress(&mut self, force: bool) {
		let blocks_since_last_log = self.highest_block.saturating_sub(self.last_logged_block);
		if force || blocks_since_last_log >= LOG_INTERVAL_BLOCKS {
			info!("Reconcile progress: {}", self.get_stats().summary());
			self.last_logged_block = self.highest_block;
		}
	}

	pub fn get_stats(&self) -> ReconcileStats {
		let total = |f: fn(&ClassCounts) -> usize| self.counts.values().map(f).sum::<usize>();
		ReconcileStats {
			start_block: self.start_block,
			highest_block: self.highest_block,
			applied: total(|c| c.applied),
			self_originated: total(|c| c.self_originated),
			irrelevant: total(|c| c.irrelevant),
			discarded: total(|c| c.discarded) + self.unclassified_discards,
			credited: self.credited,
			debited: self.debited,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
	pub start_block: u64,
	pub highest_block: u64,
	pub applied: usize,
	pub self_originated: usize,
	pub irrelevant: usize,
	pub discarded: usize,
	pub credited: u64,
	pub debited: u64,
}

impl ReconcileStats {
	pub fn summary(&self) -> String {
		format!(
			"blocks {} to {}: {} applied (+{} / -{}), {} own, {} irrelevant{}",
			self.start_block,
			self.highest_block,
			self.applied,
			self.credited,
			self.debited,
			self.self_originated,
			self.irrelevant,
			if self.discarded == 0 {
				String::new()
			} else {
				format!(", {} discarded", self.discarded)
			}
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::TxId;

	#[test]
	fn outcomes_are_counted_per_class() {
		let mut tracker = ReconcileProgressTracker::new(10);
		tracker.record(&ReconcileEvent::Applied {
			class: EventClass::TransferOccurred,
			block_number: 12,
			credited: 7,
			debited: 0,
		});
		tracker.record(&ReconcileEvent::Applied {
			class: EventClass::Burned,
			block_number: 11,
			credited: 0,
			debited: 3,
		});
		tracker.record(&ReconcileEvent::SelfOriginated {
			class: EventClass::Deposited,
			tx_id: TxId("0x01".to_string()),
		});
		tracker.record(&ReconcileEvent::Discarded {
			class: None,
			reason: "lagged".to_string(),
		});

		assert_eq!(tracker.counts(EventClass::TransferOccurred).applied, 1);
		assert_eq!(tracker.counts(EventClass::Deposited).self_originated, 1);
		assert_eq!(tracker.get_stats().highest_block, 12);

		let stats = tracker.get_stats();
		assert_eq!((stats.applied, stats.discarded), (2, 1));
		assert_eq!((stats.credited, stats.debited), (7, 3));
		assert!(stats.summary().contains("1 discarded"));
	}
}
