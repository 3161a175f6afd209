//! Local projection of one account's confidential balance.

use serde::{Deserialize, Serialize};

/// Balance split into spendable funds and funds that settle at the next epoch boundary.
///
/// `pending` is signed: an outgoing transfer confirmed in the same epoch as the deposit that
/// funded it leaves a negative pending amount that is netted at rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountState {
	pub available: u64,
	pub pending: i64,
	/// Whether the epoch tag for `last_roll_over` has been spent.
	pub nonce_used: bool,
	pub last_roll_over: u64,
}

impl AccountState {
	/// State of a freshly registered account in `epoch`.
	pub fn new(epoch: u64) -> Self {
		Self {
			last_roll_over: epoch,
			..Self::default()
		}
	}

	pub fn epoch_of(timestamp: u64, epoch_length: u64) -> u64 {
		timestamp / epoch_length.max(1)
	}

	/// Roll pending funds over if `timestamp` falls in a later epoch than the last rollover.
	///
	/// Idempotent for a fixed timestamp; an earlier timestamp leaves the state untouched.
	pub fn simulate(&mut self, timestamp: u64, epoch_length: u64) -> &mut Self {
		let epoch = Self::epoch_of(timestamp, epoch_length);
		if self.last_roll_over < epoch {
			self.available = self.available.saturating_add_signed(self.pending);
			self.pending = 0;
			self.nonce_used = false;
			self.last_roll_over = epoch;
		}
		self
	}

	/// Projection at `timestamp` without mutating `self`.
	pub fn simulated(&self, timestamp: u64, epoch_length: u64) -> Self {
		let mut copy = *self;
		copy.simulate(timestamp, epoch_length);
		copy
	}

	pub fn balance(&self) -> u64 {
		self.available.saturating_add_signed(self.pending)
	}

	pub fn credit(&mut self, amount: u64) {
		self.pending = self.pending.saturating_add_unsigned(amount);
	}

	pub fn debit(&mut self, amount: u64) {
		self.pending = self.pending.saturating_sub_unsigned(amount);
	}

	/// Apply `effect` as settled by a block stamped `timestamp`.
	///
	/// An effect from an epoch this projection has already rolled past was folded into the
	/// ledger's spendable balance at that rollover, so it lands in `available`.
	pub fn settle(&mut self, timestamp: u64, epoch_length: u64, effect: TxEffect) {
		if Self::epoch_of(timestamp, epoch_length) < self.last_roll_over {
			self.available = self
				.available
				.saturating_add(effect.credit)
				.saturating_sub(effect.debit);
			return;
		}
		self.simulate(timestamp, epoch_length);
		self.credit(effect.credit);
		self.debit(effect.debit);
		if effect.spends_nonce {
			self.nonce_used = true;
		}
	}
}

/// Balance change caused by one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxEffect {
	pub credit: u64,
	pub debit: u64,
	/// Whether the transaction consumed the epoch tag.
	pub spends_nonce: bool,
}

impl TxEffect {
	pub fn credit(amount: u64) -> Self {
		Self {
			credit: amount,
			..Self::default()
		}
	}

	/// A spend of `amount` that uses up this epoch's tag.
	pub fn spend(amount: u64) -> Self {
		Self {
			debit: amount,
			spends_nonce: true,
			..Self::default()
		}
	}

	pub fn is_empty(&self) -> bool {
		self.credit == 0 && self.debit == 0
	}
}
