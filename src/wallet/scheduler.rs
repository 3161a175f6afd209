//! Epoch arithmetic and the defer/retry loop for spending operations.
//!
//! A spend can only go through when its funds have settled, the account's epoch tag is unused,
//! and enough of the epoch remains to build and submit the proof. Anything else is waited out
//! until the next boundary, after which every condition is evaluated again from scratch.

use crate::config::SchedulerConfig;
use crate::utils::{Clock, format_wait};
use crate::wallet::{AccountState, SessionError};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Spending operation awaiting a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	Transfer { set_size: usize },
	Withdraw,
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Operation::Transfer { .. } => f.write_str("transfer"),
			Operation::Withdraw => f.write_str("withdrawal"),
		}
	}
}

/// Why an operation has to wait for the next epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
	/// Part of the required amount is still pending.
	AwaitingRollover,
	/// The epoch tag for this epoch has already been spent.
	NonceUsed,
	/// Too little of the epoch remains to prove and submit.
	InsufficientTime,
}

pub struct EpochScheduler {
	clock: Arc<dyn Clock>,
	epoch_length: u64,
	config: SchedulerConfig,
}

impl EpochScheduler {
	pub fn new(clock: Arc<dyn Clock>, epoch_length: u64, config: SchedulerConfig) -> Self {
		Self {
			clock,
			epoch_length: epoch_length.max(1),
			config,
		}
	}

	pub fn epoch_length(&self) -> u64 {
		self.epoch_length
	}

	pub fn epoch_of(&self, timestamp: u64) -> u64 {
		timestamp / self.epoch_length
	}

	pub fn current_epoch(&self) -> u64 {
		self.epoch_of(self.clock.now_secs())
	}

	/// Time until the next epoch boundary. Never zero: on a boundary this is a full epoch.
	pub fn time_to_next_boundary(&self) -> Duration {
		let length_ms = self.epoch_length as u128 * 1000;
		let now_ms = self.clock.now().as_millis();
		let next = (now_ms / length_ms + 1) * length_ms;
		Duration::from_millis((next - now_ms) as u64)
	}

	/// Upper bound on proving plus a few verifications for a set of `set_size` parties.
	pub fn feasibility_estimate(&self, set_size: usize, with_submission: bool) -> Duration {
		let size = set_size.max(1) as f64;
		let proving = (size * size.log2() * self.config.per_party_ms as f64
			+ self.config.base_ms as f64)
			.ceil() as u64;
		let overhead = if with_submission {
			self.config.submission_overhead_ms
		} else {
			0
		};
		Duration::from_millis(proving + overhead)
	}

	/// Reject set sizes that cannot be proven within a whole epoch.
	pub fn check_feasible(&self, set_size: usize) -> Result<(), SessionError> {
		let estimate = self.feasibility_estimate(set_size, false);
		if estimate > Duration::from_secs(self.epoch_length) {
			return Err(SessionError::EpochFeasibilityExceeded {
				size: set_size,
				epoch_length: self.epoch_length,
				suggested_secs: self
					.feasibility_estimate(set_size, true)
					.as_millis()
					.div_ceil(1000) as u64,
			});
		}
		Ok(())
	}

	/// Decide whether `operation` spending `required` can run now given the settled `state`.
	pub fn evaluate(
		&self,
		operation: Operation,
		required: u64,
		state: &AccountState,
		remaining: Duration,
	) -> Result<Option<Deferral>, SessionError> {
		if required > state.balance() {
			return Err(SessionError::InsufficientBalance {
				requested: required,
				balance: state.balance(),
			});
		}
		if required > state.available {
			return Ok(Some(Deferral::AwaitingRollover));
		}
		if state.nonce_used {
			return Ok(Some(Deferral::NonceUsed));
		}
		let needed = match operation {
			Operation::Transfer { set_size } => self.feasibility_estimate(set_size, false),
			Operation::Withdraw => Duration::from_millis(self.config.burn_latency_ms),
		};
		if needed > remaining {
			return Ok(Some(Deferral::InsufficientTime));
		}
		Ok(None)
	}

	/// Wait until `operation` is allowed to run and return the settled account snapshot.
	///
	/// The lock on `state` is only held while taking a snapshot, never across a sleep.
	pub async fn schedule_or_defer(
		&self,
		operation: Operation,
		required: u64,
		state: &Mutex<AccountState>,
	) -> Result<AccountState, SessionError> {
		let mut deferrals = 0u32;
		loop {
			let remaining = self.time_to_next_boundary();
			let snapshot = state
				.lock()
				.await
				.simulated(self.clock.now_secs(), self.epoch_length);

			let Some(deferral) = self.evaluate(operation, required, &snapshot, remaining)? else {
				debug!(
					"{} cleared to run with {} left in epoch {}",
					operation,
					format_wait(remaining),
					snapshot.last_roll_over
				);
				return Ok(snapshot);
			};

			if let Some(limit) = self.config.max_deferrals {
				if deferrals >= limit {
					return Err(SessionError::DeferralLimitExceeded(deferrals));
				}
			}
			deferrals += 1;

			match deferral {
				Deferral::AwaitingRollover => info!(
					"Your {} has been queued. Please wait {}, for the release of your funds...",
					operation,
					format_wait(remaining)
				),
				Deferral::InsufficientTime
					if remaining < Duration::from_millis(self.config.burn_latency_ms) =>
				{
					info!("Initiating {}.", operation)
				}
				Deferral::NonceUsed | Deferral::InsufficientTime => info!(
					"Your {} has been queued. Please wait {}, until the next epoch...",
					operation,
					format_wait(remaining)
				),
			}
			self.clock.sleep(remaining).await;
		}
	}
}
