use crate::crypto::CryptoError;
use crate::ledger::LedgerError;
use crate::transaction::{ProverError, TransactionError};
use crate::utils::power_of_two_bounds;

/// Coarse classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Bad input from the caller. Never retried.
	Validation,
	/// The ledger refused or reverted a submission.
	LedgerRejection,
	/// Ledger state contradicts what the protocol guarantees.
	ProtocolInvariant,
	/// Network, prover or storage failure.
	Transport,
	Configuration,
}

/// Errors surfaced by session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error("Account is not registered; register or recover a key first")]
	NotRegistered,

	#[error("Account is already registered as {0}")]
	AlreadyRegistered(String),

	#[error("Requested amount of {requested} exceeds account balance of {balance}")]
	InsufficientBalance { requested: u64, balance: u64 },

	#[error(
		"Anonymity set size {size} (sender + receiver + decoys) must be a power of two: add {add} or remove {remove} decoy(s)"
	)]
	InvalidAnonymitySetSize {
		size: usize,
		add: usize,
		remove: usize,
	},

	#[error("Name \"{0}\" is not known")]
	UnknownParty(String),

	#[error("Participant(s) at index {indices:?} are not registered")]
	UnregisteredParty { indices: Vec<usize> },

	#[error("Sending to yourself is currently unsupported (and useless!)")]
	SelfTransfer,

	#[error("\"{0}\" appears more than once in the anonymity set")]
	DuplicateParty(String),

	#[error(
		"Anonymity set size of {size} cannot be proven within an epoch of {epoch_length} seconds; use an epoch length of at least {suggested_secs} seconds"
	)]
	EpochFeasibilityExceeded {
		size: usize,
		epoch_length: u64,
		suggested_secs: u64,
	},

	#[error("Operation deferred {0} times without becoming feasible")]
	DeferralLimitExceeded(u32),

	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Prover error: {0}")]
	Prover(#[from] ProverError),

	#[error("Crypto error: {0}")]
	Crypto(#[from] CryptoError),

	#[error("Transaction error: {0}")]
	Transaction(#[from] TransactionError),

	#[error("Ledger reports an inconsistent state: {0}")]
	Inconsistent(String),

	#[error("Persistence error: {0}")]
	Persistence(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Configuration error: {0}")]
	Config(String),
}

impl SessionError {
	/// Error for an anonymity set of `size`, with the nearest valid sizes on either side.
	pub fn invalid_set_size(size: usize) -> Self {
		let (previous, next) = power_of_two_bounds(size);
		SessionError::InvalidAnonymitySetSize {
			size,
			add: next - size,
			remove: size - previous,
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			SessionError::NotRegistered
			| SessionError::AlreadyRegistered(_)
			| SessionError::InsufficientBalance { .. }
			| SessionError::InvalidAnonymitySetSize { .. }
			| SessionError::UnknownParty(_)
			| SessionError::SelfTransfer
			| SessionError::DuplicateParty(_)
			| SessionError::EpochFeasibilityExceeded { .. }
			| SessionError::DeferralLimitExceeded(_)
			| SessionError::Transaction(_) => ErrorKind::Validation,
			SessionError::Ledger(LedgerError::Reverted(_))
			| SessionError::Ledger(LedgerError::BroadcastError(_)) => ErrorKind::LedgerRejection,
			SessionError::UnregisteredParty { .. } | SessionError::Inconsistent(_) => {
				ErrorKind::ProtocolInvariant
			}
			SessionError::Ledger(_)
			| SessionError::Prover(_)
			| SessionError::Persistence(_)
			| SessionError::Io(_) => ErrorKind::Transport,
			SessionError::Crypto(_) | SessionError::Config(_) => ErrorKind::Configuration,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_size_error_names_both_directions() {
		let err = SessionError::invalid_set_size(5);
		assert!(matches!(
			err,
			SessionError::InvalidAnonymitySetSize {
				size: 5,
				add: 3,
				remove: 1
			}
		));
		let message = err.to_string();
		assert!(message.contains("add 3"));
		assert!(message.contains("remove 1"));
	}

	#[test]
	fn size_three_is_one_away_either_way() {
		let message = SessionError::invalid_set_size(3).to_string();
		assert!(message.contains("add 1"));
		assert!(message.contains("remove 1"));
	}

	#[test]
	fn rejections_and_validation_are_told_apart() {
		assert_eq!(SessionError::SelfTransfer.kind(), ErrorKind::Validation);
		assert_eq!(
			SessionError::Ledger(LedgerError::Reverted("nope".into())).kind(),
			ErrorKind::LedgerRejection
		);
		assert_eq!(
			SessionError::UnregisteredParty { indices: vec![1] }.kind(),
			ErrorKind::ProtocolInvariant
		);
		assert_eq!(
			SessionError::Ledger(LedgerError::NoData).kind(),
			ErrorKind::Transport
		);
	}
}
