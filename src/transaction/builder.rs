//! Confidential transaction builder
//!
//! Turns a resolved anonymity set into the per-party ciphertext deltas, the proof statement and
//! witness, and finally the contract call that carries them.

use crate::crypto::{Ciphertext, Keypair, PublicKey, random_scalar};
use crate::ledger::{ContractCall, ProofBytes};
use crate::transaction::prover::{BurnStatement, BurnWitness, TransferStatement, TransferWitness};

use curve25519_dalek::{
	constants::RISTRETTO_BASEPOINT_POINT as G, ristretto::RistrettoPoint, scalar::Scalar,
};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransactionError {
	#[error("Transaction validation error: {0}")]
	ValidationError(String),

	#[error("Missing builder input: {0}")]
	MissingInput(&'static str),
}

/// Ephemeral inputs of one confidential transfer. Dropped once the call resolves.
#[derive(Clone)]
pub struct TransferIntent {
	pub parties: Vec<PublicKey>,
	pub sender_index: usize,
	pub receiver_index: usize,
	pub beneficiary: PublicKey,
	pub value: u64,
	pub fee: u64,
	pub epoch: u64,
	/// Per-party deltas; all share `commitment` as their right half.
	pub deltas: Vec<Ciphertext>,
	pub commitment: RistrettoPoint,
	randomness: Scalar,
}

impl std::fmt::Debug for TransferIntent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransferIntent")
			.field("parties", &self.parties.len())
			.field("sender_index", &self.sender_index)
			.field("receiver_index", &self.receiver_index)
			.field("value", &self.value)
			.field("fee", &self.fee)
			.field("epoch", &self.epoch)
			.finish_non_exhaustive()
	}
}

impl TransferIntent {
	/// Amount encrypted into the delta at `index`.
	fn amount_at(&self, index: usize) -> i64 {
		if index == self.sender_index {
			-((self.value + self.fee) as i64)
		} else if index == self.receiver_index {
			self.value as i64
		} else {
			0
		}
	}

	/// Public statement for the balances fetched at `self.epoch`.
	pub fn statement(
		&self,
		pre_states: Vec<Ciphertext>,
		epoch_tag: RistrettoPoint,
	) -> Result<TransferStatement, TransactionError> {
		if pre_states.len() != self.parties.len() {
			return Err(TransactionError::ValidationError(format!(
				"{} balances for {} parties",
				pre_states.len(),
				self.parties.len()
			)));
		}
		let post_states = pre_states
			.iter()
			.zip(&self.deltas)
			.map(|(pre, delta)| *pre + *delta)
			.collect();
		Ok(TransferStatement {
			epoch: self.epoch,
			fee: self.fee,
			parties: self.parties.clone(),
			pre_states,
			deltas: self.deltas.clone(),
			post_states,
			epoch_tag,
		})
	}

	pub fn witness(&self, sender: &Keypair, remaining_balance: u64) -> TransferWitness {
		TransferWitness {
			secret: *sender.secret(),
			randomness: self.randomness,
			value: self.value,
			remaining_balance,
			sender_index: self.sender_index,
			receiver_index: self.receiver_index,
		}
	}

	pub fn into_call(self, epoch_tag: RistrettoPoint, proof: ProofBytes) -> ContractCall {
		ContractCall::Transfer {
			deltas: self.deltas.iter().map(|delta| delta.c).collect(),
			commitment: self.commitment,
			parties: self.parties,
			epoch_tag,
			proof,
			beneficiary: self.beneficiary,
		}
	}
}

/// Builder for [`TransferIntent`]
#[derive(Default)]
pub struct TransferBuilder {
	parties: Option<Vec<PublicKey>>,
	indices: Option<(usize, usize)>,
	beneficiary: Option<PublicKey>,
	value: u64,
	fee: u64,
	epoch: Option<u64>,
	randomness: Option<Scalar>,
}

impl TransferBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the ordered anonymity set with the sender and receiver positions
	pub fn with_parties(mut self, parties: Vec<PublicKey>, sender: usize, receiver: usize) -> Self {
		self.parties = Some(parties);
		self.indices = Some((sender, receiver));
		self
	}

	pub fn with_beneficiary(mut self, beneficiary: PublicKey) -> Self {
		self.beneficiary = Some(beneficiary);
		self
	}

	pub fn with_amount(mut self, value: u64, fee: u64) -> Self {
		self.value = value;
		self.fee = fee;
		self
	}

	pub fn with_epoch(mut self, epoch: u64) -> Self {
		self.epoch = Some(epoch);
		self
	}

	/// Fixes the blinding randomness instead of sampling a fresh one
	pub fn with_randomness(mut self, randomness: Scalar) -> Self {
		self.randomness = Some(randomness);
		self
	}

	pub fn build(self) -> Result<TransferIntent, TransactionError> {
		let parties = self.parties.ok_or(TransactionError::MissingInput("parties"))?;
		let (sender_index, receiver_index) =
			self.indices.ok_or(TransactionError::MissingInput("parties"))?;
		let epoch = self.epoch.ok_or(TransactionError::MissingInput("epoch"))?;

		if sender_index >= parties.len() || receiver_index >= parties.len() {
			return Err(TransactionError::ValidationError(format!(
				"indices ({}, {}) out of bounds for {} parties",
				sender_index,
				receiver_index,
				parties.len()
			)));
		}
		if sender_index == receiver_index {
			return Err(TransactionError::ValidationError(
				"sender and receiver share a slot".to_string(),
			));
		}
		let total = self
			.value
			.checked_add(self.fee)
			.filter(|total| *total <= i64::MAX as u64)
			.ok_or_else(|| TransactionError::ValidationError("amount overflows".to_string()))?;

		let randomness = self.randomness.unwrap_or_else(random_scalar);
		let mut intent = TransferIntent {
			parties,
			sender_index,
			receiver_index,
			beneficiary: self.beneficiary.unwrap_or_else(PublicKey::identity),
			value: self.value,
			fee: self.fee,
			epoch,
			deltas: Vec::new(),
			commitment: G * randomness,
			randomness,
		};
		intent.deltas = (0..intent.parties.len())
			.map(|i| Ciphertext::encrypt(intent.amount_at(i), &intent.parties[i], &randomness))
			.collect();

		debug!(
			"Built transfer of {} (total debit {}) across {} parties for epoch {}",
			intent.value,
			total,
			intent.parties.len(),
			epoch
		);
		Ok(intent)
	}
}

/// Ephemeral inputs of one withdrawal.
#[derive(Debug, Clone)]
pub struct BurnIntent {
	pub public_key: PublicKey,
	pub value: u64,
	pub epoch: u64,
	/// Ledger address that receives the transparent funds.
	pub recipient: String,
}

impl BurnIntent {
	pub fn new(public_key: PublicKey, value: u64, epoch: u64, recipient: &str) -> Self {
		Self {
			public_key,
			value,
			epoch,
			recipient: recipient.to_string(),
		}
	}

	pub fn statement(&self, pre_state: Ciphertext, epoch_tag: RistrettoPoint) -> BurnStatement {
		BurnStatement {
			public_key: self.public_key,
			epoch: self.epoch,
			recipient: self.recipient.clone(),
			value: self.value,
			pre_state,
			post_state: pre_state.plus(-(self.value as i64)),
			epoch_tag,
		}
	}

	pub fn witness(&self, owner: &Keypair, remaining_balance: u64) -> BurnWitness {
		BurnWitness {
			secret: *owner.secret(),
			remaining_balance,
		}
	}

	pub fn into_call(self, epoch_tag: RistrettoPoint, proof: ProofBytes) -> ContractCall {
		ContractCall::Burn {
			public_key: self.public_key,
			value: self.value,
			epoch_tag,
			proof,
		}
	}
}
