//! Types exchanged with the ledger: contract calls, receipts and decoded events.

use crate::crypto::{Ciphertext, PublicKey, RegistrationSignature};

use curve25519_dalek::ristretto::RistrettoPoint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Parameters fixed by the confidential contract at deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
	/// Epoch length in seconds.
	#[serde(rename = "epochLength")]
	pub epoch_length: u64,
	/// Fee credited to the beneficiary of a transfer.
	pub fee: u64,
}

/// Transaction identifier, `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl fmt::Display for TxId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Opaque proof payload attached to transfer and burn calls.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofBytes(pub Vec<u8>);

impl fmt::Debug for ProofBytes {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ProofBytes({} bytes)", self.0.len())
	}
}

/// Calls understood by the confidential contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
	/// Bind a fresh public key to the ledger.
	Register {
		public_key: PublicKey,
		signature: RegistrationSignature,
	},
	/// Move transparent funds into the confidential pool under `public_key`.
	Fund { public_key: PublicKey, value: u64 },
	/// Confidential transfer across an anonymity set.
	Transfer {
		deltas: Vec<RistrettoPoint>,
		commitment: RistrettoPoint,
		parties: Vec<PublicKey>,
		epoch_tag: RistrettoPoint,
		proof: ProofBytes,
		beneficiary: PublicKey,
	},
	/// Move confidential funds back out of the pool.
	Burn {
		public_key: PublicKey,
		value: u64,
		epoch_tag: RistrettoPoint,
		proof: ProofBytes,
	},
}

impl ContractCall {
	pub fn name(&self) -> &'static str {
		match self {
			ContractCall::Register { .. } => "register",
			ContractCall::Fund { .. } => "fund",
			ContractCall::Transfer { .. } => "transfer",
			ContractCall::Burn { .. } => "burn",
		}
	}
}

/// A contract call encoded for submission from a ledger address.
///
/// The transaction id is derived from the encoding, so it is known before broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCall {
	pub from: String,
	pub nonce: u64,
	/// bincode encoding of a [`ContractCall`]
	pub payload: Vec<u8>,
}

impl SignedCall {
	pub fn encode(from: &str, nonce: u64, call: &ContractCall) -> Result<Self, LedgerError> {
		Ok(Self {
			from: from.to_string(),
			nonce,
			payload: bincode::serialize(call)?,
		})
	}

	pub fn decode(&self) -> Result<ContractCall, LedgerError> {
		Ok(bincode::deserialize(&self.payload)?)
	}

	pub fn tx_id(&self) -> TxId {
		let mut hasher = Sha256::new();
		hasher.update(self.from.as_bytes());
		hasher.update(self.nonce.to_be_bytes());
		hasher.update(&self.payload);
		TxId(format!("0x{}", hex::encode(hasher.finalize())))
	}
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
	#[serde(rename = "txId")]
	pub tx_id: TxId,
	#[serde(rename = "blockNumber")]
	pub block_number: u64,
	/// Block timestamp in seconds.
	pub timestamp: u64,
	pub status: bool,
	#[serde(rename = "revertReason", default)]
	pub revert_reason: Option<String>,
}

/// Event streams the ledger exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
	TransferOccurred,
	Deposited,
	Burned,
}

impl EventClass {
	pub const ALL: [EventClass; 3] = [
		EventClass::TransferOccurred,
		EventClass::Deposited,
		EventClass::Burned,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			EventClass::TransferOccurred => "TransferOccurred",
			EventClass::Deposited => "Deposited",
			EventClass::Burned => "Burned",
		}
	}
}

/// Where and when an event was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
	#[serde(rename = "txId")]
	pub tx_id: TxId,
	#[serde(rename = "blockNumber")]
	pub block_number: u64,
	/// Settlement time: the including block's timestamp, in seconds.
	pub timestamp: u64,
	/// Position of the event within its block.
	#[serde(rename = "logIndex", default)]
	pub log_index: u32,
}

impl EventMeta {
	/// Ledger order key.
	pub fn position(&self) -> (u64, u32) {
		(self.block_number, self.log_index)
	}
}

/// A confidential transfer together with its decoded call inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
	pub meta: EventMeta,
	pub parties: Vec<PublicKey>,
	/// Per-party left halves `C_i`; all share the commitment `D`.
	pub deltas: Vec<RistrettoPoint>,
	pub commitment: RistrettoPoint,
	pub beneficiary: PublicKey,
}

impl TransferRecord {
	/// Delta ciphertext for the party at `index`.
	pub fn delta(&self, index: usize) -> Option<Ciphertext> {
		self.deltas.get(index).map(|c| Ciphertext {
			c: *c,
			d: self.commitment,
		})
	}
}

/// A transparent amount entering or leaving the pool for a key binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChangeRecord {
	pub meta: EventMeta,
	/// SHA-256 of the compressed public key.
	pub binding: [u8; 32],
	pub amount: u64,
}

/// Decoded ledger events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
	TransferOccurred(TransferRecord),
	Deposited(BalanceChangeRecord),
	Burned(BalanceChangeRecord),
}

impl LedgerEvent {
	pub fn class(&self) -> EventClass {
		match self {
			LedgerEvent::TransferOccurred(_) => EventClass::TransferOccurred,
			LedgerEvent::Deposited(_) => EventClass::Deposited,
			LedgerEvent::Burned(_) => EventClass::Burned,
		}
	}

	pub fn meta(&self) -> &EventMeta {
		match self {
			LedgerEvent::TransferOccurred(record) => &record.meta,
			LedgerEvent::Deposited(record) | LedgerEvent::Burned(record) => &record.meta,
		}
	}
}

/// Error types for ledger queries, submission and subscriptions
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("RPC error: {0}")]
	RpcError(String),

	#[error("No data returned")]
	NoData,

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Call encoding error: {0}")]
	EncodingError(#[from] bincode::Error),

	#[error("Transaction reverted: {0}")]
	Reverted(String),

	#[error("Broadcast failed: {0}")]
	BroadcastError(String),

	#[error("Subscription error: {0}")]
	SubscriptionError(String),

	#[error("Malformed event: {0}")]
	MalformedEvent(String),
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Keypair;

	#[test]
	fn tx_id_depends_on_sender_nonce_and_payload() {
		let key = *Keypair::generate().public();
		let call = ContractCall::Fund {
			public_key: key,
			value: 100,
		};
		let first = SignedCall::encode("0xabc", 0, &call).unwrap();
		let again = SignedCall::encode("0xabc", 0, &call).unwrap();
		let next = SignedCall::encode("0xabc", 1, &call).unwrap();
		assert_eq!(first.tx_id(), again.tx_id());
		assert_ne!(first.tx_id(), next.tx_id());
		assert!(first.tx_id().0.starts_with("0x"));
		assert_eq!(first.decode().unwrap(), call);
	}

	#[test]
	fn transfer_record_pairs_deltas_with_the_commitment() {
		let key = *Keypair::generate().public();
		let record = TransferRecord {
			meta: EventMeta {
				tx_id: TxId("0x01".to_string()),
				block_number: 1,
				timestamp: 12,
				log_index: 0,
			},
			parties: vec![key],
			deltas: vec![*key.point()],
			commitment: *key.point(),
			beneficiary: PublicKey::identity(),
		};
		assert_eq!(record.delta(0).unwrap().d, *key.point());
		assert!(record.delta(1).is_none());
	}
}
