//! Submission pipeline for contract calls.
//!
//! Calls are encoded against the sender's current ledger nonce, dry-run to surface revert
//! reasons, broadcast, and then awaited until a receipt is available. Broadcast and receipt are
//! separate steps: once a call is broadcast its outcome is unknown until a receipt is seen.

use crate::ledger::{ContractCall, LedgerConnector, LedgerError, Receipt, SignedCall, TxId};

use std::sync::Arc;
use tracing::{debug, error, info};

/// Transaction sender for one ledger address
#[derive(Clone)]
pub struct Sender {
	ledger: Arc<dyn LedgerConnector>,
	address: String,
}

impl Sender {
	pub fn new(ledger: Arc<dyn LedgerConnector>, address: String) -> Self {
		Self { ledger, address }
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	/// Encode `call` for the next nonce. The returned call's id is final.
	pub async fn prepare(&self, call: &ContractCall) -> Result<SignedCall, LedgerError> {
		let nonce = self.ledger.account_nonce(&self.address).await?;
		let signed = SignedCall::encode(&self.address, nonce, call)?;
		debug!(
			"Prepared {} call {} with nonce {}",
			call.name(),
			signed.tx_id(),
			nonce
		);
		Ok(signed)
	}

	/// Dry-run and broadcast. Returns the id the node assigned.
	pub async fn broadcast(&self, signed: &SignedCall) -> Result<TxId, LedgerError> {
		if let Err(e) = self.ledger.simulate_call(signed).await {
			error!("Call {} fails in simulation: {}", signed.tx_id(), e);
			return Err(e);
		}

		let tx_id = self.ledger.submit_transaction(signed).await?;
		debug!("SENT {}", tx_id);
		Ok(tx_id)
	}

	/// Wait for inclusion of a broadcast call. A failed receipt is a [`LedgerError::Reverted`].
	pub async fn await_receipt(&self, tx_id: &TxId) -> Result<Receipt, LedgerError> {
		let receipt = self.ledger.wait_for_receipt(tx_id).await?;
		if !receipt.status {
			let reason = receipt
				.revert_reason
				.unwrap_or_else(|| "no reason given".to_string());
			error!("Transaction {} failed: {}", tx_id, reason);
			return Err(LedgerError::Reverted(reason));
		}

		info!(
			"Transaction {} included in block {}",
			tx_id, receipt.block_number
		);
		Ok(receipt)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Keypair;
	use crate::ledger::{InMemoryLedger, ProtocolParams};
	use crate::utils::ManualClock;
	use std::time::Duration;

	fn sender() -> (Arc<InMemoryLedger>, Sender) {
		let clock = Arc::new(ManualClock::new(Duration::from_secs(120)));
		let ledger = Arc::new(InMemoryLedger::new(
			ProtocolParams {
				epoch_length: 6,
				fee: 0,
			},
			"0xzsc",
			clock,
		));
		let sender = Sender::new(ledger.clone(), "0xalice".to_string());
		(ledger, sender)
	}

	#[tokio::test]
	async fn prepared_id_matches_the_receipt() {
		let (_, sender) = sender();
		let keypair = Keypair::generate();
		let call = ContractCall::Register {
			public_key: *keypair.public(),
			signature: keypair.sign_registration("0xzsc"),
		};
		let signed = sender.prepare(&call).await.unwrap();
		let tx_id = sender.broadcast(&signed).await.unwrap();
		assert_eq!(tx_id, signed.tx_id());
		let receipt = sender.await_receipt(&tx_id).await.unwrap();
		assert_eq!(receipt.tx_id, tx_id);

		let next = sender.prepare(&call).await.unwrap();
		assert_eq!(next.nonce, 1);
	}

	#[tokio::test]
	async fn reverts_surface_their_reason_without_broadcast() {
		let (ledger, sender) = sender();
		let stranger = Keypair::generate();
		let call = ContractCall::Fund {
			public_key: *stranger.public(),
			value: 10,
		};
		let signed = sender.prepare(&call).await.unwrap();
		match sender.broadcast(&signed).await {
			Err(LedgerError::Reverted(reason)) => assert!(reason.contains("not registered")),
			other => panic!("unexpected result {:?}", other),
		}
		assert_eq!(ledger.account_nonce("0xalice").await.unwrap(), 0);
	}
}
