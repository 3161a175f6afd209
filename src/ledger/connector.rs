use crate::crypto::{Ciphertext, PublicKey};
use crate::ledger::types::{
	EventClass, LedgerError, LedgerEvent, ProtocolParams, Receipt, SignedCall, TxId,
};

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// Stream of decoded events. Items that fail to decode surface as errors without ending the stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<LedgerEvent, LedgerError>> + Send>>;

/// Capability interface over the ledger hosting the confidential contract.
///
/// Calls suspend with no internal deadline; callers impose their own.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
	/// Epoch length and fee fixed by the contract.
	async fn protocol_params(&self) -> Result<ProtocolParams, LedgerError>;

	/// Timestamp of the latest block, in seconds.
	async fn latest_block_timestamp(&self) -> Result<u64, LedgerError>;

	/// Next transaction nonce for `address`.
	async fn account_nonce(&self, address: &str) -> Result<u64, LedgerError>;

	/// Encrypted balances of `keys` as they will stand in `epoch`, including any pending rollover.
	async fn simulate_accounts(
		&self,
		keys: &[PublicKey],
		epoch: u64,
	) -> Result<Vec<Ciphertext>, LedgerError>;

	/// Dry-run a call, surfacing the revert reason without broadcasting.
	async fn simulate_call(&self, call: &SignedCall) -> Result<(), LedgerError>;

	/// Broadcast a call and return its transaction id.
	async fn submit_transaction(&self, call: &SignedCall) -> Result<TxId, LedgerError>;

	/// Wait until `tx_id` is included and return its receipt.
	async fn wait_for_receipt(&self, tx_id: &TxId) -> Result<Receipt, LedgerError>;

	/// Subscribe to `classes` from now on, as one stream in ledger order.
	async fn subscribe(&self, classes: &[EventClass]) -> Result<EventStream, LedgerError>;
}
