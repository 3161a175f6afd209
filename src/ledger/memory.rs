//! In-process ledger running the confidential contract's rules.
//!
//! Every submission is mined into its own block, stamped with the clock's current time. Account
//! ciphertexts roll over lazily the first time they are touched in a new epoch, exactly as the
//! contract does, and proofs are checked against [`DigestProver`].

use super::connector::{EventStream, LedgerConnector};
use super::types::*;
use crate::crypto::{Ciphertext, PublicKey, RegistrationSignature};
use crate::transaction::prover::{BurnStatement, DigestProver, TransferStatement};
use crate::utils::{Clock, is_valid_set_size};

use async_trait::async_trait;
use curve25519_dalek::{constants::RISTRETTO_BASEPOINT_POINT as G, ristretto::RistrettoPoint};
use futures::{StreamExt, stream};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct AccountSlot {
	acc: Ciphertext,
	pending: Ciphertext,
	last_rollover: u64,
}

impl AccountSlot {
	fn roll_over(&mut self, epoch: u64) {
		if self.last_rollover < epoch {
			self.acc = self.acc + self.pending;
			self.pending = Ciphertext::zero();
			self.last_rollover = epoch;
		}
	}

	fn simulated(&self, epoch: u64) -> Ciphertext {
		if self.last_rollover < epoch {
			self.acc + self.pending
		} else {
			self.acc
		}
	}
}

#[derive(Debug, Clone, Default)]
struct ContractState {
	accounts: HashMap<PublicKey, AccountSlot>,
	nonce_set: HashSet<[u8; 32]>,
	nonce_epoch: u64,
	address_nonces: HashMap<String, u64>,
	receipts: HashMap<TxId, Receipt>,
	block_number: u64,
}

impl ContractState {
	fn slot(&mut self, key: &PublicKey, what: &str) -> Result<&mut AccountSlot, String> {
		self.accounts
			.get_mut(key)
			.ok_or_else(|| format!("{} {} is not registered", what, key))
	}

	fn consume_tag(&mut self, tag: &RistrettoPoint, epoch: u64) -> Result<(), String> {
		if self.nonce_epoch < epoch {
			self.nonce_set.clear();
			self.nonce_epoch = epoch;
		}
		if !self.nonce_set.insert(tag.compress().to_bytes()) {
			return Err("epoch tag already seen".to_string());
		}
		Ok(())
	}
}

/// What a successfully executed call emits.
enum Emitted {
	Nothing,
	Transfer {
		parties: Vec<PublicKey>,
		deltas: Vec<RistrettoPoint>,
		commitment: RistrettoPoint,
		beneficiary: PublicKey,
	},
	Deposit(PublicKey, u64),
	Burn(PublicKey, u64),
}

pub struct InMemoryLedger {
	params: ProtocolParams,
	contract: String,
	clock: Arc<dyn Clock>,
	state: Mutex<ContractState>,
	/// Every emitted event, in block order.
	log: broadcast::Sender<LedgerEvent>,
	interactions: AtomicUsize,
}

impl InMemoryLedger {
	pub fn new(params: ProtocolParams, contract: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
		Self {
			params,
			contract: contract.into(),
			clock,
			state: Mutex::new(ContractState::default()),
			log: broadcast::channel(EVENT_CAPACITY).0,
			interactions: AtomicUsize::new(0),
		}
	}

	pub fn contract(&self) -> &str {
		&self.contract
	}

	/// Number of connector calls served so far.
	pub fn interactions(&self) -> usize {
		self.interactions.load(Ordering::SeqCst)
	}

	/// Deliver an arbitrary event to subscribers without touching contract state.
	pub fn inject_event(&self, event: LedgerEvent) {
		let _ = self.log.send(event);
	}

	fn touch(&self) {
		self.interactions.fetch_add(1, Ordering::SeqCst);
	}

	fn epoch_at(&self, timestamp: u64) -> u64 {
		timestamp / self.params.epoch_length.max(1)
	}

	fn execute(
		&self,
		state: &mut ContractState,
		from: &str,
		call: ContractCall,
		epoch: u64,
	) -> Result<Emitted, String> {
		match call {
			ContractCall::Register {
				public_key,
				signature,
			} => self.register(state, public_key, &signature, epoch),
			ContractCall::Fund { public_key, value } => {
				let slot = state.slot(&public_key, "account")?;
				slot.roll_over(epoch);
				slot.pending = slot.pending + Ciphertext::transparent(value as i64);
				Ok(Emitted::Deposit(public_key, value))
			}
			ContractCall::Transfer {
				deltas,
				commitment,
				parties,
				epoch_tag,
				proof,
				beneficiary,
			} => self.transfer(
				state,
				epoch,
				deltas,
				commitment,
				parties,
				epoch_tag,
				&proof,
				beneficiary,
			),
			ContractCall::Burn {
				public_key,
				value,
				epoch_tag,
				proof,
			} => {
				let slot = state.slot(&public_key, "account")?;
				slot.roll_over(epoch);
				let pre_state = slot.acc;
				let statement = BurnStatement {
					public_key,
					epoch,
					recipient: from.to_string(),
					value,
					pre_state,
					post_state: pre_state.plus(-(value as i64)),
					epoch_tag,
				};
				let expected = DigestProver::burn_digest(&statement).map_err(|e| e.to_string())?;
				if expected != proof {
					return Err("burn proof verification failed".to_string());
				}
				state.consume_tag(&epoch_tag, epoch)?;
				let slot = state.slot(&public_key, "account")?;
				slot.pending = slot.pending.plus(-(value as i64));
				Ok(Emitted::Burn(public_key, value))
			}
		}
	}

	fn register(
		&self,
		state: &mut ContractState,
		public_key: PublicKey,
		signature: &RegistrationSignature,
		epoch: u64,
	) -> Result<Emitted, String> {
		if !signature.verify(&self.contract, &public_key) {
			return Err("registration signature is invalid".to_string());
		}
		if state.accounts.contains_key(&public_key) {
			return Err("account already registered".to_string());
		}
		// Encryption of zero with randomness one.
		let acc = Ciphertext {
			c: *public_key.point(),
			d: G,
		};
		state.accounts.insert(
			public_key,
			AccountSlot {
				acc,
				pending: Ciphertext::zero(),
				last_rollover: epoch,
			},
		);
		Ok(Emitted::Nothing)
	}

	#[allow(clippy::too_many_arguments)]
	fn transfer(
		&self,
		state: &mut ContractState,
		epoch: u64,
		deltas: Vec<RistrettoPoint>,
		commitment: RistrettoPoint,
		parties: Vec<PublicKey>,
		epoch_tag: RistrettoPoint,
		proof: &ProofBytes,
		beneficiary: PublicKey,
	) -> Result<Emitted, String> {
		if !is_valid_set_size(parties.len()) {
			return Err(format!(
				"anonymity set size {} is not a power of two",
				parties.len()
			));
		}
		if deltas.len() != parties.len() {
			return Err("delta count does not match party count".to_string());
		}
		if !beneficiary.is_identity() && !state.accounts.contains_key(&beneficiary) {
			return Err(format!("beneficiary {} is not registered", beneficiary));
		}

		let mut pre_states = Vec::with_capacity(parties.len());
		let mut delta_states = Vec::with_capacity(parties.len());
		for (party, c) in parties.iter().zip(&deltas) {
			let slot = state.slot(party, "party")?;
			slot.roll_over(epoch);
			pre_states.push(slot.acc);
			delta_states.push(Ciphertext {
				c: *c,
				d: commitment,
			});
		}
		let post_states = pre_states
			.iter()
			.zip(&delta_states)
			.map(|(pre, delta)| *pre + *delta)
			.collect();

		let statement = TransferStatement {
			epoch,
			fee: self.params.fee,
			parties: parties.clone(),
			pre_states,
			deltas: delta_states.clone(),
			post_states,
			epoch_tag,
		};
		let expected = DigestProver::transfer_digest(&statement).map_err(|e| e.to_string())?;
		if &expected != proof {
			return Err("transfer proof verification failed".to_string());
		}
		state.consume_tag(&epoch_tag, epoch)?;

		for (party, delta) in parties.iter().zip(delta_states) {
			let slot = state.slot(party, "party")?;
			slot.pending = slot.pending + delta;
		}
		if !beneficiary.is_identity() {
			let slot = state.slot(&beneficiary, "beneficiary")?;
			slot.roll_over(epoch);
			slot.pending = slot.pending.plus(self.params.fee as i64);
		}

		Ok(Emitted::Transfer {
			parties,
			deltas,
			commitment,
			beneficiary,
		})
	}

	fn publish(&self, emitted: Emitted, meta: EventMeta) {
		let event = match emitted {
			Emitted::Nothing => return,
			Emitted::Transfer {
				parties,
				deltas,
				commitment,
				beneficiary,
			} => LedgerEvent::TransferOccurred(TransferRecord {
				meta,
				parties,
				deltas,
				commitment,
				beneficiary,
			}),
			Emitted::Deposit(key, amount) => LedgerEvent::Deposited(BalanceChangeRecord {
				meta,
				binding: key.binding(),
				amount,
			}),
			Emitted::Burn(key, amount) => LedgerEvent::Burned(BalanceChangeRecord {
				meta,
				binding: key.binding(),
				amount,
			}),
		};
		// No receivers is not an error for a ledger.
		self.inject_event(event);
	}
}

#[async_trait]
impl LedgerConnector for InMemoryLedger {
	async fn protocol_params(&self) -> Result<ProtocolParams, LedgerError> {
		self.touch();
		Ok(self.params)
	}

	async fn latest_block_timestamp(&self) -> Result<u64, LedgerError> {
		self.touch();
		Ok(self.clock.now_secs())
	}

	async fn account_nonce(&self, address: &str) -> Result<u64, LedgerError> {
		self.touch();
		let state = self.state.lock().await;
		Ok(state.address_nonces.get(address).copied().unwrap_or(0))
	}

	async fn simulate_accounts(
		&self,
		keys: &[PublicKey],
		epoch: u64,
	) -> Result<Vec<Ciphertext>, LedgerError> {
		self.touch();
		let state = self.state.lock().await;
		Ok(keys
			.iter()
			.map(|key| {
				state
					.accounts
					.get(key)
					.map(|slot| slot.simulated(epoch))
					.unwrap_or_else(Ciphertext::zero)
			})
			.collect())
	}

	async fn simulate_call(&self, call: &SignedCall) -> Result<(), LedgerError> {
		self.touch();
		let decoded = call.decode()?;
		let epoch = self.epoch_at(self.clock.now_secs());
		let mut scratch = self.state.lock().await.clone();
		self.execute(&mut scratch, &call.from, decoded, epoch)
			.map(|_| ())
			.map_err(LedgerError::Reverted)
	}

	async fn submit_transaction(&self, call: &SignedCall) -> Result<TxId, LedgerError> {
		self.touch();
		let decoded = call.decode()?;
		let tx_id = call.tx_id();
		let name = decoded.name();
		let timestamp = self.clock.now_secs();
		let epoch = self.epoch_at(timestamp);

		let mut state = self.state.lock().await;
		let expected_nonce = state.address_nonces.get(&call.from).copied().unwrap_or(0);
		if call.nonce != expected_nonce {
			return Err(LedgerError::BroadcastError(format!(
				"nonce {} for {} does not match expected {}",
				call.nonce, call.from, expected_nonce
			)));
		}

		state.block_number += 1;
		let block_number = state.block_number;
		state.address_nonces.insert(call.from.clone(), expected_nonce + 1);

		let mut working = state.clone();
		let outcome = self.execute(&mut working, &call.from, decoded, epoch);
		let revert_reason = match outcome {
			Ok(emitted) => {
				working.receipts.insert(
					tx_id.clone(),
					Receipt {
						tx_id: tx_id.clone(),
						block_number,
						timestamp,
						status: true,
						revert_reason: None,
					},
				);
				*state = working;
				drop(state);
				info!("Mined {} {} in block {}", name, tx_id, block_number);
				self.publish(
					emitted,
					EventMeta {
						tx_id: tx_id.clone(),
						block_number,
						timestamp,
						log_index: 0,
					},
				);
				return Ok(tx_id);
			}
			Err(reason) => reason,
		};

		warn!("{} {} reverted: {}", name, tx_id, revert_reason);
		state.receipts.insert(
			tx_id.clone(),
			Receipt {
				tx_id: tx_id.clone(),
				block_number,
				timestamp,
				status: false,
				revert_reason: Some(revert_reason),
			},
		);
		Ok(tx_id)
	}

	async fn wait_for_receipt(&self, tx_id: &TxId) -> Result<Receipt, LedgerError> {
		self.touch();
		let state = self.state.lock().await;
		state.receipts.get(tx_id).cloned().ok_or(LedgerError::NoData)
	}

	async fn subscribe(&self, classes: &[EventClass]) -> Result<EventStream, LedgerError> {
		self.touch();
		let classes = classes.to_vec();
		let receiver = self.log.subscribe();
		debug!("New subscriber for {:?}", classes);

		let events = stream::unfold(receiver, |mut receiver| async move {
			match receiver.recv().await {
				Ok(event) => Some((Ok(event), receiver)),
				Err(broadcast::error::RecvError::Lagged(skipped)) => Some((
					Err(LedgerError::SubscriptionError(format!(
						"subscriber lagged by {} events",
						skipped
					))),
					receiver,
				)),
				Err(broadcast::error::RecvError::Closed) => None,
			}
		})
		.filter(move |item| {
			let wanted = match item {
				Ok(event) => classes.contains(&event.class()),
				Err(_) => true,
			};
			futures::future::ready(wanted)
		});
		Ok(Box::pin(events))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::{Keypair, epoch_tag};
	use crate::utils::ManualClock;
	use futures::StreamExt;
	use std::time::Duration;

	fn ledger() -> (Arc<ManualClock>, InMemoryLedger) {
		let clock = Arc::new(ManualClock::new(Duration::from_secs(600)));
		let params = ProtocolParams {
			epoch_length: 6,
			fee: 1,
		};
		let ledger = InMemoryLedger::new(params, "0xzsc", clock.clone());
		(clock, ledger)
	}

	async fn submit(ledger: &InMemoryLedger, from: &str, call: ContractCall) -> Receipt {
		let nonce = ledger.account_nonce(from).await.unwrap();
		let signed = SignedCall::encode(from, nonce, &call).unwrap();
		let tx_id = ledger.submit_transaction(&signed).await.unwrap();
		ledger.wait_for_receipt(&tx_id).await.unwrap()
	}

	fn register_call(keypair: &Keypair) -> ContractCall {
		ContractCall::Register {
			public_key: *keypair.public(),
			signature: keypair.sign_registration("0xzsc"),
		}
	}

	#[tokio::test]
	async fn registration_is_checked_and_unique() {
		let (_, ledger) = ledger();
		let keypair = Keypair::generate();
		assert!(submit(&ledger, "0xa", register_call(&keypair)).await.status);

		let duplicate = submit(&ledger, "0xa", register_call(&keypair)).await;
		assert!(!duplicate.status);
		assert_eq!(
			duplicate.revert_reason.as_deref(),
			Some("account already registered")
		);

		let other = Keypair::generate();
		let forged = ContractCall::Register {
			public_key: *other.public(),
			signature: keypair.sign_registration("0xzsc"),
		};
		assert!(!submit(&ledger, "0xa", forged).await.status);
	}

	#[tokio::test]
	async fn funds_become_visible_to_simulation_in_the_next_epoch() {
		let (clock, ledger) = ledger();
		let keypair = Keypair::generate();
		submit(&ledger, "0xa", register_call(&keypair)).await;
		let fund = ContractCall::Fund {
			public_key: *keypair.public(),
			value: 100,
		};
		submit(&ledger, "0xa", fund).await;

		let epoch = clock.now_secs() / 6;
		let keys = [*keypair.public()];
		let now = ledger.simulate_accounts(&keys, epoch).await.unwrap()[0];
		let next = ledger.simulate_accounts(&keys, epoch + 1).await.unwrap()[0];
		let decoder = crate::crypto::BalanceDecoder::new(16);
		assert_eq!(decoder.read_balance(&now, keypair.secret()), Some(0));
		assert_eq!(decoder.read_balance(&next, keypair.secret()), Some(100));
	}

	#[tokio::test]
	async fn unregistered_keys_simulate_to_zero() {
		let (_, ledger) = ledger();
		let stranger = *Keypair::generate().public();
		let states = ledger.simulate_accounts(&[stranger], 0).await.unwrap();
		assert!(states[0].is_zero());
	}

	#[tokio::test]
	async fn burn_requires_a_matching_proof_and_emits_an_event() {
		let (clock, ledger) = ledger();
		let keypair = Keypair::generate();
		submit(&ledger, "0xa", register_call(&keypair)).await;
		submit(
			&ledger,
			"0xa",
			ContractCall::Fund {
				public_key: *keypair.public(),
				value: 50,
			},
		)
		.await;
		clock.advance(Duration::from_secs(6));

		let mut burned = ledger.subscribe(&[EventClass::Burned]).await.unwrap();
		let epoch = clock.now_secs() / 6;
		let pre_state = ledger
			.simulate_accounts(&[*keypair.public()], epoch)
			.await
			.unwrap()[0];
		let tag = epoch_tag(epoch, keypair.secret());
		let statement = BurnStatement {
			public_key: *keypair.public(),
			epoch,
			recipient: "0xa".to_string(),
			value: 20,
			pre_state,
			post_state: pre_state.plus(-20),
			epoch_tag: tag,
		};

		let wrong = ContractCall::Burn {
			public_key: *keypair.public(),
			value: 20,
			epoch_tag: tag,
			proof: ProofBytes(vec![0; 32]),
		};
		assert!(!submit(&ledger, "0xa", wrong).await.status);

		let burn = ContractCall::Burn {
			public_key: *keypair.public(),
			value: 20,
			epoch_tag: tag,
			proof: DigestProver::burn_digest(&statement).unwrap(),
		};
		let receipt = submit(&ledger, "0xa", burn.clone()).await;
		assert!(receipt.status);
		match burned.next().await {
			Some(Ok(LedgerEvent::Burned(record))) => {
				assert_eq!(record.amount, 20);
				assert_eq!(record.binding, keypair.public().binding());
				assert_eq!(record.meta.tx_id, receipt.tx_id);
			}
			other => panic!("unexpected event {:?}", other),
		}

		// Same epoch tag twice is rejected.
		let replay = submit(&ledger, "0xa", burn).await;
		assert_eq!(replay.revert_reason.as_deref(), Some("epoch tag already seen"));
	}

	#[tokio::test]
	async fn stale_nonces_are_refused_at_broadcast() {
		let (_, ledger) = ledger();
		let keypair = Keypair::generate();
		let call = SignedCall::encode("0xa", 5, &register_call(&keypair)).unwrap();
		assert!(matches!(
			ledger.submit_transaction(&call).await,
			Err(LedgerError::BroadcastError(_))
		));
	}

	#[tokio::test]
	async fn subscriptions_deliver_selected_classes_in_block_order() {
		let (_, ledger) = ledger();
		let keypair = Keypair::generate();
		let mut all = ledger.subscribe(&EventClass::ALL).await.unwrap();
		let mut deposits = ledger.subscribe(&[EventClass::Deposited]).await.unwrap();

		submit(&ledger, "0xa", register_call(&keypair)).await;
		ledger.inject_event(LedgerEvent::Burned(BalanceChangeRecord {
			meta: EventMeta {
				tx_id: TxId("0xff".to_string()),
				block_number: 1,
				timestamp: 600,
				log_index: 1,
			},
			binding: keypair.public().binding(),
			amount: 1,
		}));
		for value in [5, 7] {
			let call = ContractCall::Fund {
				public_key: *keypair.public(),
				value,
			};
			submit(&ledger, "0xa", call).await;
		}

		let mut positions = Vec::new();
		for _ in 0..3 {
			let event = all.next().await.unwrap().unwrap();
			positions.push(event.meta().position());
		}
		assert_eq!(positions, vec![(1, 1), (2, 0), (3, 0)]);

		for expected in [5, 7] {
			match deposits.next().await.unwrap().unwrap() {
				LedgerEvent::Deposited(record) => assert_eq!(record.amount, expected),
				other => panic!("unexpected event {:?}", other),
			}
		}
	}
}
