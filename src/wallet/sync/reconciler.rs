//! Applies ledger events caused by other parties to the local balance projection.
//!
//! All three event classes arrive on one subscription in ledger order. Events whose transaction
//! this client originated are skipped, since the orchestrator applies their effect, unless the
//! orchestrator lost track of the receipt. Everything else is matched against the session key:
//! incoming transfer deltas are decrypted and credited, fees paid to this key as beneficiary are
//! credited, and deposits or burns bound to this key adjust the balance.

use crate::crypto::Keypair;
use crate::ledger::{BalanceChangeRecord, EventClass, EventStream, LedgerEvent, TransferRecord};
use crate::wallet::sync::events::{EventDispatcher, ReconcileEvent, ReconcileEventHandler, SnapshotHandler};
use crate::wallet::sync::progress_tracker::{ReconcileProgressTracker, ReconcileStats};
use crate::wallet::{Session, SessionError, Sighting, TxEffect};

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct EventReconciler {
	session: Arc<Session>,
	dispatcher: EventDispatcher,
	tracker: ReconcileProgressTracker,
	last_position: Option<(u64, u32)>,
}

impl EventReconciler {
	/// A reconciler that persists a snapshot after every applied event.
	pub fn new(session: Arc<Session>) -> Self {
		let mut dispatcher = EventDispatcher::new();
		dispatcher.register_handler(Box::new(SnapshotHandler::new(session.clone())));
		let tracker = ReconcileProgressTracker::new(session.last_block());
		Self {
			session,
			dispatcher,
			tracker,
			last_position: None,
		}
	}

	pub fn register_handler(&mut self, handler: Box<dyn ReconcileEventHandler>) {
		self.dispatcher.register_handler(handler);
	}

	pub fn stats(&self) -> ReconcileStats {
		self.tracker.get_stats()
	}

	/// Subscribe to every event class as one stream in ledger order.
	pub async fn subscribe(&self) -> Result<EventStream, SessionError> {
		let stream = self.session.ledger().subscribe(&EventClass::ALL).await?;
		info!("Subscribed to {} event classes", EventClass::ALL.len());
		Ok(stream)
	}

	/// Reconcile every item of `stream` until it ends.
	pub async fn process(&mut self, mut stream: EventStream) -> Result<ReconcileStats, SessionError> {
		while let Some(item) = stream.next().await {
			let outcome = match item {
				Ok(event) => {
					self.check_order(&event);
					self.apply(&event).await?
				}
				Err(e) => {
					warn!("Dropping undecodable event: {}", e);
					ReconcileEvent::Discarded {
						class: None,
						reason: e.to_string(),
					}
				}
			};
			self.tracker.record(&outcome);
			self.dispatcher.dispatch(&outcome).await;
			self.tracker.log_progress(false);
		}

		info!("Event stream ended");
		self.dispatcher.dispatch(&ReconcileEvent::StreamEnded).await;
		self.tracker.log_progress(true);
		Ok(self.tracker.get_stats())
	}

	fn check_order(&mut self, event: &LedgerEvent) {
		let position = event.meta().position();
		if let Some(last) = self.last_position {
			if position < last {
				warn!(
					"Event {} at {:?} arrived after {:?}",
					event.meta().tx_id,
					position,
					last
				);
				return;
			}
		}
		self.last_position = Some(position);
	}

	/// Apply a single event to the session's account.
	pub async fn apply(&self, event: &LedgerEvent) -> Result<ReconcileEvent, SessionError> {
		let meta = event.meta();
		let class = event.class();
		let keypair = match self.session.keypair().await {
			Ok(keypair) => keypair,
			Err(SessionError::NotRegistered) => {
				debug!("No key yet, dropping {} event {}", class.as_str(), meta.tx_id);
				return Ok(ReconcileEvent::Discarded {
					class: Some(class),
					reason: "no registered key".to_string(),
				});
			}
			Err(e) => return Err(e),
		};

		let effect = match self.session.pending().observe(&meta.tx_id, meta.timestamp) {
			Sighting::Own => {
				debug!("Skipping own {} event {}", class.as_str(), meta.tx_id);
				self.session.record_block(meta.block_number);
				return Ok(ReconcileEvent::SelfOriginated {
					class,
					tx_id: meta.tx_id.clone(),
				});
			}
			Sighting::Orphaned(effect) => {
				info!("Own {} {} settled without a receipt", class.as_str(), meta.tx_id);
				effect
			}
			Sighting::Untracked => match event {
				LedgerEvent::TransferOccurred(record) => match self.transfer_effect(&keypair, record) {
					Ok(credit) => TxEffect::credit(credit),
					Err(reason) => {
						warn!("Discarding transfer {}: {}", meta.tx_id, reason);
						return Ok(ReconcileEvent::Discarded {
							class: Some(class),
							reason,
						});
					}
				},
				LedgerEvent::Deposited(record) => TxEffect::credit(Self::bound_amount(&keypair, record)),
				LedgerEvent::Burned(record) => TxEffect {
					debit: Self::bound_amount(&keypair, record),
					..TxEffect::default()
				},
			},
		};
		self.session.record_block(meta.block_number);

		if effect.is_empty() {
			return Ok(ReconcileEvent::Irrelevant {
				class,
				block_number: meta.block_number,
			});
		}

		let balance = {
			let mut account = self.session.account().lock().await;
			account.settle(meta.timestamp, self.session.params().epoch_length, effect);
			account.balance()
		};
		match class {
			EventClass::TransferOccurred if effect.debit > 0 => info!(
				"Transfer of {} settled. Balance now {}.",
				effect.debit, balance
			),
			EventClass::TransferOccurred => {
				info!("Transfer of {} received! Balance now {}.", effect.credit, balance)
			}
			EventClass::Deposited => info!(
				"Deposit of {} to this account observed. Balance now {}.",
				effect.credit, balance
			),
			EventClass::Burned => info!(
				"Withdrawal of {} from this account observed. Balance now {}.",
				effect.debit, balance
			),
		}

		Ok(ReconcileEvent::Applied {
			class,
			block_number: meta.block_number,
			credited: effect.credit,
			debited: effect.debit,
		})
	}

	/// Total credited to `keypair` by a transfer, from received deltas and the beneficiary fee.
	fn transfer_effect(&self, keypair: &Keypair, record: &TransferRecord) -> Result<u64, String> {
		if record.parties.is_empty() {
			return Err("transfer names no parties".to_string());
		}
		if record.deltas.len() != record.parties.len() {
			return Err(format!(
				"{} deltas for {} parties",
				record.deltas.len(),
				record.parties.len()
			));
		}

		let mut credit = 0u64;
		for (index, party) in record.parties.iter().enumerate() {
			if party != keypair.public() {
				continue;
			}
			let Some(delta) = record.delta(index) else {
				continue;
			};
			match self.session.decoder().read_balance(&delta, keypair.secret()) {
				Some(amount) => credit = credit.saturating_add(amount),
				None => warn!(
					"Could not decode delta at index {} of {}; it is not an incoming amount",
					index, record.meta.tx_id
				),
			}
		}

		if record.beneficiary == *keypair.public() {
			let fee = self.session.params().fee;
			debug!("Collecting fee of {} as beneficiary", fee);
			credit = credit.saturating_add(fee);
		}
		Ok(credit)
	}

	fn bound_amount(keypair: &Keypair, record: &BalanceChangeRecord) -> u64 {
		if record.binding == keypair.public().binding() {
			record.amount
		} else {
			0
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SessionConfig;
	use crate::crypto::{Ciphertext, random_scalar};
	use crate::ledger::{EventMeta, InMemoryLedger, ProtocolParams, TxId};
	use crate::transaction::DigestProver;
	use crate::utils::ManualClock;
	use crate::wallet::AccountState;

	use futures::stream;
	use std::time::Duration;

	async fn unregistered_session() -> Arc<Session> {
		let clock = Arc::new(ManualClock::new(Duration::from_secs(60)));
		let params = ProtocolParams {
			epoch_length: 6,
			fee: 2,
		};
		let ledger = Arc::new(InMemoryLedger::new(params, "0xzsc", clock.clone()));
		let config = SessionConfig {
			contract: "0xzsc".to_string(),
			address: "0xalice".to_string(),
			max_balance_bits: 16,
			..SessionConfig::default()
		};
		let session = Session::connect(ledger, Arc::new(DigestProver), clock, config)
			.await
			.unwrap();
		Arc::new(session)
	}

	async fn session(keypair: &Keypair) -> Arc<Session> {
		let session = unregistered_session().await;
		session
			.adopt(keypair.clone(), AccountState::new(10))
			.await
			.unwrap();
		session
	}

	fn burn_of(keypair: &Keypair, tx: &str, amount: u64) -> LedgerEvent {
		LedgerEvent::Burned(BalanceChangeRecord {
			meta: meta(tx, 7),
			binding: keypair.public().binding(),
			amount,
		})
	}

	fn meta(tx: &str, block_number: u64) -> EventMeta {
		EventMeta {
			tx_id: TxId(tx.to_string()),
			block_number,
			timestamp: 62,
			log_index: 0,
		}
	}

	fn transfer_to(keypair: &Keypair, amount: i64, beneficiary: crate::crypto::PublicKey) -> LedgerEvent {
		let other = *Keypair::generate().public();
		let r = random_scalar();
		let ours = Ciphertext::encrypt(amount, keypair.public(), &r);
		let theirs = Ciphertext::encrypt(-(amount + 2), &other, &r);
		LedgerEvent::TransferOccurred(TransferRecord {
			meta: meta("0xaa", 4),
			parties: vec![other, *keypair.public()],
			deltas: vec![theirs.c, ours.c],
			commitment: ours.d,
			beneficiary,
		})
	}

	#[tokio::test]
	async fn incoming_transfer_is_credited_as_pending() {
		let keypair = Keypair::generate();
		let session = session(&keypair).await;
		let reconciler = EventReconciler::new(session.clone());

		let outcome = reconciler
			.apply(&transfer_to(&keypair, 25, crate::crypto::PublicKey::identity()))
			.await
			.unwrap();
		assert_eq!(
			outcome,
			ReconcileEvent::Applied {
				class: EventClass::TransferOccurred,
				block_number: 4,
				credited: 25,
				debited: 0,
			}
		);
		let account = *session.account().lock().await;
		assert_eq!((account.available, account.pending), (0, 25));
		assert_eq!(session.last_block(), 4);
	}

	#[tokio::test]
	async fn beneficiary_collects_the_fee() {
		let keypair = Keypair::generate();
		let session = session(&keypair).await;
		let reconciler = EventReconciler::new(session.clone());

		let outcome = reconciler
			.apply(&transfer_to(&keypair, 0, *keypair.public()))
			.await
			.unwrap();
		assert!(matches!(outcome, ReconcileEvent::Applied { credited: 2, .. }));
	}

	#[tokio::test]
	async fn own_transactions_are_skipped_once() {
		let keypair = Keypair::generate();
		let session = session(&keypair).await;
		let reconciler = EventReconciler::new(session.clone());
		let deposit = LedgerEvent::Deposited(BalanceChangeRecord {
			meta: meta("0xbb", 5),
			binding: keypair.public().binding(),
			amount: 40,
		});

		let tx_id = TxId("0xbb".to_string());
		session.pending().insert(tx_id.clone(), TxEffect::credit(40));
		session.pending().confirm(&tx_id);
		assert!(matches!(
			reconciler.apply(&deposit).await.unwrap(),
			ReconcileEvent::SelfOriginated { .. }
		));
		assert_eq!(session.balance().await, 0);

		// A replay after the entry was consumed is treated as someone else's deposit.
		assert!(matches!(
			reconciler.apply(&deposit).await.unwrap(),
			ReconcileEvent::Applied { credited: 40, .. }
		));
	}

	#[tokio::test]
	async fn malformed_and_foreign_events_leave_balance_alone() {
		let keypair = Keypair::generate();
		let session = session(&keypair).await;
		let mut reconciler = EventReconciler::new(session.clone());

		let mut broken = transfer_to(&keypair, 5, crate::crypto::PublicKey::identity());
		if let LedgerEvent::TransferOccurred(record) = &mut broken {
			record.deltas.pop();
		}
		let foreign = LedgerEvent::Burned(BalanceChangeRecord {
			meta: meta("0xcc", 6),
			binding: Keypair::generate().public().binding(),
			amount: 9,
		});

		let events = stream::iter(vec![
			Ok(broken),
			Ok(foreign),
			Err(crate::ledger::LedgerError::MalformedEvent("bad frame".to_string())),
		]);
		let stats = reconciler.process(events.boxed()).await.unwrap();

		assert_eq!(stats.discarded, 2);
		assert_eq!(stats.irrelevant, 1);
		assert_eq!(stats.applied, 0);
		assert_eq!(session.balance().await, 0);
	}

	#[tokio::test]
	async fn abandoned_own_transactions_are_applied_on_sight() {
		let keypair = Keypair::generate();
		let session = session(&keypair).await;
		let reconciler = EventReconciler::new(session.clone());
		session.account().lock().await.available = 50;

		let tx_id = TxId("0xdd".to_string());
		session.pending().insert(tx_id.clone(), TxEffect::spend(12));
		assert_eq!(session.pending().abandon(&tx_id), None);

		let outcome = reconciler.apply(&burn_of(&keypair, "0xdd", 12)).await.unwrap();
		assert!(matches!(outcome, ReconcileEvent::Applied { debited: 12, .. }));
		assert_eq!(session.balance().await, 38);
		assert!(session.account().lock().await.nonce_used);
		assert!(session.pending().is_empty());
	}

	#[tokio::test]
	async fn events_before_registration_are_dropped() {
		let session = unregistered_session().await;
		let mut reconciler = EventReconciler::new(session.clone());
		let stranger = Keypair::generate();

		let events = stream::iter(vec![Ok(burn_of(&stranger, "0xee", 3))]);
		let stats = reconciler.process(events.boxed()).await.unwrap();
		assert_eq!(stats.discarded, 1);
	}

	#[tokio::test]
	async fn late_events_from_a_rolled_over_epoch_are_spendable() {
		let keypair = Keypair::generate();
		let session = session(&keypair).await;
		let reconciler = EventReconciler::new(session.clone());
		session.account().lock().await.simulate(66, 6);

		// Settled at 62, in epoch 10; the projection is already in epoch 11.
		reconciler
			.apply(&transfer_to(&keypair, 9, crate::crypto::PublicKey::identity()))
			.await
			.unwrap();
		let account = *session.account().lock().await;
		assert_eq!((account.available, account.pending), (9, 0));
	}
}
