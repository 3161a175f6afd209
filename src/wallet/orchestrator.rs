//! Register, deposit, transfer and withdraw.
//!
//! Each operation validates its inputs before touching the ledger, waits for the scheduler when
//! it spends, and applies its own effect to the account only after the ledger confirms it.
//! Self-originated transactions are registered as pending before broadcast so that exactly one of
//! the orchestrator and the reconciler applies each of them.

use crate::crypto::{Ciphertext, CryptoError, Keypair, PublicKey, epoch_tag};
use crate::ledger::{ContractCall, LedgerError, Receipt};
use crate::transaction::{BurnIntent, TransferBuilder};
use crate::wallet::anonymity::{AnonymitySetBuilder, shuffle};
use crate::wallet::scheduler::Operation;
use crate::wallet::{AccountState, Session, SessionError, TxEffect};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Local and ledger views of the account's total balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceReport {
	pub local: u64,
	/// `None` when the ledger balance is outside the decoder's range.
	pub ledger: Option<u64>,
}

impl BalanceReport {
	pub fn in_sync(&self) -> bool {
		self.ledger == Some(self.local)
	}
}

#[derive(Clone)]
pub struct TransferOrchestrator {
	session: Arc<Session>,
}

impl TransferOrchestrator {
	pub fn new(session: Arc<Session>) -> Self {
		Self { session }
	}

	pub fn session(&self) -> &Arc<Session> {
		&self.session
	}

	/// Submit `call` and wait for a successful receipt.
	///
	/// With an `effect`, the transaction is tracked as self-originated from before broadcast. It
	/// is released if it never reaches the ledger or reverts. If the receipt wait fails after
	/// broadcast the outcome is unknown, and the effect is applied by whichever side later sees
	/// the transaction settle.
	async fn submit(
		&self,
		call: ContractCall,
		effect: Option<TxEffect>,
	) -> Result<Receipt, SessionError> {
		let sender = self.session.sender();
		let registry = self.session.pending();
		let prepared = sender.prepare(&call).await?;
		let mut tx_id = prepared.tx_id();
		if let Some(effect) = effect {
			registry.insert(tx_id.clone(), effect);
		}

		match sender.broadcast(&prepared).await {
			Ok(assigned) if assigned != tx_id => {
				warn!("Tracking {} under node id {}", tx_id, assigned);
				registry.rename(&tx_id, assigned.clone());
				tx_id = assigned;
			}
			Ok(_) => {}
			Err(e) => {
				registry.release(&tx_id);
				error!("{} {} failed: {}", call.name(), tx_id, e);
				return Err(e.into());
			}
		}

		match sender.await_receipt(&tx_id).await {
			Ok(receipt) => {
				info!("{} submitted (txId = \"{}\").", call.name(), tx_id);
				Ok(receipt)
			}
			Err(e @ LedgerError::Reverted(_)) => {
				registry.release(&tx_id);
				error!("{} {} failed: {}", call.name(), tx_id, e);
				Err(e.into())
			}
			Err(e) => {
				error!("Outcome of {} {} is unknown: {}", call.name(), tx_id, e);
				if let Some(effect) = effect {
					if let Some(timestamp) = registry.abandon(&tx_id) {
						let balance = self.settle(timestamp, effect).await;
						info!(
							"{} {} settled before its receipt was lost. Balance now {}.",
							call.name(),
							tx_id,
							balance
						);
						self.persist_quietly().await;
					}
				}
				Err(e.into())
			}
		}
	}

	async fn settle(&self, timestamp: u64, effect: TxEffect) -> u64 {
		let mut account = self.session.account().lock().await;
		account.settle(timestamp, self.session.params().epoch_length, effect);
		account.balance()
	}

	async fn persist_quietly(&self) {
		if let Err(e) = self.session.persist().await {
			warn!("Failed to persist account snapshot: {}", e);
		}
	}

	/// Apply a confirmed transaction's effect under the account lock.
	async fn confirm(&self, receipt: &Receipt, effect: TxEffect) -> u64 {
		let balance = self.settle(receipt.timestamp, effect).await;
		self.session.pending().confirm(&receipt.tx_id);
		self.session.record_block(receipt.block_number);
		self.persist_quietly().await;
		balance
	}

	/// Register a fresh key, or recover an existing one from its secret.
	///
	/// Recovery performs no transaction: it decrypts the key's ledger balance, including funds
	/// still pending, and starts the local projection from it.
	pub async fn register(&self, secret: Option<&str>) -> Result<PublicKey, SessionError> {
		if let Some(existing) = self.session.public_key().await {
			return Err(SessionError::AlreadyRegistered(existing.to_hex()));
		}
		match secret {
			Some(secret) => self.recover(Keypair::from_secret_hex(secret)?).await,
			None => self.register_fresh().await,
		}
	}

	async fn register_fresh(&self) -> Result<PublicKey, SessionError> {
		let keypair = Keypair::generate();
		let public_key = *keypair.public();
		let call = ContractCall::Register {
			public_key,
			signature: keypair.sign_registration(&self.session.config().contract),
		};
		let receipt = self.submit(call, None).await?;

		let epoch = self.session.scheduler().epoch_of(receipt.timestamp);
		self.session.adopt(keypair, AccountState::new(epoch)).await?;
		self.session.record_block(receipt.block_number);
		info!("Registration successful as {}.", public_key);
		Ok(public_key)
	}

	async fn recover(&self, keypair: Keypair) -> Result<PublicKey, SessionError> {
		let public_key = *keypair.public();
		let epoch = self.session.scheduler().current_epoch();
		let states = self
			.session
			.ledger()
			.simulate_accounts(&[public_key], epoch + 1)
			.await?;
		let state = states
			.first()
			.ok_or_else(|| SessionError::Inconsistent("no account state returned".to_string()))?;
		if state.is_zero() {
			return Err(SessionError::NotRegistered);
		}

		let decoder = self.session.decoder();
		let balance = decoder
			.read_balance(state, keypair.secret())
			.ok_or(CryptoError::BalanceOutOfRange(decoder.bits()))?;

		self.session.restore_snapshot(&public_key).await?;
		let account = AccountState {
			available: balance,
			..AccountState::new(epoch)
		};
		self.session.adopt(keypair, account).await?;
		info!(
			"Account recovered successfully as {}. Balance now {}.",
			public_key, balance
		);
		Ok(public_key)
	}

	/// Move `value` transparent funds into the confidential pool.
	pub async fn deposit(&self, value: u64) -> Result<Receipt, SessionError> {
		let keypair = self.session.keypair().await?;
		let call = ContractCall::Fund {
			public_key: *keypair.public(),
			value,
		};
		let effect = TxEffect::credit(value);
		let receipt = self.submit(call, Some(effect)).await?;
		let balance = self.confirm(&receipt, effect).await;
		info!("Deposit of {} was successful. Balance now {}.", value, balance);
		Ok(receipt)
	}

	/// Send `value` to `recipient`, hidden among `decoys`, optionally paying the fee to
	/// `beneficiary`.
	pub async fn transfer(
		&self,
		recipient: &str,
		value: u64,
		decoys: &[String],
		beneficiary: Option<&str>,
	) -> Result<Receipt, SessionError> {
		let keypair = self.session.keypair().await?;
		let fee = self.session.params().fee;
		let Some(required) = value.checked_add(fee) else {
			return Err(SessionError::InsufficientBalance {
				requested: u64::MAX,
				balance: self.session.balance().await,
			});
		};

		let resolved = {
			let friends = self.session.friends().read().await;
			AnonymitySetBuilder::new(&friends).validate(
				keypair.public(),
				recipient,
				decoys,
				beneficiary,
			)?
		};
		let scheduler = self.session.scheduler();
		scheduler.check_feasible(resolved.size())?;

		let snapshot = scheduler
			.schedule_or_defer(
				Operation::Transfer {
					set_size: resolved.size(),
				},
				required,
				self.session.account(),
			)
			.await?;
		let epoch = snapshot.last_roll_over;
		let set = shuffle(resolved, &mut rand::rng());

		let pre_states = self
			.session
			.ledger()
			.simulate_accounts(&set.parties, epoch)
			.await?;
		let unregistered: Vec<usize> = pre_states
			.iter()
			.enumerate()
			.filter(|(_, state)| state.is_zero())
			.map(|(i, _)| i)
			.collect();
		if !unregistered.is_empty() {
			return Err(SessionError::UnregisteredParty {
				indices: unregistered,
			});
		}

		let intent = TransferBuilder::new()
			.with_parties(set.parties, set.sender_index, set.receiver_index)
			.with_beneficiary(set.beneficiary)
			.with_amount(value, fee)
			.with_epoch(epoch)
			.build()?;
		let tag = epoch_tag(epoch, keypair.secret());
		let statement = intent.statement(pre_states, tag)?;
		let witness = intent.witness(&keypair, snapshot.available - required);
		debug!("Proving {:?}", intent);
		let proof = self
			.session
			.prover()
			.prove_transfer(&statement, &witness)
			.await?;

		let effect = TxEffect::spend(required);
		let receipt = self.submit(intent.into_call(tag, proof), Some(effect)).await?;
		let balance = self.confirm(&receipt, effect).await;
		info!(
			"Transfer of {} (with fee of {}) was successful. Balance now {}.",
			value, fee, balance
		);
		Ok(receipt)
	}

	/// Move `value` out of the pool to this client's ledger address.
	pub async fn withdraw(&self, value: u64) -> Result<Receipt, SessionError> {
		let keypair = self.session.keypair().await?;
		let snapshot = self
			.session
			.scheduler()
			.schedule_or_defer(Operation::Withdraw, value, self.session.account())
			.await?;
		let epoch = snapshot.last_roll_over;
		let public_key = *keypair.public();

		let pre_state = self
			.session
			.ledger()
			.simulate_accounts(&[public_key], epoch)
			.await?
			.first()
			.copied()
			.unwrap_or_else(Ciphertext::zero);
		if pre_state.is_zero() {
			return Err(SessionError::UnregisteredParty { indices: vec![0] });
		}

		let intent = BurnIntent::new(public_key, value, epoch, self.session.sender().address());
		let tag = epoch_tag(epoch, keypair.secret());
		let statement = intent.statement(pre_state, tag);
		let witness = intent.witness(&keypair, snapshot.available - value);
		let proof = self
			.session
			.prover()
			.prove_burn(&statement, &witness)
			.await?;

		let effect = TxEffect::spend(value);
		let receipt = self.submit(intent.into_call(tag, proof), Some(effect)).await?;
		let balance = self.confirm(&receipt, effect).await;
		info!("Withdrawal of {} was successful. Balance now {}.", value, balance);
		Ok(receipt)
	}

	/// Ledger ciphertexts of the named friends for the ledger's current epoch.
	pub async fn simulate_accounts(
		&self,
		names: &[String],
	) -> Result<Vec<(String, Ciphertext)>, SessionError> {
		let keys = {
			let friends = self.session.friends().read().await;
			names
				.iter()
				.map(|name| friends.resolve(name))
				.collect::<Result<Vec<_>, _>>()?
		};
		let ledger = self.session.ledger();
		let timestamp = ledger.latest_block_timestamp().await?;
		let epoch = self.session.scheduler().epoch_of(timestamp);
		let states = ledger.simulate_accounts(&keys, epoch).await?;
		Ok(names.iter().cloned().zip(states).collect())
	}

	/// Compare the local balance with the decrypted ledger balance. Does not mutate.
	pub async fn reconcile_balance(&self) -> Result<BalanceReport, SessionError> {
		let keypair = self.session.keypair().await?;
		let epoch = self.session.scheduler().current_epoch();
		let states = self
			.session
			.ledger()
			.simulate_accounts(&[*keypair.public()], epoch + 1)
			.await?;
		let ledger = states
			.first()
			.and_then(|state| self.session.decoder().read_balance(state, keypair.secret()));
		let report = BalanceReport {
			local: self.session.balance().await,
			ledger,
		};
		if report.in_sync() {
			debug!("Local balance {} matches the ledger", report.local);
		} else {
			warn!(
				"Local balance {} differs from ledger balance {:?}",
				report.local, report.ledger
			);
		}
		Ok(report)
	}
}
