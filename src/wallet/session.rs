//! The per-account session aggregate.
//!
//! A [`Session`] owns everything one account needs: its identity, the local balance projection,
//! the friend directory, the registry of self-originated transactions, and handles to the
//! ledger, prover and clock. Orchestrator and reconciler share it through an `Arc`.

use crate::config::SessionConfig;
use crate::crypto::{BalanceDecoder, Keypair, PublicKey};
use crate::ledger::{LedgerConnector, ProtocolParams};
use crate::transaction::{ProofService, Sender};
use crate::utils::Clock;
use crate::wallet::sync::state_persistence::{AccountSnapshot, StatePersistenceService};
use crate::wallet::{AccountState, EpochScheduler, FriendDirectory, PendingTxRegistry, SessionError};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

pub struct Session {
	ledger: Arc<dyn LedgerConnector>,
	prover: Arc<dyn ProofService>,
	clock: Arc<dyn Clock>,
	config: SessionConfig,
	params: ProtocolParams,
	scheduler: EpochScheduler,
	decoder: BalanceDecoder,
	sender: Sender,
	persistence: Option<StatePersistenceService>,
	identity: RwLock<Option<Keypair>>,
	/// Single writer for the balance projection.
	account: Mutex<AccountState>,
	friends: RwLock<FriendDirectory>,
	pending: PendingTxRegistry,
	last_block: AtomicU64,
}

impl Session {
	/// Read the contract's parameters and assemble a session with no identity yet.
	pub async fn connect(
		ledger: Arc<dyn LedgerConnector>,
		prover: Arc<dyn ProofService>,
		clock: Arc<dyn Clock>,
		config: SessionConfig,
	) -> Result<Self, SessionError> {
		config.validate()?;
		let params = ledger.protocol_params().await?;
		if params.epoch_length == 0 {
			return Err(SessionError::Config(
				"contract reports an epoch length of zero".to_string(),
			));
		}
		info!(
			"Connected to contract {} (epoch length {}s, fee {})",
			config.contract, params.epoch_length, params.fee
		);

		let scheduler =
			EpochScheduler::new(clock.clone(), params.epoch_length, config.scheduler.clone());
		let decoder = BalanceDecoder::new(config.max_balance_bits);
		let sender = Sender::new(ledger.clone(), config.address.clone());
		let persistence = config
			.data_dir
			.clone()
			.map(StatePersistenceService::new);
		let pending = PendingTxRegistry::new(clock.clone(), config.pending_tx_ttl);

		Ok(Self {
			ledger,
			prover,
			clock,
			config,
			params,
			scheduler,
			decoder,
			sender,
			persistence,
			identity: RwLock::new(None),
			account: Mutex::new(AccountState::default()),
			friends: RwLock::new(FriendDirectory::new()),
			pending,
			last_block: AtomicU64::new(0),
		})
	}

	pub fn ledger(&self) -> &Arc<dyn LedgerConnector> {
		&self.ledger
	}

	pub fn prover(&self) -> &Arc<dyn ProofService> {
		&self.prover
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	pub fn params(&self) -> ProtocolParams {
		self.params
	}

	pub fn scheduler(&self) -> &EpochScheduler {
		&self.scheduler
	}

	pub fn decoder(&self) -> &BalanceDecoder {
		&self.decoder
	}

	pub fn sender(&self) -> &Sender {
		&self.sender
	}

	pub fn pending(&self) -> &PendingTxRegistry {
		&self.pending
	}

	pub fn account(&self) -> &Mutex<AccountState> {
		&self.account
	}

	pub fn friends(&self) -> &RwLock<FriendDirectory> {
		&self.friends
	}

	pub async fn keypair(&self) -> Result<Keypair, SessionError> {
		self.identity
			.read()
			.await
			.clone()
			.ok_or(SessionError::NotRegistered)
	}

	pub async fn public_key(&self) -> Option<PublicKey> {
		self.identity.read().await.as_ref().map(|k| *k.public())
	}

	/// Adopt `keypair` as this session's identity with the given starting state.
	pub(crate) async fn adopt(
		&self,
		keypair: Keypair,
		state: AccountState,
	) -> Result<(), SessionError> {
		let mut identity = self.identity.write().await;
		if let Some(existing) = identity.as_ref() {
			return Err(SessionError::AlreadyRegistered(existing.public().to_hex()));
		}
		*self.account.lock().await = state;
		*identity = Some(keypair);
		Ok(())
	}

	pub async fn balance(&self) -> u64 {
		self.account.lock().await.balance()
	}

	/// The local projection rolled forward to the current time.
	pub async fn account_snapshot(&self) -> AccountState {
		self.account
			.lock()
			.await
			.simulated(self.clock.now_secs(), self.params.epoch_length)
	}

	pub async fn add_friend(&self, name: &str, key: PublicKey) {
		self.friends.write().await.add(name, key);
	}

	pub async fn remove_friend(&self, name: &str) -> Result<PublicKey, SessionError> {
		self.friends.write().await.remove(name)
	}

	pub async fn list_friends(&self) -> Vec<(String, PublicKey)> {
		self.friends.read().await.list()
	}

	pub fn last_block(&self) -> u64 {
		self.last_block.load(Ordering::SeqCst)
	}

	pub(crate) fn record_block(&self, block_number: u64) {
		self.last_block.fetch_max(block_number, Ordering::SeqCst);
	}

	/// Write a snapshot if persistence is configured.
	pub async fn persist(&self) -> Result<(), SessionError> {
		let Some(persistence) = &self.persistence else {
			return Ok(());
		};
		let Some(public_key) = self.public_key().await else {
			return Ok(());
		};
		let snapshot = AccountSnapshot {
			public_key,
			account: *self.account.lock().await,
			friends: self.friends.read().await.clone(),
			last_block: self.last_block(),
		};
		persistence.save(&snapshot).await
	}

	/// Restore friends and the last processed block from a snapshot for `public_key`.
	pub async fn restore_snapshot(
		&self,
		public_key: &PublicKey,
	) -> Result<Option<AccountSnapshot>, SessionError> {
		let Some(persistence) = &self.persistence else {
			return Ok(None);
		};
		let snapshot = persistence.load(public_key).await?;
		if let Some(snapshot) = &snapshot {
			*self.friends.write().await = snapshot.friends.clone();
			self.record_block(snapshot.last_block);
			info!(
				"Restored {} friend(s) and block {} from snapshot",
				snapshot.friends.len(),
				snapshot.last_block
			);
		}
		Ok(snapshot)
	}
}
