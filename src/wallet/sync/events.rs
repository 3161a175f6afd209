//! Event system for ledger reconciliation.
//!
//! The reconciler turns every ledger event into a [`ReconcileEvent`] describing what it did with
//! it, and hands that outcome to the registered handlers. Handlers take care of side effects such
//! as persisting snapshots, keeping them out of the balance logic.

use crate::ledger::{EventClass, TxId};
use crate::wallet::{Session, SessionError};

use std::sync::Arc;
use tracing::warn;

/// Outcome of reconciling one ledger event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
	/// The event touched this account and its effect was applied locally.
	Applied {
		class: EventClass,
		block_number: u64,
		credited: u64,
		debited: u64,
	},
	/// The event was caused by this client and had already been applied.
	SelfOriginated { class: EventClass, tx_id: TxId },
	/// The event does not involve this account.
	Irrelevant { class: EventClass, block_number: u64 },
	/// The event could not be interpreted and was dropped.
	Discarded { class: Option<EventClass>, reason: String },
	/// The merged event stream ended.
	StreamEnded,
}

impl ReconcileEvent {
	pub fn class(&self) -> Option<EventClass> {
		match self {
			ReconcileEvent::Applied { class, .. }
			| ReconcileEvent::SelfOriginated { class, .. }
			| ReconcileEvent::Irrelevant { class, .. } => Some(*class),
			ReconcileEvent::Discarded { class, .. } => *class,
			ReconcileEvent::StreamEnded => None,
		}
	}
}

/// Trait for handling reconciliation outcomes.
#[async_trait::async_trait]
pub trait ReconcileEventHandler: Send + Sync {
	async fn handle(&mut self, event: &ReconcileEvent) -> Result<(), SessionError>;

	/// Name of this handler for logging.
	fn name(&self) -> &'static str;
}

/// Fans each outcome out to every registered handler, in registration order.
#[derive(Default)]
pub struct EventDispatcher {
	handlers: Vec<Box<dyn ReconcileEventHandler>>,
}

impl EventDispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_handler(&mut self, handler: Box<dyn ReconcileEventHandler>) {
		self.handlers.push(handler);
	}

	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	/// Errors from handlers are logged, but do not stop other handlers from running.
	pub async fn dispatch(&mut self, event: &ReconcileEvent) {
		for handler in &mut self.handlers {
			if let Err(e) = handler.handle(event).await {
				warn!("Handler {} failed to process event: {}", handler.name(), e);
			}
		}
	}
}

/// Writes a session snapshot whenever an event changed the account.
pub struct SnapshotHandler {
	session: Arc<Session>,
}

impl SnapshotHandler {
	pub fn new(session: Arc<Session>) -> Self {
		Self { session }
	}
}

#[async_trait::async_trait]
impl ReconcileEventHandler for SnapshotHandler {
	async fn handle(&mut self, event: &ReconcileEvent) -> Result<(), SessionError> {
		match event {
			ReconcileEvent::Applied { .. } | ReconcileEvent::StreamEnded => {
				self.session.persist().await
			}
			_ => Ok(()),
		}
	}

	fn name(&self) -> &'static str {
		"snapshot"
	}
}
