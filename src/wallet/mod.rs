pub mod account;
pub mod anonymity;
pub mod friends;
pub mod orchestrator;
pub mod pending;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod types;

pub use account::{AccountState, TxEffect};
pub use anonymity::{AnonymitySet, AnonymitySetBuilder, ResolvedParties};
pub use friends::FriendDirectory;
pub use orchestrator::{BalanceReport, TransferOrchestrator};
pub use pending::{PendingTxRegistry, Sighting};
pub use scheduler::{Deferral, EpochScheduler, Operation};
pub use session::Session;
pub use sync::EventReconciler;
pub use types::*;
