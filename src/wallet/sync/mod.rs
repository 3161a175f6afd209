//! Ledger reconciliation and session persistence
//!
//! - `reconciler`: merges the ledger's event streams and applies foreign events to the account.
//! - `events`: reconciliation outcomes and the handlers they are dispatched to.
//! - `progress_tracker`: per-class counts and periodic progress logging.
//! - `state_persistence` / `repositories`: account snapshots and where they are stored.

pub mod events;
pub mod progress_tracker;
/// Event stream reconciliation
pub mod reconciler;
pub mod repositories;
pub mod state_persistence;

pub use reconciler::EventReconciler;
