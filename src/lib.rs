//! Client for a Zether-style confidential payment contract.
//!
//! A [`wallet::Session`] holds one account's key, its local balance projection and its friend
//! directory. [`wallet::TransferOrchestrator`] drives register, deposit, transfer and withdraw
//! against any [`ledger::LedgerConnector`], deferring spends to the next epoch when needed, while
//! [`wallet::EventReconciler`] applies events caused by other parties.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod transaction;
pub mod utils;
pub mod wallet;
