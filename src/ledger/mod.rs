//! Ledger integration for the confidential contract
//!
//! This module defines the capability interface the client engine consumes, the wire types of
//! contract calls and events, and two connectors: a JSON-RPC/WebSocket client for a real node
//! gateway and an in-memory ledger that executes the contract locally.

/// JSON-RPC and WebSocket connector
mod client;
/// The `LedgerConnector` capability trait
mod connector;
/// In-memory execution of the confidential contract
pub mod memory;
/// Type definitions for calls, receipts and events
mod types;

pub use client::RpcLedgerConnector;
pub use connector::{EventStream, LedgerConnector};
pub use memory::InMemoryLedger;
pub use types::*;
