/// Transfer and burn intent construction
pub mod builder;
/// Proof service seam and implementations
pub mod prover;
/// Contract call submission
pub mod sender;

pub use builder::{BurnIntent, TransactionError, TransferBuilder, TransferIntent};
pub use prover::{DigestProver, ProofService, ProverError, RemoteProofServer};
pub use sender::Sender;
