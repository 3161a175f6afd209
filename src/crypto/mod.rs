//! Group arithmetic used by the confidential-payment client.
//!
//! Everything here sits on Ristretto255. The client never needs the proof-system internals, only
//! key handling, ElGamal-in-the-exponent ciphertexts, and a bounded discrete-log search to read
//! small balances back out of a ciphertext.

/// Bounded discrete-log balance recovery
pub mod dlog;
/// ElGamal ciphertexts over Ristretto255
pub mod elgamal;
/// Keypairs, registration signatures and epoch tags
pub mod keys;

pub use dlog::BalanceDecoder;
pub use elgamal::{Ciphertext, amount_scalar};
pub use keys::{Keypair, PublicKey, RegistrationSignature, epoch_tag, random_scalar};

/// Errors raised while decoding or validating group elements.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
	#[error("Invalid point encoding: {0}")]
	InvalidPoint(String),

	#[error("Invalid scalar encoding: {0}")]
	InvalidScalar(String),

	#[error("Hex decode error: {0}")]
	Hex(#[from] hex::FromHexError),

	#[error("Balance is outside the searchable range of {0} bits")]
	BalanceOutOfRange(u32),
}
