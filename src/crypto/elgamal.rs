use crate::crypto::PublicKey;

use curve25519_dalek::{
	constants::RISTRETTO_BASEPOINT_POINT as G, ristretto::RistrettoPoint, scalar::Scalar,
	traits::Identity,
};
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Map a signed amount into the scalar field.
pub fn amount_scalar(amount: i64) -> Scalar {
	if amount >= 0 {
		Scalar::from(amount as u64)
	} else {
		-Scalar::from(amount.unsigned_abs())
	}
}

/// ElGamal ciphertext `(C, D) = (g^b · y^r, g^r)` hiding the balance `b` under key `y`.
///
/// Ciphertexts are additively homomorphic: adding two ciphertexts under the same key yields an
/// encryption of the sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
	pub c: RistrettoPoint,
	pub d: RistrettoPoint,
}

impl Ciphertext {
	/// The all-identity pair. The ledger reports it for keys that were never registered.
	pub fn zero() -> Self {
		Self {
			c: RistrettoPoint::identity(),
			d: RistrettoPoint::identity(),
		}
	}

	pub fn is_zero(&self) -> bool {
		self.c == RistrettoPoint::identity() && self.d == RistrettoPoint::identity()
	}

	pub fn encrypt(amount: i64, key: &PublicKey, randomness: &Scalar) -> Self {
		Self {
			c: G * amount_scalar(amount) + key.point() * randomness,
			d: G * randomness,
		}
	}

	/// Unblinded encoding of a transparent amount, as credited by a deposit.
	pub fn transparent(amount: i64) -> Self {
		Self {
			c: G * amount_scalar(amount),
			d: RistrettoPoint::identity(),
		}
	}

	/// Shift the hidden balance by `amount` without touching the blinding.
	pub fn plus(&self, amount: i64) -> Self {
		Self {
			c: self.c + G * amount_scalar(amount),
			d: self.d,
		}
	}

	/// `g^b`, recovered with the secret key.
	pub fn decrypt_point(&self, secret: &Scalar) -> RistrettoPoint {
		self.c - self.d * secret
	}
}

impl Add for Ciphertext {
	type Output = Ciphertext;

	fn add(self, other: Ciphertext) -> Ciphertext {
		Ciphertext {
			c: self.c + other.c,
			d: self.d + other.d,
		}
	}
}
