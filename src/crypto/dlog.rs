//! Baby-step giant-step recovery of small balances.
//!
//! Balances are assumed to fit in `bits` bits. The baby-step table holds `2^ceil(bits/2)`
//! compressed points and is built once per decoder.

use crate::crypto::Ciphertext;

use curve25519_dalek::{
	constants::RISTRETTO_BASEPOINT_POINT as G, ristretto::RistrettoPoint, scalar::Scalar,
	traits::Identity,
};
use std::collections::HashMap;
use tracing::debug;

/// Upper bound on the supported search width; the table for 48 bits already holds 2^24 entries.
pub const MAX_SEARCH_BITS: u32 = 48;

pub struct BalanceDecoder {
	bits: u32,
	baby_steps: HashMap<[u8; 32], u64>,
	/// `-m·g`
	giant_step: RistrettoPoint,
	step_size: u64,
	giant_steps: u64,
}

impl BalanceDecoder {
	pub fn new(bits: u32) -> Self {
		let bits = bits.clamp(1, MAX_SEARCH_BITS);
		let step_size = 1u64 << bits.div_ceil(2);
		let giant_steps = (1u64 << bits).div_ceil(step_size);

		let mut baby_steps = HashMap::with_capacity(step_size as usize);
		let mut current = RistrettoPoint::identity();
		for j in 0..step_size {
			baby_steps.insert(current.compress().to_bytes(), j);
			current += G;
		}
		debug!(
			"Built balance decoder table: {} baby steps, {} giant steps",
			step_size, giant_steps
		);

		Self {
			bits,
			baby_steps,
			giant_step: -(G * Scalar::from(step_size)),
			step_size,
			giant_steps,
		}
	}

	pub fn bits(&self) -> u32 {
		self.bits
	}

	/// Largest balance this decoder can recover.
	pub fn max_value(&self) -> u64 {
		(1u64 << self.bits) - 1
	}

	/// Find `b` with `g^b == point` and `0 <= b <= max_value()`.
	pub fn decode(&self, point: &RistrettoPoint) -> Option<u64> {
		let mut gamma = *point;
		for i in 0..self.giant_steps {
			if let Some(j) = self.baby_steps.get(gamma.compress().as_bytes()) {
				let value = i * self.step_size + j;
				return (value <= self.max_value()).then_some(value);
			}
			gamma += self.giant_step;
		}
		None
	}

	/// Decrypt a ciphertext and recover its balance.
	pub fn read_balance(&self, ciphertext: &Ciphertext, secret: &Scalar) -> Option<u64> {
		self.decode(&ciphertext.decrypt_point(secret))
	}
}
