use crate::crypto::CryptoError;

use curve25519_dalek::{
	constants::RISTRETTO_BASEPOINT_POINT as G,
	ristretto::{CompressedRistretto, RistrettoPoint},
	scalar::Scalar,
	traits::Identity,
};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Domain separator for registration signatures
const REGISTRATION_DOMAIN: &[u8] = b"zether-client/register";
/// Domain separator for the per-epoch generator
const EPOCH_DOMAIN: &[u8] = b"Zether";

/// Draw a scalar with full entropy from the thread CSPRNG.
pub fn random_scalar() -> Scalar {
	let mut bytes = [0u8; 64];
	rand::rng().fill_bytes(&mut bytes);
	Scalar::from_bytes_mod_order_wide(&bytes)
}

fn wide_hash_to_scalar(parts: &[&[u8]]) -> Scalar {
	let mut hasher = Sha512::new();
	for part in parts {
		hasher.update(part);
	}
	let digest = hasher.finalize();
	let mut wide = [0u8; 64];
	wide.copy_from_slice(&digest);
	Scalar::from_bytes_mod_order_wide(&wide)
}

/// A public key `y = g^x`.
///
/// Equality and hashing go through the canonical compressed encoding, so two keys compare equal
/// exactly when they are the same group element.
#[derive(Clone, Copy)]
pub struct PublicKey {
	point: RistrettoPoint,
	compressed: [u8; 32],
}

impl PublicKey {
	pub fn from_point(point: RistrettoPoint) -> Self {
		Self {
			point,
			compressed: point.compress().to_bytes(),
		}
	}

	/// The identity element, used on the wire as the "no beneficiary" sentinel.
	pub fn identity() -> Self {
		Self::from_point(RistrettoPoint::identity())
	}

	pub fn is_identity(&self) -> bool {
		self.point == RistrettoPoint::identity()
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
		let compressed = CompressedRistretto::from_slice(bytes)
			.map_err(|e| CryptoError::InvalidPoint(format!("expected 32 bytes: {}", e)))?;
		let point = compressed
			.decompress()
			.ok_or_else(|| CryptoError::InvalidPoint("not a valid Ristretto encoding".to_string()))?;
		Ok(Self::from_point(point))
	}

	/// Parse a hex encoded key, with or without a `0x` prefix.
	pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
		let bytes = hex::decode(encoded.trim_start_matches("0x"))?;
		Self::from_bytes(&bytes)
	}

	pub fn to_hex(&self) -> String {
		format!("0x{}", hex::encode(self.compressed))
	}

	pub fn point(&self) -> &RistrettoPoint {
		&self.point
	}

	pub fn to_bytes(&self) -> [u8; 32] {
		self.compressed
	}

	/// Hash of the key that the ledger emits in deposit and burn events.
	pub fn binding(&self) -> [u8; 32] {
		Sha256::digest(self.compressed).into()
	}
}

impl PartialEq for PublicKey {
	fn eq(&self, other: &Self) -> bool {
		self.compressed == other.compressed
	}
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.compressed.hash(state);
	}
}

impl fmt::Debug for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PublicKey({}…)", &self.to_hex()[..12])
	}
}

impl fmt::Display for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl Serialize for PublicKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for PublicKey {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let encoded = String::deserialize(deserializer)?;
		PublicKey::from_hex(&encoded).map_err(serde::de::Error::custom)
	}
}

/// Secret scalar `x` and its public key. Owned by exactly one account.
#[derive(Clone)]
pub struct Keypair {
	secret: Scalar,
	public: PublicKey,
}

impl Keypair {
	pub fn generate() -> Self {
		Self::from_secret(random_scalar())
	}

	pub fn from_secret(secret: Scalar) -> Self {
		Self {
			secret,
			public: PublicKey::from_point(G * secret),
		}
	}

	/// Parse a secret exported by [`Keypair::secret_hex`]. Non-canonical input is reduced mod the
	/// group order.
	pub fn from_secret_hex(encoded: &str) -> Result<Self, CryptoError> {
		let bytes = hex::decode(encoded.trim_start_matches("0x"))?;
		let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
			CryptoError::InvalidScalar(format!("expected 32 bytes, got {}", b.len()))
		})?;
		Ok(Self::from_secret(Scalar::from_bytes_mod_order(bytes)))
	}

	pub fn secret_hex(&self) -> String {
		format!("0x{}", hex::encode(self.secret.to_bytes()))
	}

	pub fn secret(&self) -> &Scalar {
		&self.secret
	}

	pub fn public(&self) -> &PublicKey {
		&self.public
	}

	/// Sign the binding between this key and the confidential contract's address.
	pub fn sign_registration(&self, contract: &str) -> RegistrationSignature {
		let nonce = random_scalar();
		let commitment = G * nonce;
		let challenge = registration_challenge(contract, &self.public, &commitment);
		RegistrationSignature {
			challenge: challenge.to_bytes(),
			response: (nonce + challenge * self.secret).to_bytes(),
		}
	}
}

impl fmt::Debug for Keypair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Keypair")
			.field("public", &self.public)
			.finish_non_exhaustive()
	}
}

/// Schnorr signature `(c, s)` proving knowledge of `x` for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationSignature {
	pub challenge: [u8; 32],
	pub response: [u8; 32],
}

impl RegistrationSignature {
	pub fn verify(&self, contract: &str, public: &PublicKey) -> bool {
		let challenge: Option<Scalar> = Scalar::from_canonical_bytes(self.challenge).into();
		let response: Option<Scalar> = Scalar::from_canonical_bytes(self.response).into();
		let (Some(challenge), Some(response)) = (challenge, response) else {
			return false;
		};
		let commitment = G * response - public.point() * challenge;
		registration_challenge(contract, public, &commitment) == challenge
	}
}

fn registration_challenge(contract: &str, public: &PublicKey, commitment: &RistrettoPoint) -> Scalar {
	wide_hash_to_scalar(&[
		REGISTRATION_DOMAIN,
		contract.as_bytes(),
		&public.to_bytes(),
		commitment.compress().as_bytes(),
	])
}

/// Generator for an epoch: a hash-to-group of the epoch number.
pub fn epoch_generator(epoch: u64) -> RistrettoPoint {
	let mut input = Vec::with_capacity(EPOCH_DOMAIN.len() + 8);
	input.extend_from_slice(EPOCH_DOMAIN);
	input.extend_from_slice(&epoch.to_be_bytes());
	RistrettoPoint::hash_from_bytes::<Sha512>(&input)
}

/// The per-epoch nonce `u = g_epoch^x`. The ledger accepts each tag at most once per epoch.
pub fn epoch_tag(epoch: u64, secret: &Scalar) -> RistrettoPoint {
	epoch_generator(epoch) * secret
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn public_key_hex_round_trips_and_rejects_garbage() {
		let keypair = Keypair::generate();
		let encoded = keypair.public().to_hex();
		assert_eq!(PublicKey::from_hex(&encoded).unwrap(), *keypair.public());
		assert!(PublicKey::from_hex("0x1234").is_err());
		assert!(PublicKey::from_hex("zz").is_err());
	}

	#[test]
	fn secret_export_recovers_the_same_public_key() {
		let keypair = Keypair::generate();
		let recovered = Keypair::from_secret_hex(&keypair.secret_hex()).unwrap();
		assert_eq!(recovered.public(), keypair.public());
	}

	#[test]
	fn registration_signature_is_bound_to_contract_and_key() {
		let keypair = Keypair::generate();
		let other = Keypair::generate();
		let signature = keypair.sign_registration("0xcontract");
		assert!(signature.verify("0xcontract", keypair.public()));
		assert!(!signature.verify("0xother", keypair.public()));
		assert!(!signature.verify("0xcontract", other.public()));
	}

	#[test]
	fn epoch_tags_differ_across_epochs() {
		let keypair = Keypair::generate();
		assert_eq!(epoch_tag(7, keypair.secret()), epoch_tag(7, keypair.secret()));
		assert_ne!(epoch_tag(7, keypair.secret()), epoch_tag(8, keypair.secret()));
	}

	#[test]
	fn identity_is_the_no_beneficiary_sentinel() {
		assert!(PublicKey::identity().is_identity());
		assert!(!Keypair::generate().public().is_identity());
	}
}
