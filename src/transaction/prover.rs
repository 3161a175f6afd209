//! Proof service integration for confidential transfers and burns.
//!
//! Defines the statements and witnesses handed to a prover, the [`ProofService`] capability the
//! orchestrator consumes, a client for a remote proof server, and [`DigestProver`], a
//! statement-binding digest used with the in-memory ledger.

use crate::crypto::{Ciphertext, PublicKey};
use crate::ledger::ProofBytes;

use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProverError {
	#[error("Proof server request failed: {0}")]
	RequestError(#[from] reqwest::Error),

	#[error("Invalid proof server URL: {0}")]
	UrlError(String),

	#[error("Proof server returned an empty response")]
	EmptyResponse,

	#[error("Statement encoding error: {0}")]
	EncodingError(#[from] bincode::Error),
}

fn scalar_hex<S: Serializer>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&format!("0x{}", hex::encode(scalar.to_bytes())))
}

/// Public inputs of a transfer proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferStatement {
	pub epoch: u64,
	pub fee: u64,
	pub parties: Vec<PublicKey>,
	/// Balances fetched for `epoch` before the transfer.
	pub pre_states: Vec<Ciphertext>,
	pub deltas: Vec<Ciphertext>,
	/// `pre_states[i] + deltas[i]`
	pub post_states: Vec<Ciphertext>,
	pub epoch_tag: RistrettoPoint,
}

/// Secret inputs of a transfer proof.
#[derive(Clone, Serialize)]
pub struct TransferWitness {
	#[serde(serialize_with = "scalar_hex")]
	pub secret: Scalar,
	#[serde(serialize_with = "scalar_hex")]
	pub randomness: Scalar,
	pub value: u64,
	/// Sender's spendable balance after the transfer and fee.
	pub remaining_balance: u64,
	pub sender_index: usize,
	pub receiver_index: usize,
}

impl fmt::Debug for TransferWitness {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TransferWitness")
			.field("value", &self.value)
			.field("remaining_balance", &self.remaining_balance)
			.field("sender_index", &self.sender_index)
			.field("receiver_index", &self.receiver_index)
			.finish_non_exhaustive()
	}
}

/// Public inputs of a burn proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurnStatement {
	pub public_key: PublicKey,
	pub epoch: u64,
	/// Ledger address the withdrawn funds are released to.
	pub recipient: String,
	pub value: u64,
	pub pre_state: Ciphertext,
	pub post_state: Ciphertext,
	pub epoch_tag: RistrettoPoint,
}

/// Secret inputs of a burn proof.
#[derive(Clone, Serialize)]
pub struct BurnWitness {
	#[serde(serialize_with = "scalar_hex")]
	pub secret: Scalar,
	pub remaining_balance: u64,
}

impl fmt::Debug for BurnWitness {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BurnWitness")
			.field("remaining_balance", &self.remaining_balance)
			.finish_non_exhaustive()
	}
}

/// Capability interface over the zero-knowledge prover.
#[async_trait]
pub trait ProofService: Send + Sync {
	async fn prove_transfer(
		&self,
		statement: &TransferStatement,
		witness: &TransferWitness,
	) -> Result<ProofBytes, ProverError>;

	async fn prove_burn(
		&self,
		statement: &BurnStatement,
		witness: &BurnWitness,
	) -> Result<ProofBytes, ProverError>;
}

#[derive(Serialize)]
struct ProveRequest<'a, S: Serialize, W: Serialize> {
	statement: &'a S,
	witness: &'a W,
}

/// How long one proof request keeps retrying. Proving happens before broadcast, so giving up is safe.
const PROVE_RETRY_WINDOW: Duration = Duration::from_secs(120);

/// Remote proof server client for generating zero-knowledge proofs
pub struct RemoteProofServer {
	url: String,
	client: reqwest::Client,
}

impl RemoteProofServer {
	/// Creates a new remote proof server client
	pub fn new(url: String) -> Result<Self, ProverError> {
		let client = reqwest::ClientBuilder::new()
			.pool_idle_timeout(None)
			.build()?;
		Ok(Self { url, client })
	}

	async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<ProofBytes, ProverError> {
		let url = reqwest::Url::parse(&self.url)
			.and_then(|base| base.join(path))
			.map_err(|e| ProverError::UrlError(format!("{}: {}", self.url, e)))?;

		let policy = ExponentialBackoff {
			max_elapsed_time: Some(PROVE_RETRY_WINDOW),
			..ExponentialBackoff::default()
		};

		let response_bytes = retry(policy, || async {
			let resp = self
				.client
				.post(url.clone())
				.json(body)
				.send()
				.await
				.map_err(|e| {
					warn!("Proof server send error: {}", e);
					backoff::Error::transient(e)
				})?;

			let status = resp.status();
			let resp_err = resp.error_for_status_ref().err();
			let resp_bytes = resp.bytes().await.map_err(|e| {
				warn!("Proof server body error: {}", e);
				backoff::Error::transient(e)
			})?;

			if let Some(e) = resp_err {
				warn!(
					"Proof server response error: {}. Body: {}",
					e,
					String::from_utf8_lossy(&resp_bytes)
				);
				// A rejected statement will not become valid on retry.
				if status.is_client_error() {
					return Err(backoff::Error::permanent(e));
				}
				return Err(backoff::Error::transient(e));
			}

			Ok::<Vec<u8>, backoff::Error<reqwest::Error>>(resp_bytes.to_vec())
		})
		.await?;

		if response_bytes.is_empty() {
			return Err(ProverError::EmptyResponse);
		}

		debug!("Received {} proof bytes from {}", response_bytes.len(), url);
		Ok(ProofBytes(response_bytes))
	}
}

#[async_trait]
impl ProofService for RemoteProofServer {
	async fn prove_transfer(
		&self,
		statement: &TransferStatement,
		witness: &TransferWitness,
	) -> Result<ProofBytes, ProverError> {
		self.post("prove-transfer", &ProveRequest { statement, witness })
			.await
	}

	async fn prove_burn(
		&self,
		statement: &BurnStatement,
		witness: &BurnWitness,
	) -> Result<ProofBytes, ProverError> {
		self.post("prove-burn", &ProveRequest { statement, witness })
			.await
	}
}

/// Binds a submission to its public statement with a SHA-256 digest.
///
/// This is not a zero-knowledge proof and proves nothing about the witness. It lets the in-memory
/// ledger reject submissions whose statement does not match the ledger's own view.
#[derive(Debug, Clone, Default)]
pub struct DigestProver;

impl DigestProver {
	fn digest(domain: &[u8], encoded: &[u8]) -> ProofBytes {
		let mut hasher = Sha256::new();
		hasher.update(domain);
		hasher.update(encoded);
		ProofBytes(hasher.finalize().to_vec())
	}

	pub fn transfer_digest(statement: &TransferStatement) -> Result<ProofBytes, ProverError> {
		Ok(Self::digest(b"transfer", &bincode::serialize(statement)?))
	}

	pub fn burn_digest(statement: &BurnStatement) -> Result<ProofBytes, ProverError> {
		Ok(Self::digest(b"burn", &bincode::serialize(statement)?))
	}
}

#[async_trait]
impl ProofService for DigestProver {
	async fn prove_transfer(
		&self,
		statement: &TransferStatement,
		_witness: &TransferWitness,
	) -> Result<ProofBytes, ProverError> {
		Self::transfer_digest(statement)
	}

	async fn prove_burn(
		&self,
		statement: &BurnStatement,
		_witness: &BurnWitness,
	) -> Result<ProofBytes, ProverError> {
		Self::burn_digest(statement)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::{Keypair, epoch_tag};

	fn burn_statement(value: u64) -> BurnStatement {
		let keypair = Keypair::generate();
		let pre_state = Ciphertext::transparent(50);
		BurnStatement {
			public_key: *keypair.public(),
			epoch: 3,
			recipient: "0xhome".to_string(),
			value,
			pre_state,
			post_state: pre_state.plus(-(value as i64)),
			epoch_tag: epoch_tag(3, keypair.secret()),
		}
	}

	#[test]
	fn digest_binds_the_statement() {
		let statement = burn_statement(10);
		let first = DigestProver::burn_digest(&statement).unwrap();
		let again = DigestProver::burn_digest(&statement).unwrap();
		let mut altered = statement.clone();
		altered.value = 11;
		assert_eq!(first, again);
		assert_ne!(first, DigestProver::burn_digest(&altered).unwrap());
	}

	#[test]
	fn witness_debug_hides_secrets() {
		let witness = BurnWitness {
			secret: Scalar::from(42u64),
			remaining_balance: 5,
		};
		let rendered = format!("{:?}", witness);
		assert!(rendered.contains("remaining_balance"));
		assert!(!rendered.contains("secret"));
	}

	#[test]
	fn invalid_server_url_is_reported() {
		let server = RemoteProofServer::new("not a url".to_string()).unwrap();
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.unwrap();
		let statement = burn_statement(1);
		let witness = BurnWitness {
			secret: Scalar::from(1u64),
			remaining_balance: 0,
		};
		let result = runtime.block_on(server.prove_burn(&statement, &witness));
		assert!(matches!(result, Err(ProverError::UrlError(_))));
	}
}
