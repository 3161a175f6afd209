//! Session configuration.
//!
//! Defaults suit a local node; [`SessionConfig::from_env`] overlays `ZSC_*` environment variables.
//! Epoch length and fee are not configured here: they are read from the contract on connect.

use crate::wallet::SessionError;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Latency model and retry policy for spending operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
	/// Proving cost per `n·log2(n)` unit of set size, in ms.
	pub per_party_ms: u64,
	/// Fixed proving and verification cost, in ms.
	pub base_ms: u64,
	/// Extra time for the submission callback, in ms.
	pub submission_overhead_ms: u64,
	/// Minimum time before the boundary for a burn to land in the same epoch, in ms.
	pub burn_latency_ms: u64,
	/// `None` waits indefinitely.
	pub max_deferrals: Option<u32>,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			per_party_ms: 20,
			base_ms: 5200,
			submission_overhead_ms: 20,
			burn_latency_ms: 3100,
			max_deferrals: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
	pub rpc_url: String,
	pub ws_url: String,
	pub prover_url: String,
	/// Ledger address that pays for and signs this client's calls.
	pub address: String,
	/// Address of the confidential contract.
	pub contract: String,
	/// Where account snapshots are written; `None` disables persistence.
	pub data_dir: Option<PathBuf>,
	/// Balances are recovered by searching `[0, 2^max_balance_bits)`.
	pub max_balance_bits: u32,
	/// How long an unmatched self-originated transaction id is remembered.
	pub pending_tx_ttl: Duration,
	pub scheduler: SchedulerConfig,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			rpc_url: "http://localhost:8545".to_string(),
			ws_url: "ws://localhost:8546".to_string(),
			prover_url: "http://localhost:6300".to_string(),
			address: String::new(),
			contract: String::new(),
			data_dir: None,
			max_balance_bits: 32,
			pending_tx_ttl: Duration::from_secs(3600),
			scheduler: SchedulerConfig::default(),
		}
	}
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, SessionError>
where
	T::Err: std::fmt::Display,
{
	value
		.trim()
		.parse()
		.map_err(|e| SessionError::Config(format!("{}={:?}: {}", name, value, e)))
}

impl SessionConfig {
	/// Defaults overlaid with `ZSC_*` variables from the process environment.
	pub fn from_env() -> Result<Self, SessionError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Defaults overlaid with whatever `lookup` returns for each `ZSC_*` name.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, SessionError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();
		if let Some(value) = lookup("ZSC_RPC_URL") {
			config.rpc_url = value;
		}
		if let Some(value) = lookup("ZSC_WS_URL") {
			config.ws_url = value;
		}
		if let Some(value) = lookup("ZSC_PROVER_URL") {
			config.prover_url = value;
		}
		if let Some(value) = lookup("ZSC_ADDRESS") {
			config.address = value;
		}
		if let Some(value) = lookup("ZSC_CONTRACT") {
			config.contract = value;
		}
		if let Some(value) = lookup("ZSC_DATA_DIR") {
			config.data_dir = Some(PathBuf::from(value));
		}
		if let Some(value) = lookup("ZSC_MAX_BALANCE_BITS") {
			config.max_balance_bits = parse_var("ZSC_MAX_BALANCE_BITS", &value)?;
		}
		if let Some(value) = lookup("ZSC_MAX_DEFERRALS") {
			config.scheduler.max_deferrals = Some(parse_var("ZSC_MAX_DEFERRALS", &value)?);
		}
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), SessionError> {
		if !(1..=crate::crypto::dlog::MAX_SEARCH_BITS).contains(&self.max_balance_bits) {
			return Err(SessionError::Config(format!(
				"max_balance_bits must be between 1 and {}, got {}",
				crate::crypto::dlog::MAX_SEARCH_BITS,
				self.max_balance_bits
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |name| vars.get(name).cloned()
	}

	#[test]
	fn defaults_without_environment() {
		let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
		assert_eq!(config, SessionConfig::default());
		assert_eq!(config.scheduler.max_deferrals, None);
		assert_eq!(config.max_balance_bits, 32);
	}

	#[test]
	fn variables_override_defaults() {
		let config = SessionConfig::from_lookup(lookup(&[
			("ZSC_CONTRACT", "0xzsc"),
			("ZSC_DATA_DIR", "/tmp/zsc"),
			("ZSC_MAX_DEFERRALS", "5"),
			("ZSC_MAX_BALANCE_BITS", " 20 "),
		]))
		.unwrap();
		assert_eq!(config.contract, "0xzsc");
		assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/zsc")));
		assert_eq!(config.scheduler.max_deferrals, Some(5));
		assert_eq!(config.max_balance_bits, 20);
	}

	#[test]
	fn bad_values_are_configuration_errors() {
		let err = SessionConfig::from_lookup(lookup(&[("ZSC_MAX_DEFERRALS", "many")])).unwrap_err();
		assert_eq!(err.kind(), crate::wallet::ErrorKind::Configuration);
		assert!(SessionConfig::from_lookup(lookup(&[("ZSC_MAX_BALANCE_BITS", "64")])).is_err());
	}
}
