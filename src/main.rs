use std::sync::Arc;
use tracing::{error, info, warn};

use zether_client::config::SessionConfig;
use zether_client::crypto::PublicKey;
use zether_client::ledger::RpcLedgerConnector;
use zether_client::transaction::RemoteProofServer;
use zether_client::utils::SystemClock;
use zether_client::wallet::{EventReconciler, Session, SessionError, TransferOrchestrator};

/// Parse `ZSC_FRIENDS`, a comma separated list of `name=0xkey` pairs.
fn parse_friends(value: &str) -> Result<Vec<(String, PublicKey)>, SessionError> {
	value
		.split(',')
		.map(str::trim)
		.filter(|entry| !entry.is_empty())
		.map(|entry| {
			let (name, key) = entry
				.split_once('=')
				.ok_or_else(|| SessionError::Config(format!("expected name=key, got {:?}", entry)))?;
			Ok((name.trim().to_string(), PublicKey::from_hex(key.trim())?))
		})
		.collect()
}

async fn start() -> Result<(), SessionError> {
	let config = SessionConfig::from_env()?;

	let ledger = Arc::new(RpcLedgerConnector::new(
		config.rpc_url.clone(),
		config.ws_url.clone(),
		config.contract.clone(),
	)?);
	info!("Created ledger connector for {}", config.rpc_url);

	let prover = Arc::new(RemoteProofServer::new(config.prover_url.clone())?);
	info!("Created proof client for {}", config.prover_url);

	let session = Arc::new(Session::connect(ledger, prover, Arc::new(SystemClock), config).await?);
	let orchestrator = TransferOrchestrator::new(session.clone());

	// Subscribe first so nothing mined while registering is missed.
	let mut reconciler = EventReconciler::new(session.clone());
	let events = reconciler.subscribe().await?;

	let secret = std::env::var("ZSC_SECRET").ok();
	let public_key = orchestrator.register(secret.as_deref()).await?;
	info!("Session ready for {}", public_key);

	if let Ok(friends) = std::env::var("ZSC_FRIENDS") {
		for (name, key) in parse_friends(&friends)? {
			session.add_friend(&name, key).await;
		}
	}

	let report = orchestrator.reconcile_balance().await?;
	info!("Balance {} (ledger {:?})", report.local, report.ledger);

	tokio::select! {
		result = reconciler.process(events) => {
			let stats = result?;
			info!("Reconciler stopped: {}", stats.summary());
		}
		_ = tokio::signal::ctrl_c() => {
			info!("Interrupted: {}", reconciler_summary(&session).await);
		}
	}

	if let Err(e) = session.persist().await {
		warn!("Failed to persist final snapshot: {}", e);
	}
	Ok(())
}

async fn reconciler_summary(session: &Session) -> String {
	format!(
		"balance {} at block {}",
		session.balance().await,
		session.last_block()
	)
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting confidential payment client");

	if let Err(e) = start().await {
		error!("Client failed ({:?}): {}", e.kind(), e);
		std::process::exit(1);
	}
}
