//! JSON-RPC and WebSocket client for a node hosting the confidential contract.
//!
//! Queries and submissions go over HTTP as JSON-RPC 2.0 calls. Event subscriptions use a
//! `graphql-transport-ws` style WebSocket session; a single subscription carries every requested
//! event class in log order, and the node delivers transfer events together with their decoded
//! call inputs.
//!
//! Nothing here imposes a deadline. Receipt polling retries until the node answers; callers wrap
//! calls in their own timeouts.

use super::connector::{EventStream, LedgerConnector};
use super::types::*;
use crate::crypto::{Ciphertext, PublicKey};

use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info, warn};

/// Ledger connector backed by a remote node
pub struct RpcLedgerConnector {
	/// The underlying HTTP client for JSON-RPC calls.
	http_client: Client,
	/// The node's JSON-RPC endpoint.
	rpc_url: String,
	/// The WebSocket URL for event subscriptions.
	ws_url: String,
	/// Address of the confidential contract, passed along with every call.
	contract: String,
	request_id: AtomicU64,
}

impl RpcLedgerConnector {
	/// Create a new connector.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC calls.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	/// * `contract` - Address of the confidential contract.
	pub fn new(rpc_url: String, ws_url: String, contract: String) -> Result<Self, LedgerError> {
		let http_client = Client::builder().build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			contract,
			request_id: AtomicU64::new(1),
		})
	}

	/// Execute a JSON-RPC call and return its `result` member.
	async fn call(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, LedgerError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.request_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::RpcError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let mut response_json: serde_json::Value = response.json().await?;

		if let Some(err) = response_json.get("error") {
			let message = err
				.get("message")
				.and_then(|m| m.as_str())
				.map(str::to_string)
				.unwrap_or_else(|| err.to_string());
			return Err(LedgerError::RpcError(format!("{}: {}", method, message)));
		}

		match response_json.get_mut("result") {
			Some(result) => Ok(result.take()),
			None => Err(LedgerError::NoData),
		}
	}

	async fn call_as<T: DeserializeOwned>(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<T, LedgerError> {
		let result = self.call(method, params).await?;
		if result.is_null() {
			return Err(LedgerError::NoData);
		}
		Ok(serde_json::from_value(result)?)
	}

	fn call_params(&self, call: &SignedCall) -> serde_json::Value {
		json!([{
			"to": self.contract,
			"from": call.from,
			"nonce": call.nonce,
			"payload": format!("0x{}", hex::encode(&call.payload)),
		}])
	}

	async fn open_subscription(&self, classes: &[EventClass]) -> Result<EventStream, LedgerError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let mut request = self.ws_url.clone().into_client_request()?;
		request.headers_mut().insert(
			"Sec-WebSocket-Protocol",
			"graphql-transport-ws".parse().map_err(|_| {
				LedgerError::SubscriptionError(
					"Invalid WebSocket subprotocol header value".to_string(),
				)
			})?,
		);

		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let init_message = json!({ "type": "connection_init" });
		ws_sender
			.send(Message::Text(init_message.to_string()))
			.await?;

		match ws_receiver.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					if parsed.get("type").and_then(|t| t.as_str()) != Some("connection_ack") {
						return Err(LedgerError::SubscriptionError(
							"Connection not acknowledged".to_string(),
						));
					}
				}
				_ => {
					return Err(LedgerError::SubscriptionError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(LedgerError::SubscriptionError(
					"Connection closed during handshake".to_string(),
				));
			}
		}

		let names: Vec<&'static str> = classes.iter().map(EventClass::as_str).collect();
		let start_message = json!({
			"id": "zsc_events",
			"type": "subscribe",
			"payload": {
				"contract": self.contract,
				"events": names,
			}
		});
		ws_sender
			.send(Message::Text(start_message.to_string()))
			.await?;
		info!("Subscribed to {:?} events", names);

		let classes = classes.to_vec();
		let stream = ws_receiver.filter_map(move |msg| {
			let classes = classes.clone();
			async move {
				match msg {
					Ok(Message::Text(text)) => parse_subscription_message(&classes, &text),
					Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
					Ok(Message::Close(_)) => {
						debug!("Event subscription closed by node");
						None
					}
					Ok(_) => Some(Err(LedgerError::SubscriptionError(
						"Unexpected message type".to_string(),
					))),
					Err(e) => Some(Err(LedgerError::WebSocketError(e))),
				}
			}
		});

		Ok(Box::pin(stream))
	}
}

/// Turn one subscription frame into an event, an error, or nothing.
fn parse_subscription_message(
	classes: &[EventClass],
	text: &str,
) -> Option<Result<LedgerEvent, LedgerError>> {
	let parsed = match serde_json::from_str::<serde_json::Value>(text) {
		Ok(parsed) => parsed,
		Err(e) => return Some(Err(LedgerError::JsonError(e))),
	};

	let Some(msg_type) = parsed.get("type").and_then(|t| t.as_str()) else {
		return Some(Err(LedgerError::MalformedEvent(
			"Message missing type field".to_string(),
		)));
	};

	match msg_type {
		"next" => {
			let Some(data) = parsed.get("payload").and_then(|p| p.get("data")) else {
				return Some(Err(LedgerError::NoData));
			};
			let Some((class, body)) = classes
				.iter()
				.find_map(|class| data.get(class.as_str()).map(|body| (*class, body)))
			else {
				return Some(Err(LedgerError::MalformedEvent(
					"Frame carries no subscribed event".to_string(),
				)));
			};
			let event = match class {
				EventClass::TransferOccurred => {
					serde_json::from_value(body.clone()).map(LedgerEvent::TransferOccurred)
				}
				EventClass::Deposited => {
					serde_json::from_value(body.clone()).map(LedgerEvent::Deposited)
				}
				EventClass::Burned => serde_json::from_value(body.clone()).map(LedgerEvent::Burned),
			};
			Some(event.map_err(|e| {
				error!("Failed to deserialize {} event: {}", class.as_str(), e);
				LedgerError::MalformedEvent(e.to_string())
			}))
		}
		"error" => {
			let error_msg = parsed
				.get("payload")
				.and_then(|p| p.get("message"))
				.and_then(|m| m.as_str())
				.unwrap_or("Unknown subscription error");
			Some(Err(LedgerError::SubscriptionError(error_msg.to_string())))
		}
		"complete" => {
			debug!("Event subscription completed");
			None
		}
		_ => {
			debug!("Ignoring message type: {}", msg_type);
			None
		}
	}
}

#[async_trait]
impl LedgerConnector for RpcLedgerConnector {
	async fn protocol_params(&self) -> Result<ProtocolParams, LedgerError> {
		self.call_as("zsc_protocolParams", json!([self.contract]))
			.await
	}

	async fn latest_block_timestamp(&self) -> Result<u64, LedgerError> {
		self.call_as("zsc_latestBlockTimestamp", json!([])).await
	}

	async fn account_nonce(&self, address: &str) -> Result<u64, LedgerError> {
		self.call_as("zsc_accountNonce", json!([address])).await
	}

	async fn simulate_accounts(
		&self,
		keys: &[PublicKey],
		epoch: u64,
	) -> Result<Vec<Ciphertext>, LedgerError> {
		let states: Vec<Ciphertext> = self
			.call_as("zsc_simulateAccounts", json!([self.contract, keys, epoch]))
			.await?;
		if states.len() != keys.len() {
			return Err(LedgerError::RpcError(format!(
				"expected {} account states, got {}",
				keys.len(),
				states.len()
			)));
		}
		Ok(states)
	}

	async fn simulate_call(&self, call: &SignedCall) -> Result<(), LedgerError> {
		let result = self.call("zsc_simulateCall", self.call_params(call)).await?;
		match result.get("revertReason").and_then(|r| r.as_str()) {
			Some(reason) => Err(LedgerError::Reverted(reason.to_string())),
			None => Ok(()),
		}
	}

	async fn submit_transaction(&self, call: &SignedCall) -> Result<TxId, LedgerError> {
		let expected = call.tx_id();
		let tx_id: TxId = self
			.call_as("zsc_sendTransaction", self.call_params(call))
			.await
			.map_err(|e| LedgerError::BroadcastError(e.to_string()))?;
		if tx_id != expected {
			warn!("Node reported tx id {} for call {}", tx_id, expected);
		}
		Ok(tx_id)
	}

	async fn wait_for_receipt(&self, tx_id: &TxId) -> Result<Receipt, LedgerError> {
		let policy = ExponentialBackoff {
			initial_interval: Duration::from_millis(250),
			max_interval: Duration::from_secs(2),
			max_elapsed_time: None,
			..ExponentialBackoff::default()
		};

		retry(policy, || async {
			match self
				.call_as::<Receipt>("zsc_getReceipt", json!([tx_id]))
				.await
			{
				Ok(receipt) => Ok(receipt),
				Err(LedgerError::NoData) => {
					debug!("Receipt for {} not yet available", tx_id);
					Err(backoff::Error::transient(LedgerError::NoData))
				}
				Err(e @ LedgerError::HttpError(_)) => {
					warn!("Receipt poll for {} failed: {}", tx_id, e);
					Err(backoff::Error::transient(e))
				}
				Err(e) => Err(backoff::Error::permanent(e)),
			}
		})
		.await
	}

	async fn subscribe(&self, classes: &[EventClass]) -> Result<EventStream, LedgerError> {
		self.open_subscription(classes).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Keypair;

	#[test]
	fn deposit_frames_become_events() {
		let key = *Keypair::generate().public();
		let record = BalanceChangeRecord {
			meta: EventMeta {
				tx_id: TxId("0xaa".to_string()),
				block_number: 4,
				timestamp: 30,
				log_index: 2,
			},
			binding: key.binding(),
			amount: 100,
		};
		let frame = json!({
			"id": "zsc_events",
			"type": "next",
			"payload": { "data": { "Deposited": record } }
		});
		let event = parse_subscription_message(&EventClass::ALL, &frame.to_string())
			.unwrap()
			.unwrap();
		assert_eq!(event.meta().position(), (4, 2));
		assert_eq!(event, LedgerEvent::Deposited(record));

		let result = parse_subscription_message(&[EventClass::Burned], &frame.to_string());
		assert!(matches!(result, Some(Err(LedgerError::MalformedEvent(_)))));
	}

	#[test]
	fn garbage_frames_surface_as_errors() {
		let frame = json!({
			"type": "next",
			"payload": { "data": { "TransferOccurred": { "parties": 7 } } }
		});
		let result = parse_subscription_message(&EventClass::ALL, &frame.to_string());
		assert!(matches!(result, Some(Err(LedgerError::MalformedEvent(_)))));

		let result = parse_subscription_message(&EventClass::ALL, "not json");
		assert!(matches!(result, Some(Err(LedgerError::JsonError(_)))));
	}

	#[test]
	fn control_frames_are_skipped() {
		let complete = json!({ "type": "complete", "id": "zsc_events" }).to_string();
		let keepalive = json!({ "type": "ka" }).to_string();
		assert!(parse_subscription_message(&EventClass::ALL, &complete).is_none());
		assert!(parse_subscription_message(&EventClass::ALL, &keepalive).is_none());
	}
}
