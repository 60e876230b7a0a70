use std::sync::Arc;

use futures::{
	channel::mpsc::UnboundedReceiver,
	StreamExt,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{
	json,
	Value,
};
use slog::{
	debug,
	warn,
	Logger,
};
use thiserror::Error;
use tokio::time::{
	timeout_at,
	Instant,
};
use web3::types::{
	Address,
	Bytes,
	CallRequest,
	Filter,
	Log,
	Trace,
	TraceFilter,
	Transaction,
	TransactionReceipt,
	H256,
	U256,
	U64,
};

use crate::{
	constants::{
		CONFIRMATION_TIMEOUT,
		RECEIPT_MAX_BLOCK_ATTEMPTS,
		RECEIPT_MAX_TRANSPORT_ERRORS,
	},
	transport::{
		CachedTransport,
		Listeners,
		Transport,
		TransportError,
	},
	types::BlockHead,
};

#[derive(Error, Debug)]
pub enum ConnectorError {
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error("Invalid response: `{0}`")]
	Decode(String),
	#[error("Transaction receipt: exceeded allowed attempts")]
	ReceiptAttemptsExceeded,
	#[error("Transaction confirmation timed out")]
	ConfirmationTimeout,
	#[error("Block subscription closed")]
	SubscriptionClosed,
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Chain-level facade over a cached transport. Holds the standing
/// subscription to new block headers; every head updates the latest-block
/// state, drops the request cache and fans out to block listeners.
pub struct Connector<T: Transport> {
	transport: CachedTransport<T>,
	latest_block: RwLock<Option<BlockHead>>,
	block_listeners: Listeners<BlockHead>,
	log: Logger,
}

impl<T: Transport> Connector<T> {
	pub fn new(transport: CachedTransport<T>, log: Logger) -> Arc<Self> {
		let connector = Arc::new(Self {
			transport,
			latest_block: RwLock::new(None),
			block_listeners: Listeners::default(),
			log,
		});

		let mut heads = connector
			.transport
			.subscribe("eth_getBlockByNumber", vec![json!("latest"), json!(false)]);
		let watcher = connector.clone();
		tokio::spawn(async move {
			while let Some(value) = heads.next().await {
				match serde_json::from_value::<BlockHead>(value) {
					Ok(head) => watcher.on_new_head(head),
					Err(e) => {
						warn!(watcher.log, "Undecodable block header"; "error" => e.to_string())
					},
				}
			}
		});

		connector
	}

	fn on_new_head(&self, head: BlockHead) {
		debug!(self.log, "New block"; "number" => head.number.as_u64());
		*self.latest_block.write() = Some(head.clone());
		self.transport.invalidate();
		self.block_listeners.publish(head);
	}

	pub fn latest_block(&self) -> Option<BlockHead> {
		self.latest_block.read().clone()
	}

	/// A fresh receiver of block events, one delivery per new head.
	pub fn blocks(&self) -> UnboundedReceiver<BlockHead> {
		self.block_listeners.attach()
	}

	async fn request<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R> {
		let result = self.transport.execute(method, params).await?;
		serde_json::from_value(result).map_err(|e| ConnectorError::Decode(e.to_string()))
	}

	pub async fn balance(&self, address: Address) -> Result<U256> {
		self.request("eth_getBalance", vec![json!(address), json!("latest")]).await
	}

	pub async fn next_nonce(&self, address: Address) -> Result<U256> {
		self.request("parity_nextNonce", vec![json!(address)]).await
	}

	pub async fn estimate_gas(&self, request: CallRequest) -> Result<U256> {
		self.request("eth_estimateGas", vec![json!(request)]).await
	}

	pub async fn call(&self, request: CallRequest) -> Result<Bytes> {
		self.request("eth_call", vec![json!(request), json!("latest")]).await
	}

	pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
		self.request("eth_sendRawTransaction", vec![json!(raw)]).await
	}

	pub async fn transaction(&self, hash: H256) -> Result<Option<Transaction>> {
		self.request("eth_getTransactionByHash", vec![json!(hash)]).await
	}

	pub async fn logs(&self, filter: Filter) -> Result<Vec<Log>> {
		self.request("eth_getLogs", vec![json!(filter)]).await
	}

	pub async fn trace(&self, filter: TraceFilter) -> Result<Vec<Trace>> {
		self.request("trace_filter", vec![json!(filter)]).await
	}

	pub async fn new_filter(&self, filter: Filter) -> Result<U256> {
		self.request("eth_newFilter", vec![json!(filter)]).await
	}

	pub async fn filter_changes(&self, filter_id: U256) -> Result<Vec<Log>> {
		self.request("eth_getFilterChanges", vec![json!(filter_id)]).await
	}

	pub async fn uninstall_filter(&self, filter_id: U256) -> Result<bool> {
		self.request("eth_uninstallFilter", vec![json!(filter_id)]).await
	}

	/// Waits for the receipt of a submitted transaction, retrying once per
	/// new block until the receipt references a block. Transport failures
	/// are tolerated for a bounded number of polls before propagating.
	pub async fn transaction_receipt(&self, hash: H256) -> Result<TransactionReceipt> {
		let mut blocks = self.blocks();
		let mut attempts = 0u32;
		let mut transport_errors = 0u32;

		loop {
			if blocks.next().await.is_none() {
				return Err(ConnectorError::SubscriptionClosed)
			}

			match self.transport.execute("eth_getTransactionReceipt", vec![json!(hash)]).await {
				Ok(value) => {
					if !value.is_null() {
						let receipt: TransactionReceipt = serde_json::from_value(value)
							.map_err(|e| ConnectorError::Decode(e.to_string()))?;
						if receipt.block_number.is_some() {
							return Ok(receipt)
						}
					}
					attempts += 1;
					if attempts >= RECEIPT_MAX_BLOCK_ATTEMPTS {
						return Err(ConnectorError::ReceiptAttemptsExceeded)
					}
				},
				Err(e) => {
					transport_errors += 1;
					warn!(
						self.log,
						"Receipt poll failed";
						"hash" => format!("{:?}", hash),
						"error" => e.to_string(),
					);
					if transport_errors >= RECEIPT_MAX_TRANSPORT_ERRORS {
						return Err(e.into())
					}
				},
			}
		}
	}

	/// Resolves once the transaction sits `confirmations` blocks below the
	/// chain head, bounded by an overall deadline.
	pub async fn wait_until_confirmed(
		&self,
		hash: H256,
		confirmations: u64,
	) -> Result<TransactionReceipt> {
		let deadline = Instant::now() + CONFIRMATION_TIMEOUT;

		let receipt = timeout_at(deadline, self.transaction_receipt(hash))
			.await
			.map_err(|_| ConnectorError::ConfirmationTimeout)??;
		let mined_at = receipt
			.block_number
			.ok_or_else(|| ConnectorError::Decode("receipt without block number".to_owned()))?;
		let confirmed_at = mined_at + U64::from(confirmations);

		let mut blocks = self.blocks();
		loop {
			if let Some(latest) = self.latest_block() {
				if latest.number >= confirmed_at {
					return Ok(receipt)
				}
			}
			match timeout_at(deadline, blocks.next()).await {
				Ok(Some(_head)) => {},
				Ok(None) => return Err(ConnectorError::SubscriptionClosed),
				Err(_) => return Err(ConnectorError::ConfirmationTimeout),
			}
		}
	}
}
