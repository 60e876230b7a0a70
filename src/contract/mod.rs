pub mod event;

use std::{
	collections::{
		HashMap,
		HashSet,
	},
	sync::Arc,
};

use ethabi::{
	Event,
	Function,
	ParamType,
	Token,
};
use futures::{
	channel::mpsc::UnboundedReceiver,
	StreamExt,
};
use parking_lot::Mutex;
use slog::{
	debug,
	warn,
	Logger,
};
use thiserror::Error;
use web3::{
	signing::Key,
	types::{
		Address,
		BlockNumber,
		Bytes,
		CallRequest,
		FilterBuilder,
		H256,
		U256,
	},
};

pub use event::ContractLog;

use crate::{
	codec,
	connector::{
		Connector,
		ConnectorError,
	},
	keys::PrivateKey,
	transaction::Transaction,
	transport::{
		Listeners,
		Transport,
	},
};

#[derive(Error, Debug)]
pub enum ContractError {
	#[error("ABI error: `{0}`")]
	Abi(#[from] ethabi::Error),
	#[error("Method `{method}` expects {expected} arguments, got {got}")]
	ArgumentCount { method: String, expected: usize, got: usize },
	#[error("Unknown method `{0}`")]
	UnknownMethod(String),
	#[error("Unknown event `{0}`")]
	UnknownEvent(String),
	#[error("Method `{0}` is not a static")]
	NotStatic(String),
	#[error("Signing failed: `{0}`")]
	Sign(String),
	#[error(transparent)]
	Connector(#[from] ConnectorError),
}

pub type Result<T> = std::result::Result<T, ContractError>;

/// Signer configuration for state-changing calls.
#[derive(Clone)]
pub struct Account {
	private_key: PrivateKey,
	chain_id: u64,
	gas_price: U256,
}

impl Account {
	pub fn new(private_key: PrivateKey, chain_id: u64, gas_price: U256) -> Self {
		Self { private_key, chain_id, gas_price }
	}

	pub fn address(&self) -> Address {
		self.private_key.address()
	}
}

#[derive(Clone, Debug, Default)]
pub struct TransactionOptions {
	pub gas: Option<U256>,
	pub gas_price: Option<U256>,
	pub nonce: Option<U256>,
	pub value: Option<U256>,
}

#[derive(Clone, Debug, Default)]
pub struct EventQuery {
	pub from_block: Option<BlockNumber>,
	pub to_block: Option<BlockNumber>,
}

/// Stream of decoded logs delivered by a node-side filter that is polled on
/// every new block.
pub struct EventSubscription {
	filter_id: U256,
	receiver: UnboundedReceiver<ContractLog>,
}

impl EventSubscription {
	pub fn filter_id(&self) -> U256 {
		self.filter_id
	}

	pub async fn next(&mut self) -> Option<ContractLog> {
		self.receiver.next().await
	}
}

/// A deployed contract: an ABI bound to an address over a connector, with
/// typed call/query encoding and block-driven event delivery.
pub struct Contract<T: Transport> {
	connector: Arc<Connector<T>>,
	abi: ethabi::Contract,
	address: Address,
	account: Account,
	static_names: HashSet<String>,
	statics: Mutex<HashMap<String, Token>>,
	filters: Arc<Mutex<HashMap<U256, Listeners<ContractLog>>>>,
	log: Logger,
}

impl<T: Transport> Contract<T> {
	pub fn load(
		connector: Arc<Connector<T>>,
		abi_json: &[u8],
		address: Address,
		account: Account,
		log: Logger,
	) -> Result<Self> {
		let abi = ethabi::Contract::load(abi_json)?;

		// Constant niladic single-output methods are fetched once and then
		// served from memory for the lifetime of the instance.
		let static_names = abi
			.functions()
			.filter(|function| {
				function.constant && function.inputs.is_empty() && function.outputs.len() == 1
			})
			.map(|function| function.name.clone())
			.collect();

		let contract = Self {
			connector,
			abi,
			address,
			account,
			static_names,
			statics: Mutex::new(HashMap::new()),
			filters: Arc::new(Mutex::new(HashMap::new())),
			log,
		};
		contract.spawn_filter_poller();
		Ok(contract)
	}

	pub fn address(&self) -> Address {
		self.address
	}

	pub fn abi(&self) -> &ethabi::Contract {
		&self.abi
	}

	/// Four-byte selector of a method, derived from its canonical signature.
	pub fn selector(&self, name: &str) -> Result<[u8; 4]> {
		let function = self.function(name)?;
		let kinds: Vec<ParamType> =
			function.inputs.iter().map(|input| input.kind.clone()).collect();
		Ok(codec::short_signature(&function.name, &kinds))
	}

	/// Topic of an event, the full hash of its canonical signature.
	pub fn topic(&self, name: &str) -> Result<H256> {
		Ok(self.event(name)?.signature())
	}

	fn function(&self, name: &str) -> Result<&Function> {
		self.abi.function(name).map_err(|_| ContractError::UnknownMethod(name.to_owned()))
	}

	fn event(&self, name: &str) -> Result<&Event> {
		self.abi.event(name).map_err(|_| ContractError::UnknownEvent(name.to_owned()))
	}

	/// ABI-encodes a call, `selector ++ arguments`. The argument count must
	/// match the ABI declaration exactly.
	pub fn encode_call(&self, name: &str, args: &[Token]) -> Result<Vec<u8>> {
		let function = self.function(name)?;
		if function.inputs.len() != args.len() {
			return Err(ContractError::ArgumentCount {
				method: name.to_owned(),
				expected: function.inputs.len(),
				got: args.len(),
			})
		}
		Ok(function.encode_input(args)?)
	}

	/// Read-only invocation via `eth_call` at zero gas price, decoded per
	/// the declared output types.
	pub async fn query(&self, name: &str, args: &[Token]) -> Result<Vec<Token>> {
		let data = self.encode_call(name, args)?;
		let request = CallRequest {
			to: Some(self.address),
			gas_price: Some(U256::zero()),
			data: Some(Bytes(data)),
			..Default::default()
		};
		let output = self.connector.call(request).await?;
		Ok(self.function(name)?.decode_output(&output.0)?)
	}

	/// Cached value of a constant niladic method; fetched on first use and
	/// never re-fetched.
	pub async fn static_value(&self, name: &str) -> Result<Token> {
		if !self.static_names.contains(name) {
			return Err(ContractError::NotStatic(name.to_owned()))
		}
		if let Some(value) = self.statics.lock().get(name) {
			return Ok(value.clone())
		}

		let value = self
			.query(name, &[])
			.await?
			.pop()
			.ok_or(ContractError::Abi(ethabi::Error::InvalidData))?;
		self.statics.lock().insert(name.to_owned(), value.clone());
		Ok(value)
	}

	pub async fn estimate(&self, name: &str, args: &[Token]) -> Result<U256> {
		let data = self.encode_call(name, args)?;
		self.estimate_data(data, &TransactionOptions::default()).await
	}

	async fn estimate_data(
		&self,
		data: Vec<u8>,
		options: &TransactionOptions,
	) -> Result<U256> {
		let request = CallRequest {
			from: Some(self.account.address()),
			to: Some(self.address),
			value: options.value,
			data: Some(Bytes(data)),
			..Default::default()
		};
		Ok(self.connector.estimate_gas(request).await?)
	}

	/// State-changing invocation: fills in gas and nonce, signs the
	/// transaction with the account key and submits it, returning the
	/// transaction hash.
	pub async fn call(
		&self,
		name: &str,
		args: &[Token],
		options: TransactionOptions,
	) -> Result<H256> {
		let data = self.encode_call(name, args)?;

		let gas = match options.gas {
			Some(gas) => gas,
			None => self.estimate_data(data.clone(), &options).await?,
		};
		let nonce = match options.nonce {
			Some(nonce) => nonce,
			None => self.connector.next_nonce(self.account.address()).await?,
		};

		let transaction = Transaction {
			nonce,
			gas_price: options.gas_price.unwrap_or(self.account.gas_price),
			gas,
			to: Some(self.address),
			value: options.value.unwrap_or_default(),
			data,
		};
		let signed = transaction
			.sign(&self.account.private_key, self.account.chain_id)
			.map_err(|e| ContractError::Sign(e.to_string()))?;

		debug!(
			self.log,
			"Submitting transaction";
			"method" => name,
			"hash" => format!("{:?}", signed.hash),
		);
		Ok(self.connector.send_raw_transaction(signed.raw).await?)
	}

	/// Topic filter for an event: position 0 is the event topic, subsequent
	/// positions carry the indexed-argument filters. `None` is a wildcard,
	/// several tokens an OR-list at that position.
	pub fn event_topics(
		&self,
		name: &str,
		arg_filters: &[Option<Vec<Token>>],
	) -> Result<Vec<Option<Vec<H256>>>> {
		let event = self.event(name)?;
		let mut topics = vec![Some(vec![event.signature()])];
		let indexed_count = event.inputs.iter().filter(|input| input.indexed).count();
		for position in 0..indexed_count {
			let filter = arg_filters.get(position).cloned().flatten();
			topics.push(
				filter.map(|tokens| tokens.iter().map(encode_topic).collect()),
			);
		}
		Ok(topics)
	}

	/// One-shot `eth_getLogs` over a block range (earliest..latest when
	/// unspecified), bound to this contract's address and decoded.
	pub async fn past_events(
		&self,
		names: &[&str],
		query: EventQuery,
	) -> Result<Vec<ContractLog>> {
		let topic0 = self.named_topics(names)?;
		let filter = FilterBuilder::default()
			.address(vec![self.address])
			.topics(Some(topic0), None, None, None)
			.from_block(query.from_block.unwrap_or(BlockNumber::Earliest))
			.to_block(query.to_block.unwrap_or(BlockNumber::Latest))
			.build();

		let logs = self.connector.logs(filter).await?;
		Ok(logs.into_iter().map(|log| self.decode_log(log)).collect())
	}

	/// Like [`Contract::past_events`] for a single event, additionally
	/// narrowing on its indexed arguments.
	pub async fn past_events_of(
		&self,
		name: &str,
		arg_filters: &[Option<Vec<Token>>],
		query: EventQuery,
	) -> Result<Vec<ContractLog>> {
		let mut topics = self.event_topics(name, arg_filters)?;
		topics.resize(4, None);
		let filter = FilterBuilder::default()
			.address(vec![self.address])
			.topics(
				topics[0].clone(),
				topics[1].clone(),
				topics[2].clone(),
				topics[3].clone(),
			)
			.from_block(query.from_block.unwrap_or(BlockNumber::Earliest))
			.to_block(query.to_block.unwrap_or(BlockNumber::Latest))
			.build();

		let logs = self.connector.logs(filter).await?;
		Ok(logs.into_iter().map(|log| self.decode_log(log)).collect())
	}

	/// Installs a node-side filter for the named events (all events when
	/// empty) and registers it for block-driven polling.
	pub async fn subscribe(
		&self,
		names: &[&str],
		query: EventQuery,
	) -> Result<EventSubscription> {
		let topic0 = self.named_topics(names)?;
		let filter = FilterBuilder::default()
			.address(vec![self.address])
			.topics(Some(topic0), None, None, None)
			.from_block(query.from_block.unwrap_or(BlockNumber::Latest))
			.to_block(query.to_block.unwrap_or(BlockNumber::Latest))
			.build();

		let filter_id = self.connector.new_filter(filter).await?;
		let listeners = Listeners::default();
		let receiver = listeners.attach();
		self.filters.lock().insert(filter_id, listeners);
		debug!(self.log, "Installed event filter"; "filter" => filter_id.to_string());
		Ok(EventSubscription { filter_id, receiver })
	}

	/// Drops an active filter locally and uninstalls it on the node.
	pub async fn unsubscribe(&self, subscription: EventSubscription) -> Result<bool> {
		self.filters.lock().remove(&subscription.filter_id);
		Ok(self.connector.uninstall_filter(subscription.filter_id).await?)
	}

	fn named_topics(&self, names: &[&str]) -> Result<Vec<H256>> {
		if names.is_empty() {
			return Ok(self.abi.events().map(|event| event.signature()).collect())
		}
		names.iter().map(|name| Ok(self.event(name)?.signature())).collect()
	}

	fn decode_log(&self, log: web3::types::Log) -> ContractLog {
		let events: Vec<Event> = self.abi.events().cloned().collect();
		let decoded = ContractLog::decode(&events, log);
		if decoded.event.is_none() {
			debug!(
				self.log,
				"Log with unrecognized topic passed through";
				"address" => format!("{:?}", decoded.raw.address),
			);
		}
		decoded
	}

	/// On every new head, polls each active filter for changes, narrows the
	/// results to this contract and delivers decoded logs. Failures keep the
	/// filter installed and are retried on the next block.
	fn spawn_filter_poller(&self) {
		let connector = self.connector.clone();
		let filters = self.filters.clone();
		let events: Vec<Event> = self.abi.events().cloned().collect();
		let address = self.address;
		let log = self.log.clone();

		tokio::spawn(async move {
			let mut blocks = connector.blocks();
			while blocks.next().await.is_some() {
				let active: Vec<(U256, Listeners<ContractLog>)> = filters
					.lock()
					.iter()
					.map(|(filter_id, listeners)| (*filter_id, listeners.clone()))
					.collect();

				for (filter_id, listeners) in active {
					match connector.filter_changes(filter_id).await {
						Ok(changes) => {
							for entry in
								changes.into_iter().filter(|entry| entry.address == address)
							{
								listeners.publish(ContractLog::decode(&events, entry));
							}
						},
						Err(e) => warn!(
							log,
							"Filter poll failed";
							"filter" => filter_id.to_string(),
							"error" => e.to_string(),
						),
					}
				}
			}
		});
	}
}

/// An indexed argument occupies exactly one topic word; dynamic values are
/// stored as their hash.
fn encode_topic(token: &Token) -> H256 {
	match token {
		Token::Bytes(bytes) => H256(codec::keccak256(bytes)),
		Token::String(text) => H256(codec::keccak256(text.as_bytes())),
		Token::Array(_) | Token::FixedArray(_) | Token::Tuple(_) => {
			H256(codec::keccak256(&ethabi::encode(&[token.clone()])))
		},
		other => {
			let encoded = ethabi::encode(&[other.clone()]);
			H256::from_slice(&encoded[..32])
		},
	}
}
