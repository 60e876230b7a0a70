use std::{
	collections::HashMap,
	sync::{
		atomic::{
			AtomicBool,
			AtomicU64,
			Ordering,
		},
		Arc,
	},
	time::{
		Duration,
		Instant,
	},
};

use futures::{
	SinkExt,
	StreamExt,
};
use parking_lot::Mutex;
use serde_json::{
	json,
	Value,
};
use slog::{
	debug,
	warn,
	Logger,
};
use tokio::{
	sync::{
		mpsc,
		oneshot,
	},
	time::{
		sleep,
		timeout,
	},
};
use tokio_tungstenite::{
	connect_async,
	tungstenite::Message,
};

use super::{
	Listeners,
	Result,
	SubscriptionHandle,
	Transport,
	TransportError,
};
use crate::constants::{
	DEFAULT_RECONNECT_DELAY,
	DEFAULT_REQUEST_TIMEOUT,
	JSONRPC_VERSION,
	SUBSCRIBE_METHOD,
	SUBSCRIPTION_NOTIFICATION,
};

struct PendingRequest {
	method: String,
	sent_at: Instant,
	responder: oneshot::Sender<Result<Value>>,
	// Local subscription id when this request is a registration; the
	// node-assigned id must be bound during dispatch, before any further
	// frame is routed, or an immediate notification would be dropped.
	registers: Option<u64>,
}

struct SubscriptionState {
	method: String,
	params: Vec<Value>,
	listeners: Listeners<Value>,
}

struct Inner {
	url: String,
	request_timeout: Duration,
	reconnect_delay: Duration,
	next_request_id: AtomicU64,
	next_subscription_id: AtomicU64,
	connected: AtomicBool,
	pending: Mutex<HashMap<u64, PendingRequest>>,
	subscriptions: Mutex<HashMap<u64, SubscriptionState>>,
	// Node-assigned id -> local subscription id, rebuilt on every reconnect.
	remote_ids: Mutex<HashMap<u64, u64>>,
	outgoing: mpsc::UnboundedSender<String>,
	log: Logger,
}

/// A single WebSocket connection to a JSON-RPC node, shared by all callers.
///
/// The socket is owned by a background task which reconnects forever on a
/// fixed delay; requests issued while disconnected queue until the socket
/// opens and subscriptions are re-registered on every new connection.
#[derive(Clone)]
pub struct WebSocketTransport {
	inner: Arc<Inner>,
}

impl WebSocketTransport {
	pub fn connect(url: &str, log: Logger) -> Self {
		Self::connect_with(url, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RECONNECT_DELAY, log)
	}

	pub fn connect_with(
		url: &str,
		request_timeout: Duration,
		reconnect_delay: Duration,
		log: Logger,
	) -> Self {
		let (outgoing, outgoing_receiver) = mpsc::unbounded_channel();
		let inner = Arc::new(Inner {
			url: url.to_owned(),
			request_timeout,
			reconnect_delay,
			next_request_id: AtomicU64::new(1),
			next_subscription_id: AtomicU64::new(1),
			connected: AtomicBool::new(false),
			pending: Mutex::new(HashMap::new()),
			subscriptions: Mutex::new(HashMap::new()),
			remote_ids: Mutex::new(HashMap::new()),
			outgoing,
			log,
		});

		tokio::spawn(connection_loop(inner.clone(), outgoing_receiver));

		Self { inner }
	}

	pub fn is_connected(&self) -> bool {
		self.inner.connected.load(Ordering::SeqCst)
	}

	/// Number of requests awaiting a response.
	pub fn pending_requests(&self) -> usize {
		self.inner.pending.lock().len()
	}
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
	async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value> {
		self.inner.execute(method, params).await
	}

	fn subscribe(&self, method: &str, params: Vec<Value>) -> SubscriptionHandle {
		let local_id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
		let listeners = Listeners::default();
		self.inner.subscriptions.lock().insert(
			local_id,
			SubscriptionState {
				method: method.to_owned(),
				params,
				listeners: listeners.clone(),
			},
		);

		tokio::spawn(register_subscription(self.inner.clone(), local_id));

		SubscriptionHandle::new(listeners)
	}
}

impl Inner {
	async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value> {
		self.execute_with(method, params, None).await
	}

	async fn execute_with(
		&self,
		method: &str,
		params: Vec<Value>,
		registers: Option<u64>,
	) -> Result<Value> {
		let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
		let (responder, response) = oneshot::channel();
		self.pending.lock().insert(
			id,
			PendingRequest {
				method: method.to_owned(),
				sent_at: Instant::now(),
				responder,
				registers,
			},
		);

		let envelope = json!({
			"id": id,
			"method": method,
			"params": params,
			"jsonrpc": JSONRPC_VERSION,
		});
		if self.outgoing.send(envelope.to_string()).is_err() {
			self.pending.lock().remove(&id);
			return Err(TransportError::Closed)
		}

		match timeout(self.request_timeout, response).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => Err(TransportError::Closed),
			Err(_) => {
				// A response arriving after this point finds no pending
				// entry and is dropped by id lookup.
				if let Some(request) = self.pending.lock().remove(&id) {
					debug!(
						self.log,
						"Request timed out";
						"method" => request.method.clone(),
						"id" => id,
						"waited" => format!("{:?}", request.sent_at.elapsed()),
					);
				}
				Err(TransportError::Timeout(method.to_owned()))
			},
		}
	}

	fn dispatch(&self, frame: &str) {
		let message: Value = match serde_json::from_str(frame) {
			Ok(message) => message,
			Err(e) => {
				warn!(self.log, "Malformed frame dropped"; "error" => e.to_string());
				return
			},
		};

		if let Some(id) = message.get("id").and_then(Value::as_u64) {
			self.dispatch_response(id, &message);
		} else if message.get("method").and_then(Value::as_str) == Some(SUBSCRIPTION_NOTIFICATION)
		{
			self.dispatch_notification(&message);
		} else {
			debug!(self.log, "Unroutable frame dropped");
		}
	}

	fn dispatch_response(&self, id: u64, message: &Value) {
		let request = match self.pending.lock().remove(&id) {
			Some(request) => request,
			None => {
				debug!(self.log, "Response for unknown request dropped"; "id" => id);
				return
			},
		};

		let outcome = match message.get("error").filter(|error| !error.is_null()) {
			Some(error) => Err(rpc_error(error)),
			None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
		};

		if let (Some(local_id), Ok(value)) = (request.registers, &outcome) {
			match decode_hex_id(value) {
				Some(remote_id) => {
					debug!(self.log, "Subscription registered"; "id" => remote_id);
					// Only the newest node-assigned id stays bound; a stale
					// duplicate registration then pushes into the void
					// instead of double-delivering.
					let mut remote_ids = self.remote_ids.lock();
					remote_ids.retain(|_, bound| *bound != local_id);
					remote_ids.insert(remote_id, local_id);
				},
				None => warn!(
					self.log,
					"Unusable subscription id";
					"value" => value.to_string(),
				),
			}
		}

		let _ = request.responder.send(outcome);
	}

	fn dispatch_notification(&self, message: &Value) {
		let params = match message.get("params") {
			Some(params) => params,
			None => return,
		};
		let remote_id = match params.get("subscription").and_then(decode_hex_id) {
			Some(remote_id) => remote_id,
			None => {
				debug!(self.log, "Notification without subscription id dropped");
				return
			},
		};

		// Inline subscription errors never terminate the stream; the node is
		// expected to keep pushing on subsequent heads.
		if let Some(error) = params.get("error").filter(|error| !error.is_null()) {
			warn!(self.log, "Subscription error"; "id" => remote_id, "error" => error.to_string());
			return
		}

		let local_id = match self.remote_ids.lock().get(&remote_id).copied() {
			Some(local_id) => local_id,
			None => {
				debug!(self.log, "Notification for unknown subscription dropped"; "id" => remote_id);
				return
			},
		};

		let result = params.get("result").cloned().unwrap_or(Value::Null);
		if let Some(subscription) = self.subscriptions.lock().get(&local_id) {
			subscription.listeners.publish(result);
		}
	}
}

async fn register_subscription(inner: Arc<Inner>, local_id: u64) {
	let (method, params) = match inner.subscriptions.lock().get(&local_id) {
		Some(subscription) => (subscription.method.clone(), subscription.params.clone()),
		None => return,
	};

	let registration = vec![Value::String(method.clone()), Value::Array(params)];
	if let Err(e) = inner.execute_with(SUBSCRIBE_METHOD, registration, Some(local_id)).await {
		// Registration is retried on the next reconnect.
		warn!(inner.log, "Subscription registration failed"; "method" => method, "error" => e.to_string())
	}
}

async fn connection_loop(inner: Arc<Inner>, mut outgoing: mpsc::UnboundedReceiver<String>) {
	loop {
		let stream = match connect_async(inner.url.as_str()).await {
			Ok((stream, _)) => stream,
			Err(e) => {
				warn!(inner.log, "Connection failed"; "url" => inner.url.clone(), "error" => e.to_string());
				sleep(inner.reconnect_delay).await;
				continue
			},
		};

		debug!(inner.log, "Connected"; "url" => inner.url.clone());
		inner.connected.store(true, Ordering::SeqCst);
		replay_subscriptions(&inner);

		let (mut sink, mut source) = stream.split();
		loop {
			tokio::select! {
				message = outgoing.recv() => {
					let message = match message {
						Some(message) => message,
						// All transport handles dropped.
						None => return,
					};
					if let Err(e) = sink.send(Message::Text(message)).await {
						warn!(inner.log, "Send failed"; "error" => e.to_string());
						break
					}
				},
				frame = source.next() => match frame {
					Some(Ok(Message::Text(frame))) => inner.dispatch(&frame),
					Some(Ok(Message::Ping(payload))) => {
						let _ = sink.send(Message::Pong(payload)).await;
					},
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {},
					// Socket-level errors are tolerated; only an explicit
					// close or end of stream tears the connection down.
					Some(Err(e)) => {
						warn!(inner.log, "Socket error"; "error" => e.to_string());
					},
				},
			}
		}

		inner.connected.store(false, Ordering::SeqCst);
		inner.remote_ids.lock().clear();
		warn!(inner.log, "Connection closed, reconnecting"; "url" => inner.url.clone());
		sleep(inner.reconnect_delay).await;
	}
}

/// Re-registers every known subscription against a fresh connection. Each
/// gets a new node-assigned id while its listener set is preserved.
fn replay_subscriptions(inner: &Arc<Inner>) {
	let local_ids: Vec<u64> = inner.subscriptions.lock().keys().copied().collect();
	for local_id in local_ids {
		tokio::spawn(register_subscription(inner.clone(), local_id));
	}
}

fn decode_hex_id(value: &Value) -> Option<u64> {
	match value {
		Value::String(text) =>
			u64::from_str_radix(text.trim_start_matches("0x"), 16).ok(),
		Value::Number(number) => number.as_u64(),
		_ => None,
	}
}

fn rpc_error(error: &Value) -> TransportError {
	TransportError::Rpc {
		code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
		message: error
			.get("message")
			.and_then(Value::as_str)
			.unwrap_or("unknown server error")
			.to_owned(),
	}
}
