pub mod cache;
pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use futures::{
	channel::mpsc::{
		unbounded,
		UnboundedReceiver,
		UnboundedSender,
	},
	StreamExt,
};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

pub use cache::CachedTransport;
pub use ws::WebSocketTransport;

/// Cloneable so that cached request futures can be shared between callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
	#[error("Socket error: `{0}`")]
	Socket(String),
	#[error("JSON-RPC error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("Request `{0}` timed out")]
	Timeout(String),
	#[error("Protocol decode error: `{0}`")]
	Decode(String),
	#[error("Transport shut down")]
	Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A JSON-RPC 2.0 endpoint multiplexing concurrent requests and push
/// subscriptions over a single connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	/// Performs a single request/response round-trip.
	async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value>;

	/// Registers a push subscription polling `method` with `params` on the
	/// node. The returned handle is valid immediately; the node-side
	/// registration completes in the background.
	fn subscribe(&self, method: &str, params: Vec<Value>) -> SubscriptionHandle;
}

/// One-sender many-receivers fan-out. Receivers whose end was dropped are
/// pruned on the next publish.
pub struct Listeners<T> {
	inner: Arc<Mutex<Vec<UnboundedSender<T>>>>,
}

impl<T> Default for Listeners<T> {
	fn default() -> Self {
		Self { inner: Arc::new(Mutex::new(vec![])) }
	}
}

impl<T> Clone for Listeners<T> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}

impl<T: Clone> Listeners<T> {
	pub fn attach(&self) -> UnboundedReceiver<T> {
		let (sender, receiver) = unbounded();
		self.inner.lock().push(sender);
		receiver
	}

	pub fn publish(&self, value: T) {
		self.inner.lock().retain(|listener| listener.unbounded_send(value.clone()).is_ok());
	}

	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().is_empty()
	}
}

/// Handle to an established subscription. Listeners may attach before the
/// node-side registration has completed; deliveries queue in each listener's
/// channel until consumed.
pub struct SubscriptionHandle {
	listeners: Listeners<Value>,
	receiver: UnboundedReceiver<Value>,
}

impl SubscriptionHandle {
	pub fn new(listeners: Listeners<Value>) -> Self {
		let receiver = listeners.attach();
		Self { listeners, receiver }
	}

	/// Attaches another independent listener channel.
	pub fn listen(&self) -> UnboundedReceiver<Value> {
		self.listeners.attach()
	}

	pub async fn next(&mut self) -> Option<Value> {
		self.receiver.next().await
	}
}
