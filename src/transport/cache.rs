use std::{
	collections::{
		hash_map::DefaultHasher,
		HashMap,
		VecDeque,
	},
	hash::{
		Hash,
		Hasher,
	},
	sync::Arc,
};

use futures::{
	future::{
		BoxFuture,
		Shared,
	},
	FutureExt,
};
use parking_lot::Mutex;
use serde_json::Value;

use super::{
	Result,
	SubscriptionHandle,
	Transport,
};
use crate::constants::REQUEST_CACHE_CAPACITY;

type SharedRequest = Shared<BoxFuture<'static, Result<Value>>>;

struct CacheState {
	entries: HashMap<u64, SharedRequest>,
	// Insertion order, for FIFO eviction once over capacity.
	order: VecDeque<u64>,
}

/// Decorates a transport with a request memo table keyed on method and
/// params. Identical calls share one underlying request even while it is
/// still in flight; the owning connector clears the table on every new
/// block so chain-state reads never go stale past one head.
pub struct CachedTransport<T> {
	inner: Arc<T>,
	capacity: usize,
	cache: Mutex<CacheState>,
}

impl<T: Transport> CachedTransport<T> {
	pub fn new(inner: T) -> Self {
		Self::with_capacity(inner, REQUEST_CACHE_CAPACITY)
	}

	pub fn with_capacity(inner: T, capacity: usize) -> Self {
		Self {
			inner: Arc::new(inner),
			capacity,
			cache: Mutex::new(CacheState { entries: HashMap::new(), order: VecDeque::new() }),
		}
	}

	pub fn invalidate(&self) {
		let mut cache = self.cache.lock();
		cache.entries.clear();
		cache.order.clear();
	}

	pub fn len(&self) -> usize {
		self.cache.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.cache.lock().entries.is_empty()
	}

	fn cache_key(method: &str, params: &[Value]) -> u64 {
		let mut hasher = DefaultHasher::new();
		method.hash(&mut hasher);
		for param in params {
			param.to_string().hash(&mut hasher);
		}
		hasher.finish()
	}
}

#[async_trait::async_trait]
impl<T: Transport> Transport for CachedTransport<T> {
	async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value> {
		let key = Self::cache_key(method, &params);
		let request = {
			let mut cache = self.cache.lock();
			match cache.entries.get(&key) {
				Some(request) => request.clone(),
				None => {
					let inner = self.inner.clone();
					let method = method.to_owned();
					let request =
						async move { inner.execute(&method, params).await }.boxed().shared();
					cache.entries.insert(key, request.clone());
					cache.order.push_back(key);
					if cache.order.len() > self.capacity {
						if let Some(oldest) = cache.order.pop_front() {
							cache.entries.remove(&oldest);
						}
					}
					request
				},
			}
		};
		request.await
	}

	fn subscribe(&self, method: &str, params: Vec<Value>) -> SubscriptionHandle {
		self.inner.subscribe(method, params)
	}
}
