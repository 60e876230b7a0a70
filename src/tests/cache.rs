use std::time::Duration;

use serde_json::json;

use super::mock::MockTransport;
use crate::transport::{
	CachedTransport,
	Transport,
};

#[tokio::test]
async fn test_identical_inflight_requests_share_one_call() {
	let mock = MockTransport::new().with_delay(Duration::from_millis(100));
	mock.always("eth_call", Ok(json!("0x01")));
	let cached = CachedTransport::new(mock.clone());

	let (first, second) = tokio::join!(
		cached.execute("eth_call", vec![json!("0xaa")]),
		cached.execute("eth_call", vec![json!("0xaa")]),
	);

	assert_eq!(first.expect("Should resolve"), json!("0x01"));
	assert_eq!(second.expect("Should resolve"), json!("0x01"));
	assert_eq!(mock.calls("eth_call"), 1);
}

#[tokio::test]
async fn test_different_params_issue_independent_calls() {
	let mock = MockTransport::new();
	mock.always("eth_call", Ok(json!("0x01")));
	let cached = CachedTransport::new(mock.clone());

	cached.execute("eth_call", vec![json!("0xaa")]).await.expect("Should resolve");
	cached.execute("eth_call", vec![json!("0xbb")]).await.expect("Should resolve");

	assert_eq!(mock.calls("eth_call"), 2);
}

#[tokio::test]
async fn test_invalidation_forces_a_fresh_call() {
	let mock = MockTransport::new();
	mock.always("eth_call", Ok(json!("0x01")));
	let cached = CachedTransport::new(mock.clone());

	cached.execute("eth_call", vec![json!("0xaa")]).await.expect("Should resolve");
	cached.execute("eth_call", vec![json!("0xaa")]).await.expect("Should resolve");
	assert_eq!(mock.calls("eth_call"), 1);

	cached.invalidate();
	cached.execute("eth_call", vec![json!("0xaa")]).await.expect("Should resolve");
	assert_eq!(mock.calls("eth_call"), 2);
}

#[tokio::test]
async fn test_eviction_drops_the_oldest_entry_first() {
	let mock = MockTransport::new();
	mock.always("eth_call", Ok(json!("0x01")));
	let cached = CachedTransport::with_capacity(mock.clone(), 2);

	cached.execute("eth_call", vec![json!("0xaa")]).await.expect("Should resolve");
	cached.execute("eth_call", vec![json!("0xbb")]).await.expect("Should resolve");
	cached.execute("eth_call", vec![json!("0xcc")]).await.expect("Should resolve");
	assert_eq!(cached.len(), 2);

	// "0xbb" and "0xcc" are still cached, "0xaa" was evicted.
	cached.execute("eth_call", vec![json!("0xbb")]).await.expect("Should resolve");
	cached.execute("eth_call", vec![json!("0xcc")]).await.expect("Should resolve");
	assert_eq!(mock.calls("eth_call"), 3);

	cached.execute("eth_call", vec![json!("0xaa")]).await.expect("Should resolve");
	assert_eq!(mock.calls("eth_call"), 4);
}

#[tokio::test]
async fn test_errors_are_shared_like_results() {
	let mock = MockTransport::new();
	mock.always(
		"eth_call",
		Err(crate::transport::TransportError::Timeout("eth_call".to_owned())),
	);
	let cached = CachedTransport::new(mock.clone());

	let first = cached.execute("eth_call", vec![json!("0xaa")]).await;
	let second = cached.execute("eth_call", vec![json!("0xaa")]).await;

	assert!(first.is_err());
	assert_eq!(first, second);
	assert_eq!(mock.calls("eth_call"), 1);
}
