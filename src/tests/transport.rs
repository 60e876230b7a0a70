use std::time::Duration;

use futures::{
	SinkExt,
	StreamExt,
};
use serde_json::{
	json,
	Value,
};
use tokio::net::{
	TcpListener,
	TcpStream,
};
use tokio_tungstenite::{
	accept_async,
	tungstenite::Message,
	WebSocketStream,
};

use super::logger;
use crate::transport::{
	Transport,
	TransportError,
	WebSocketTransport,
};

async fn bind() -> (TcpListener, String) {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Should bind");
	let url = format!("ws://{}", listener.local_addr().expect("Should have address"));
	(listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
	let (stream, _) = listener.accept().await.expect("Should accept");
	accept_async(stream).await.expect("Should handshake")
}

async fn next_request(server: &mut WebSocketStream<TcpStream>) -> Option<Value> {
	loop {
		match server.next().await {
			Some(Ok(Message::Text(text))) =>
				return Some(serde_json::from_str(&text).expect("Should parse request")),
			Some(Ok(_)) => {},
			_ => return None,
		}
	}
}

async fn send_json(server: &mut WebSocketStream<TcpStream>, message: Value) {
	server
		.send(Message::Text(message.to_string()))
		.await
		.expect("Should send response");
}

#[tokio::test]
async fn test_concurrent_requests_resolve_by_id() {
	let (listener, url) = bind().await;

	tokio::spawn(async move {
		let mut server = accept(&listener).await;
		let mut requests = vec![];
		while requests.len() < 2 {
			match next_request(&mut server).await {
				Some(request) => requests.push(request),
				None => return,
			}
		}
		// Answer in reverse arrival order; each response echoes the method
		// of the request it belongs to.
		for request in requests.iter().rev() {
			send_json(
				&mut server,
				json!({
					"id": request["id"].clone(),
					"jsonrpc": "2.0",
					"result": request["method"].clone(),
				}),
			)
			.await;
		}
		while server.next().await.is_some() {}
	});

	let transport = WebSocketTransport::connect(&url, logger());
	let (first, second) = tokio::join!(
		transport.execute("method_one", vec![]),
		transport.execute("method_two", vec![]),
	);

	assert_eq!(first.expect("Should resolve"), json!("method_one"));
	assert_eq!(second.expect("Should resolve"), json!("method_two"));
	assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_unmatched_responses_are_dropped() {
	let (listener, url) = bind().await;

	tokio::spawn(async move {
		let mut server = accept(&listener).await;
		let request = match next_request(&mut server).await {
			Some(request) => request,
			None => return,
		};
		// Garbage and an unknown id must not disturb the real response.
		send_json(&mut server, json!({"id": 424242, "jsonrpc": "2.0", "result": "bogus"})).await;
		server
			.send(Message::Text("not json".to_owned()))
			.await
			.expect("Should send frame");
		send_json(
			&mut server,
			json!({"id": request["id"].clone(), "jsonrpc": "2.0", "result": "genuine"}),
		)
		.await;
		while server.next().await.is_some() {}
	});

	let transport = WebSocketTransport::connect(&url, logger());
	let result = transport.execute("eth_chainId", vec![]).await;
	assert_eq!(result.expect("Should resolve"), json!("genuine"));
}

#[tokio::test]
async fn test_server_errors_reject_the_single_caller() {
	let (listener, url) = bind().await;

	tokio::spawn(async move {
		let mut server = accept(&listener).await;
		let request = match next_request(&mut server).await {
			Some(request) => request,
			None => return,
		};
		send_json(
			&mut server,
			json!({
				"id": request["id"].clone(),
				"jsonrpc": "2.0",
				"error": {"code": -32601, "message": "Method not found"},
			}),
		)
		.await;
		while server.next().await.is_some() {}
	});

	let transport = WebSocketTransport::connect(&url, logger());
	let result = transport.execute("unknown_method", vec![]).await;
	assert_eq!(
		result,
		Err(TransportError::Rpc { code: -32601, message: "Method not found".to_owned() }),
	);
}

#[tokio::test]
async fn test_request_timeout_clears_pending_table() {
	let (listener, url) = bind().await;

	tokio::spawn(async move {
		let mut server = accept(&listener).await;
		// Swallow everything, never answer.
		while server.next().await.is_some() {}
	});

	let transport = WebSocketTransport::connect_with(
		&url,
		Duration::from_millis(250),
		Duration::from_millis(50),
		logger(),
	);
	let result = transport.execute("eth_chainId", vec![]).await;

	assert_eq!(result, Err(TransportError::Timeout("eth_chainId".to_owned())));
	assert_eq!(transport.pending_requests(), 0);
}

async fn serve_subscription(
	server: &mut WebSocketStream<TcpStream>,
	remote_id: &str,
	head: u64,
) {
	loop {
		let request = match next_request(server).await {
			Some(request) => request,
			None => return,
		};
		if request["method"] == "parity_subscribe" {
			send_json(
				server,
				json!({"id": request["id"].clone(), "jsonrpc": "2.0", "result": remote_id}),
			)
			.await;
			send_json(
				server,
				json!({
					"jsonrpc": "2.0",
					"method": "parity_subscription",
					"params": {"subscription": remote_id, "result": head},
				}),
			)
			.await;
			return
		}
	}
}

#[tokio::test]
async fn test_subscriptions_survive_reconnect() {
	let (listener, url) = bind().await;

	tokio::spawn(async move {
		// First connection: register the subscription, push one head, then
		// close the socket under the client.
		let mut server = accept(&listener).await;
		serve_subscription(&mut server, "0x1", 1).await;
		server.close(None).await.ok();

		// Second connection: the client re-registers on its own and gets a
		// fresh remote id.
		let mut server = accept(&listener).await;
		serve_subscription(&mut server, "0x2", 2).await;
		while server.next().await.is_some() {}
	});

	let transport = WebSocketTransport::connect_with(
		&url,
		Duration::from_secs(5),
		Duration::from_millis(50),
		logger(),
	);
	let mut subscription =
		transport.subscribe("eth_getBlockByNumber", vec![json!("latest"), json!(false)]);

	assert_eq!(subscription.next().await, Some(json!(1)));
	assert_eq!(subscription.next().await, Some(json!(2)));
}

#[tokio::test]
async fn test_inline_subscription_errors_do_not_terminate() {
	let (listener, url) = bind().await;

	tokio::spawn(async move {
		let mut server = accept(&listener).await;
		let request = match next_request(&mut server).await {
			Some(request) => request,
			None => return,
		};
		send_json(
			&mut server,
			json!({"id": request["id"].clone(), "jsonrpc": "2.0", "result": "0x1"}),
		)
		.await;
		// An inline error frame is logged and dropped, the stream stays up.
		send_json(
			&mut server,
			json!({
				"jsonrpc": "2.0",
				"method": "parity_subscription",
				"params": {"subscription": "0x1", "error": {"code": -32000, "message": "boom"}},
			}),
		)
		.await;
		send_json(
			&mut server,
			json!({
				"jsonrpc": "2.0",
				"method": "parity_subscription",
				"params": {"subscription": "0x1", "result": 7},
			}),
		)
		.await;
		while server.next().await.is_some() {}
	});

	let transport = WebSocketTransport::connect(&url, logger());
	let mut subscription = transport.subscribe("eth_getBlockByNumber", vec![json!("latest")]);

	assert_eq!(subscription.next().await, Some(json!(7)));
}
