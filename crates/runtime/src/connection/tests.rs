use std::sync::atomic::AtomicUsize;

use chromesync_protocol::{Enable, GlobalObjectCleared, ScriptId, ScriptParsed, SetScriptSource};
use serde_json::json;

use super::*;
use crate::testing::{MemoryConnector, RemotePeer, eventually, next_peer, settle, within};

/// Connects a fresh protocol and returns it once the link is open.
async fn open_protocol(options: ProtocolOptions) -> (Protocol, RemotePeer, Arc<MemoryConnector>) {
	let (connector, mut peers) = MemoryConnector::new();
	let protocol = Protocol::with_options(connector.clone(), options);
	let (opened_tx, opened_rx) = oneshot::channel();
	protocol.connect("ws://test/page/1", signal(opened_tx), || {});
	let peer = next_peer(&mut peers).await;
	within(opened_rx).await.unwrap();
	(protocol, peer, connector)
}

fn bump(counter: &AtomicUsize) {
	counter.fetch_add(1, Ordering::SeqCst);
}

fn signal(tx: oneshot::Sender<()>) -> impl FnOnce() + Send + 'static {
	move || {
		let _ = tx.send(());
	}
}

fn recording_reporter() -> (ProtocolOptions, Arc<Mutex<Vec<RemoteError>>>) {
	let reported = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&reported);
	let options = ProtocolOptions::default().with_reporter(move |err| sink.lock().push(err.clone()));
	(options, reported)
}

#[tokio::test]
async fn test_send_before_open_fails() {
	let (connector, _peers) = MemoryConnector::new();
	let protocol = Protocol::new(connector);

	let err = protocol.send(Enable {}, None, None).unwrap_err();
	assert!(matches!(err, Error::NotConnected));
	assert_eq!(protocol.pending_commands(), 0);
}

#[tokio::test]
async fn test_ids_strictly_increase() {
	let (protocol, mut peer, _connector) = open_protocol(ProtocolOptions::default()).await;

	let ids: Vec<u64> = (0..5).map(|_| protocol.send(Enable {}, None, None).unwrap()).collect();
	assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

	for expected in &ids {
		let request = peer.expect_request().await;
		assert_eq!(request["id"], json!(expected));
		assert_eq!(request["method"], "Debugger.enable");
		assert_eq!(request["params"], json!({}));
	}
}

#[tokio::test]
async fn test_ids_survive_reconnect() {
	let (connector, mut peers) = MemoryConnector::new();
	let protocol = Protocol::new(connector);

	protocol.connect("ws://test/page/1", || {}, || {});
	let _first = next_peer(&mut peers).await;
	assert!(eventually(|| protocol.is_connected()).await);
	let before = protocol.send(Enable {}, None, None).unwrap();

	protocol.connect("ws://test/page/1", || {}, || {});
	let mut second = next_peer(&mut peers).await;
	assert!(eventually(|| protocol.is_connected()).await);
	let after = protocol.send(Enable {}, None, None).unwrap();

	assert!(after > before);
	assert_eq!(second.expect_request().await["id"], json!(after));
}

#[tokio::test]
async fn test_callback_receives_parsed_result_and_options() {
	let (protocol, mut peer, _connector) = open_protocol(ProtocolOptions::default()).await;
	let (tx, rx) = oneshot::channel();

	let id = protocol
		.send(
			SetScriptSource::new(ScriptId::from("42"), "let a = 2;"),
			Some(Box::new(move |reply| drop(tx.send(reply)))),
			Some(json!({ "path": "/src/js/app.js" })),
		)
		.unwrap();

	let request = peer.expect_request().await;
	assert_eq!(request["params"], json!({ "scriptId": "42", "scriptSource": "let a = 2;" }));
	peer.respond(id, json!({ "stackChanged": false, "status": "Ok" }));

	let reply = within(rx).await.unwrap();
	assert_eq!(reply.id, id);
	assert_eq!(reply.method, "Debugger.setScriptSource");
	assert!(reply.data.unwrap().is_ok());
	assert_eq!(reply.options, Some(json!({ "path": "/src/js/app.js" })));
	assert_eq!(protocol.pending_commands(), 0);
}

#[tokio::test]
async fn test_unknown_response_id_is_ignored() {
	let (protocol, peer, _connector) = open_protocol(ProtocolOptions::default()).await;
	let called = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&called);

	let id = protocol
		.send(Enable {}, Some(Box::new(move |_| bump(&counter))), None)
		.unwrap();
	peer.respond(id + 100, json!({}));
	peer.push(json!({ "totally": "unexpected" }));
	settle().await;

	assert_eq!(called.load(Ordering::SeqCst), 0);
	assert_eq!(protocol.pending_commands(), 1);
	assert!(protocol.is_connected());

	peer.respond(id, json!({}));
	assert!(eventually(|| called.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn test_resubscribe_replaces_callback() {
	let (protocol, peer, _connector) = open_protocol(ProtocolOptions::default()).await;
	let first = Arc::new(AtomicUsize::new(0));
	let second = Arc::new(Mutex::new(Vec::new()));

	let counter = Arc::clone(&first);
	protocol.subscribe::<ScriptParsed, _>(move |_| bump(&counter));
	let seen = Arc::clone(&second);
	protocol.subscribe::<ScriptParsed, _>(move |params| {
		if let Some(params) = params {
			seen.lock().push(params.url);
		}
	});

	peer.notify("Debugger.scriptParsed", json!({ "scriptId": "1", "url": "http://localhost/js/app.js" }));
	assert!(eventually(|| second.lock().len() == 1).await);
	assert_eq!(first.load(Ordering::SeqCst), 0);
	assert_eq!(second.lock()[0], "http://localhost/js/app.js");
}

#[tokio::test]
async fn test_notification_without_params() {
	let (protocol, peer, _connector) = open_protocol(ProtocolOptions::default()).await;
	let (tx, rx) = oneshot::channel();
	let tx = Mutex::new(Some(tx));

	protocol.subscribe::<GlobalObjectCleared, _>(move |params| {
		if let Some(tx) = tx.lock().take() {
			let _ = tx.send(params);
		}
	});
	peer.push(json!({ "method": "Debugger.globalObjectCleared" }));

	assert_eq!(within(rx).await.unwrap(), None);
}

#[tokio::test]
async fn test_unsubscribe() {
	let (protocol, peer, _connector) = open_protocol(ProtocolOptions::default()).await;
	let called = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&called);
	protocol.subscribe::<GlobalObjectCleared, _>(move |_| bump(&counter));

	assert!(protocol.unsubscribe::<GlobalObjectCleared>());
	assert!(!protocol.unsubscribe::<GlobalObjectCleared>());

	peer.notify("Debugger.globalObjectCleared", json!({}));
	settle().await;
	assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_error_response_goes_to_reporter() {
	let (options, reported) = recording_reporter();
	let (protocol, mut peer, _connector) = open_protocol(options).await;
	let called = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&called);

	let id = protocol
		.send(
			SetScriptSource::new(ScriptId::from("7"), "broken("),
			Some(Box::new(move |_| bump(&counter))),
			None,
		)
		.unwrap();
	peer.expect_request().await;
	peer.respond_error(id, -32000, "No script with given id found");

	assert!(eventually(|| reported.lock().len() == 1).await);
	let err = reported.lock()[0].clone();
	assert_eq!(err.id, id);
	assert_eq!(err.method, "Debugger.setScriptSource");
	assert_eq!(err.error.code, -32000);
	assert_eq!(called.load(Ordering::SeqCst), 0);
	assert!(protocol.is_connected());
}

#[tokio::test]
async fn test_irregular_error_payloads_are_reported() {
	let (options, reported) = recording_reporter();
	let (protocol, mut peer, _connector) = open_protocol(options).await;

	let with_data = protocol.send(Enable {}, None, None).unwrap();
	let without_message = protocol.send(Enable {}, None, None).unwrap();
	peer.expect_request().await;
	peer.expect_request().await;

	peer.push(json!({ "id": with_data, "error": { "code": -32000, "message": "boom", "data": { "detail": 1 } } }));
	peer.push(json!({ "id": without_message, "error": { "code": -32601 } }));

	assert!(eventually(|| reported.lock().len() == 2).await);
	assert_eq!(protocol.pending_commands(), 0);
	let reported = reported.lock();
	assert_eq!(reported[0].id, with_data);
	assert_eq!(reported[0].error.message, "boom");
	assert_eq!(reported[0].error.data, Some(json!({ "detail": 1 })));
	assert_eq!(reported[1].id, without_message);
	assert_eq!(reported[1].error.code, -32601);
}

#[tokio::test]
async fn test_request_resolves_result() {
	let (protocol, mut peer, _connector) = open_protocol(ProtocolOptions::default()).await;

	let responder = tokio::spawn(async move {
		let request = peer.expect_request().await;
		peer.respond(request["id"].as_u64().unwrap(), json!({ "debuggerId": "abc" }));
		peer
	});

	let result = within(protocol.request(Enable {})).await.unwrap();
	assert_eq!(result.debugger_id.as_deref(), Some("abc"));
	responder.await.unwrap();
}

#[tokio::test]
async fn test_request_maps_remote_error() {
	let (options, reported) = recording_reporter();
	let (protocol, mut peer, _connector) = open_protocol(options).await;

	let responder = tokio::spawn(async move {
		let request = peer.expect_request().await;
		peer.respond_error(request["id"].as_u64().unwrap(), -32601, "method not found");
		peer
	});

	let err = within(protocol.request(Enable {})).await.unwrap_err();
	assert!(matches!(err, Error::Remote { code: -32601, .. }));
	assert!(reported.lock().is_empty());
	responder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_removes_pending() {
	let options = ProtocolOptions::default().with_command_timeout(Duration::from_secs(3));
	let (protocol, _peer, _connector) = open_protocol(options).await;

	let err = protocol.request(Enable {}).await.unwrap_err();
	assert!(err.is_timeout());
	assert_eq!(protocol.pending_commands(), 0);
}

#[tokio::test]
async fn test_dropped_request_removes_pending() {
	let (protocol, _peer, _connector) = open_protocol(ProtocolOptions::default()).await;

	let pending = Box::pin(protocol.request(Enable {}));
	let poll = tokio::time::timeout(Duration::from_millis(10), pending).await;
	assert!(poll.is_err());
	assert_eq!(protocol.pending_commands(), 0);
}

#[tokio::test]
async fn test_dispatch_unknown_message_shapes() {
	let (connector, _peers) = MemoryConnector::new();
	let protocol = Protocol::new(connector);

	protocol.dispatch(json!({ "id": 99, "result": {} }));
	protocol.dispatch(json!({ "method": "Network.requestWillBeSent", "params": {} }));
	protocol.dispatch(json!(["not", "an", "object"]));
	protocol.dispatch(json!("text"));
	assert_eq!(protocol.pending_commands(), 0);
}

#[tokio::test]
async fn test_peer_hang_up_fires_on_close() {
	let (connector, mut peers) = MemoryConnector::new();
	let protocol = Protocol::new(connector);
	let (closed_tx, closed_rx) = oneshot::channel();

	protocol.connect("ws://test/page/1", || {}, signal(closed_tx));
	let mut peer = next_peer(&mut peers).await;
	assert!(eventually(|| protocol.is_connected()).await);

	peer.hang_up();
	within(closed_rx).await.unwrap();
	assert!(!protocol.is_connected());
	assert!(matches!(protocol.send(Enable {}, None, None), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_refused_connection_fires_on_close() {
	let (connector, _peers) = MemoryConnector::new();
	connector.refuse(true);
	let protocol = Protocol::new(connector.clone());
	let opened = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&opened);
	let (closed_tx, closed_rx) = oneshot::channel();

	protocol.connect(
		"ws://test/page/1",
		move || bump(&counter),
		signal(closed_tx),
	);

	within(closed_rx).await.unwrap();
	assert_eq!(opened.load(Ordering::SeqCst), 0);
	assert_eq!(connector.attempts(), 1);
	assert!(!protocol.is_connected());
}

#[tokio::test]
async fn test_disconnect_closes_link() {
	let (connector, mut peers) = MemoryConnector::new();
	let protocol = Protocol::new(connector);
	let (closed_tx, closed_rx) = oneshot::channel();

	protocol.connect("ws://test/page/1", || {}, signal(closed_tx));
	let mut peer = next_peer(&mut peers).await;
	assert!(eventually(|| protocol.is_connected()).await);

	assert!(protocol.disconnect());
	within(closed_rx).await.unwrap();
	assert_eq!(within(peer.next_request()).await, None);
	assert!(!protocol.disconnect());
}

#[tokio::test]
async fn test_superseded_link_never_fires_on_close() {
	let (connector, mut peers) = MemoryConnector::new();
	let protocol = Protocol::new(connector);
	let first_closed = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&first_closed);

	protocol.connect("ws://test/page/1", || {}, move || bump(&counter));
	let mut first = next_peer(&mut peers).await;
	assert!(eventually(|| protocol.is_connected()).await);

	protocol.connect("ws://test/page/1", || {}, || {});
	let _second = next_peer(&mut peers).await;

	// The first link's writer closes once the link is torn down.
	assert_eq!(within(first.next_request()).await, None);
	assert!(eventually(|| protocol.is_connected()).await);
	settle().await;
	assert_eq!(first_closed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_subscriptions_survive_reconnect() {
	let (connector, mut peers) = MemoryConnector::new();
	let protocol = Protocol::new(connector);
	let seen = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&seen);
	protocol.subscribe::<GlobalObjectCleared, _>(move |_| bump(&counter));

	protocol.connect("ws://test/page/1", || {}, || {});
	let mut first = next_peer(&mut peers).await;
	assert!(eventually(|| protocol.is_connected()).await);
	first.hang_up();
	assert!(eventually(|| !protocol.is_connected()).await);

	protocol.connect("ws://test/page/1", || {}, || {});
	let second = next_peer(&mut peers).await;
	assert!(eventually(|| protocol.is_connected()).await);
	second.notify("Debugger.globalObjectCleared", json!({}));

	assert!(eventually(|| seen.load(Ordering::SeqCst) == 1).await);
}
