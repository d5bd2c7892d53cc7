#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use danmu_domain::{LiveId, RoomId};
use danmu_platform::douyin::{
	BoxFuture, DouyinConfig, PushConnector, PushRequest, PushTransport, RoomInfo, RoomResolver, SessionDeps, StaticSigner,
};
use danmu_platform::{NullCommentSink, SecretString};
use danmu_protocol::pb::{ChatMessage, HeadersList, Message, PushFrame, Response, User};
use danmu_protocol::{GZIP_HEADER_KEY, GZIP_HEADER_VALUE, PAYLOAD_TYPE_MSG, encode_envelope, gzip_compress};
use prost::Message as _;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

use super::gateway::{Gateway, StartOutcome};
use super::subscribers::{Outbox, Subscribers};

struct ScriptedTransport {
	rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait::async_trait]
impl PushTransport for ScriptedTransport {
	async fn next_frame(&mut self) -> Option<anyhow::Result<Bytes>> {
		self.rx.recv().await.map(|b| Ok(Bytes::from(b)))
	}

	async fn send_binary(&mut self, _data: Vec<u8>) -> anyhow::Result<()> {
		Ok(())
	}

	async fn close(&mut self) -> anyhow::Result<()> {
		Ok(())
	}
}

struct StaticResolver;

#[async_trait::async_trait]
impl RoomResolver for StaticResolver {
	async fn resolve(&self, room: RoomId) -> anyhow::Result<RoomInfo> {
		Ok(RoomInfo {
			web_room_id: room,
			push_room_id: "7380000000000000001".into(),
			push_id: "7390000000000000002".into(),
			ttwid: SecretString::new("ttwid-cookie"),
			user_agent: "Mozilla/5.0 Chrome/124.0.0.0".into(),
		})
	}
}

struct FailingResolver;

#[async_trait::async_trait]
impl RoomResolver for FailingResolver {
	async fn resolve(&self, _room: RoomId) -> anyhow::Result<RoomInfo> {
		Err(anyhow!("room page unavailable"))
	}
}

type Feeds = Arc<Mutex<VecDeque<mpsc::UnboundedReceiver<Vec<u8>>>>>;

struct Fixture {
	gateway: Gateway,
	feeds: Feeds,
}

impl Fixture {
	fn new() -> Self {
		Self::with_resolver(Arc::new(StaticResolver))
	}

	fn with_resolver(resolver: Arc<dyn RoomResolver>) -> Self {
		let feeds: Feeds = Arc::default();
		let queued = Arc::clone(&feeds);
		let connector: PushConnector = Arc::new(move |_req: PushRequest| {
			let next = queued.lock().unwrap().pop_front();
			Box::pin(async move {
				match next {
					Some(rx) => Ok(Box::new(ScriptedTransport { rx }) as Box<dyn PushTransport>),
					None => Err(anyhow!("no push server")),
				}
			}) as BoxFuture<'static, anyhow::Result<Box<dyn PushTransport>>>
		});

		let config = DouyinConfig {
			ws_connector: Some(connector),
			..DouyinConfig::default()
		};
		let deps = SessionDeps::new(config, resolver, Arc::new(StaticSigner::new("SIG")), Arc::new(NullCommentSink));
		Self {
			gateway: Gateway::new(deps, Subscribers::new(64)),
			feeds,
		}
	}

	/// Queue a push connection and return its frame feed.
	fn feed(&self) -> mpsc::UnboundedSender<Vec<u8>> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.feeds.lock().unwrap().push_back(rx);
		tx
	}

	async fn wait_released(&self, room: RoomId) {
		timeout(Duration::from_secs(2), async {
			while self.gateway.registry().is_active(room) {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("room should be released");
	}
}

fn room(id: u64) -> RoomId {
	RoomId::new(id).unwrap()
}

fn live(id: u64) -> LiveId {
	LiveId::new(id).unwrap()
}

fn status(room: u64, code: u8, is_ok: bool) -> Value {
	json!({"is_ok": is_ok, "data": {"room_id": room, "status": code}})
}

async fn next_json(rx: &mut Outbox) -> Value {
	let msg = timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("expected a gateway frame")
		.expect("outbox open");
	serde_json::from_str(&msg).expect("gateway frames are json")
}

async fn assert_quiet(rx: &mut Outbox) {
	assert!(
		timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
		"unexpected gateway frame"
	);
}

fn chat_frame(log_id: u64, content: &str) -> Vec<u8> {
	let response = Response {
		messages_list: vec![Message {
			method: "WebcastChatMessage".into(),
			payload: ChatMessage {
				common: None,
				user: Some(User {
					id: 1001,
					nick_name: "观众".into(),
					..Default::default()
				}),
				content: content.into(),
			}
			.encode_to_vec(),
			msg_id: 77,
			..Default::default()
		}],
		internal_ext: format!("seq:{log_id}"),
		..Default::default()
	};
	encode_envelope(&PushFrame {
		log_id,
		payload_type: PAYLOAD_TYPE_MSG.into(),
		headers_list: vec![HeadersList {
			key: GZIP_HEADER_KEY.into(),
			value: GZIP_HEADER_VALUE.into(),
		}],
		payload: gzip_compress(&response.encode_to_vec()).unwrap(),
		..Default::default()
	})
}

#[tokio::test]
async fn start_broadcasts_lifecycle_and_chat_to_every_client() {
	let fx = Fixture::new();
	let feed = fx.feed();
	let (a, mut rx_a) = fx.gateway.subscribers().register();
	let (_b, mut rx_b) = fx.gateway.subscribers().register();

	fx.gateway.handle_client_text(a, r#"{"room_id":123,"live_id":456}"#);

	assert_eq!(next_json(&mut rx_a).await, status(123, 0, true));
	assert_eq!(next_json(&mut rx_b).await, status(123, 0, true));

	feed.send(chat_frame(1, "你好呀朋友们")).unwrap();
	let expected = json!({
		"is_ok": true,
		"data": {
			"room_id": 123,
			"live_id": 456,
			"method": "WebcastChatMessage",
			"msg_id": 77,
			"user": {"id": 1001, "nickname": "观众"},
			"content": "你好呀朋友们"
		}
	});
	assert_eq!(next_json(&mut rx_a).await, expected);
	assert_eq!(next_json(&mut rx_b).await, expected);

	drop(feed);
	assert_eq!(next_json(&mut rx_a).await, status(123, 1, false));
	assert_eq!(next_json(&mut rx_b).await, status(123, 1, false));
	fx.wait_released(room(123)).await;
}

#[tokio::test]
async fn rejected_start_notifies_only_the_requester() {
	let fx = Fixture::new();
	let _feed = fx.feed();
	let (a, mut rx_a) = fx.gateway.subscribers().register();
	let (b, mut rx_b) = fx.gateway.subscribers().register();

	assert!(matches!(fx.gateway.start(a, room(123), live(456)), StartOutcome::Spawned(_)));
	assert_eq!(next_json(&mut rx_a).await, status(123, 0, true));
	assert_eq!(next_json(&mut rx_b).await, status(123, 0, true));

	assert!(matches!(fx.gateway.start(b, room(123), live(456)), StartOutcome::AlreadyActive));
	assert_eq!(next_json(&mut rx_b).await, status(123, 3, false));
	assert_quiet(&mut rx_a).await;
	assert!(fx.gateway.registry().is_active(room(123)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_spawn_exactly_one_session() {
	let fx = Fixture::new();
	let _feed = fx.feed();
	let (conn, mut rx) = fx.gateway.subscribers().register();

	let mut set = JoinSet::new();
	for _ in 0..16 {
		let gateway = fx.gateway.clone();
		set.spawn(async move { matches!(gateway.start(conn, room(9), live(10)), StartOutcome::Spawned(_)) });
	}

	let mut spawned = 0;
	while let Some(res) = set.join_next().await {
		if res.unwrap() {
			spawned += 1;
		}
	}
	assert_eq!(spawned, 1);

	let mut statuses = Vec::new();
	for _ in 0..16 {
		let v = next_json(&mut rx).await;
		statuses.push(v["data"]["status"].as_u64().unwrap());
	}
	statuses.sort_unstable();
	assert_eq!(statuses[0], 0);
	assert!(statuses[1..].iter().all(|s| *s == 3));
}

#[tokio::test]
async fn stop_replies_and_stops_only_the_addressed_room() {
	let fx = Fixture::new();
	let _feed_a = fx.feed();
	let _feed_b = fx.feed();
	let (conn, mut rx) = fx.gateway.subscribers().register();

	let reply = fx.gateway.stop(room(123));
	assert!(!reply.is_ok);
	assert_eq!(reply.message, "room 123 is not running");

	fx.gateway.start(conn, room(123), live(456));
	assert_eq!(next_json(&mut rx).await, status(123, 0, true));
	fx.gateway.start(conn, room(321), live(654));
	assert_eq!(next_json(&mut rx).await, status(321, 0, true));

	let reply = fx.gateway.stop(room(123));
	assert!(reply.is_ok);
	assert_eq!(reply.message, "stop requested for room 123");

	assert_eq!(next_json(&mut rx).await, status(123, 5, true));
	fx.wait_released(room(123)).await;
	assert!(fx.gateway.registry().is_active(room(321)));
	assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn setup_failure_broadcasts_closed_and_releases_room() {
	let fx = Fixture::with_resolver(Arc::new(FailingResolver));
	let (a, mut rx_a) = fx.gateway.subscribers().register();
	let (_b, mut rx_b) = fx.gateway.subscribers().register();

	fx.gateway.start(a, room(55), live(66));

	assert_eq!(next_json(&mut rx_a).await, status(55, 1, false));
	assert_eq!(next_json(&mut rx_b).await, status(55, 1, false));
	fx.wait_released(room(55)).await;

	assert!(matches!(fx.gateway.start(a, room(55), live(66)), StartOutcome::Spawned(_)));
}

#[tokio::test]
async fn ping_is_answered_to_the_sender_only() {
	let fx = Fixture::new();
	let (a, mut rx_a) = fx.gateway.subscribers().register();
	let (_b, mut rx_b) = fx.gateway.subscribers().register();

	fx.gateway.handle_client_text(a, "ping");
	fx.gateway.handle_client_text(a, r#"{"ping":1}"#);

	for _ in 0..2 {
		let msg = timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap().unwrap();
		assert_eq!(msg.as_ref(), "pong");
	}
	assert_quiet(&mut rx_b).await;
}

#[tokio::test]
async fn malformed_and_partial_messages_are_ignored() {
	let fx = Fixture::new();
	let (a, mut rx_a) = fx.gateway.subscribers().register();

	fx.gateway.handle_client_text(a, "{not json");
	fx.gateway.handle_client_text(a, r#"{"room_id":123}"#);
	fx.gateway.handle_client_text(a, r#"{"room_id":0,"live_id":456}"#);

	assert_quiet(&mut rx_a).await;
	assert!(fx.gateway.registry().is_empty());
}

#[tokio::test]
async fn disconnect_leaves_running_rooms_alone() {
	let fx = Fixture::new();
	let _feed = fx.feed();
	let (a, mut rx_a) = fx.gateway.subscribers().register();
	let (_b, mut rx_b) = fx.gateway.subscribers().register();

	fx.gateway.start(a, room(123), live(456));
	assert_eq!(next_json(&mut rx_a).await, status(123, 0, true));
	assert_eq!(next_json(&mut rx_b).await, status(123, 0, true));

	fx.gateway.subscribers().remove(a);
	drop(rx_a);

	assert_eq!(fx.gateway.subscribers().len(), 1);
	assert!(fx.gateway.registry().is_active(room(123)));

	assert!(fx.gateway.stop(room(123)).is_ok);
	assert_eq!(next_json(&mut rx_b).await, status(123, 5, true));
}
