#![forbid(unsafe_code)]

//! JSON messages exchanged with gateway clients.

use danmu_domain::{LiveId, LiveStatus, RoomId};
use danmu_platform::{LiveEvent, UserRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Parsed client message on the `/start` socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
	Start { room: RoomId, live: LiveId },
	Ping,
	/// Well-formed JSON that asks for nothing.
	Ignored,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("invalid json: {0}")]
	InvalidJson(#[from] serde_json::Error),

	#[error("missing room_id")]
	MissingRoomId,

	#[error("room_id must be a positive integer")]
	InvalidRoomId,
}

/// Parse one text frame from a client.
pub fn parse_inbound(text: &str) -> Result<Inbound, ProtocolError> {
	let text = text.trim();
	if text.eq_ignore_ascii_case(PING) {
		return Ok(Inbound::Ping);
	}

	let value: Value = serde_json::from_str(text)?;
	match &value {
		Value::String(s) if s.eq_ignore_ascii_case(PING) => return Ok(Inbound::Ping),
		Value::Object(map) if map.contains_key(PING) => return Ok(Inbound::Ping),
		Value::Object(_) => {}
		_ => return Ok(Inbound::Ignored),
	}

	let room = value.get("room_id").and_then(positive_id).and_then(|v| RoomId::new(v).ok());
	let live = value.get("live_id").and_then(positive_id).and_then(|v| LiveId::new(v).ok());

	Ok(match (room, live) {
		(Some(room), Some(live)) => Inbound::Start { room, live },
		_ => Inbound::Ignored,
	})
}

/// Accepts JSON numbers and numeric strings.
fn positive_id(v: &Value) -> Option<u64> {
	match v {
		Value::Number(n) => n.as_u64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
	.filter(|v| *v > 0)
}

#[derive(Debug, Deserialize)]
struct StopBody {
	room_id: Option<Value>,
}

/// `room_id` from a `/stop` query string.
pub fn stop_room_from_query(query: Option<&str>) -> Result<RoomId, ProtocolError> {
	let raw = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
		.find_map(|(k, v)| (k == "room_id").then_some(v))
		.ok_or(ProtocolError::MissingRoomId)?;
	raw.parse().map_err(|_| ProtocolError::InvalidRoomId)
}

/// `room_id` from a `/stop` JSON body.
pub fn stop_room_from_body(body: &[u8]) -> Result<RoomId, ProtocolError> {
	let body: StopBody = serde_json::from_slice(body)?;
	let raw = body.room_id.ok_or(ProtocolError::MissingRoomId)?;
	positive_id(&raw)
		.and_then(|v| RoomId::new(v).ok())
		.ok_or(ProtocolError::InvalidRoomId)
}

/// Reply to `/stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReply {
	pub is_ok: bool,
	pub message: String,
}

impl StopReply {
	pub fn ok(message: impl Into<String>) -> Self {
		Self {
			is_ok: true,
			message: message.into(),
		}
	}

	pub fn err(message: impl Into<String>) -> Self {
		Self {
			is_ok: false,
			message: message.into(),
		}
	}
}

#[derive(Serialize)]
struct Notice<T> {
	is_ok: bool,
	data: T,
}

#[derive(Serialize)]
struct StatusData {
	room_id: RoomId,
	status: LiveStatus,
}

#[derive(Serialize)]
struct ChatData<'a> {
	room_id: RoomId,
	live_id: LiveId,
	method: &'a str,
	msg_id: i64,
	user: &'a UserRef,
	content: &'a str,
}

/// Lifecycle notice: `{is_ok, data: {room_id, status}}`.
pub fn status_notice(room: RoomId, status: LiveStatus) -> Result<String, serde_json::Error> {
	serde_json::to_string(&Notice {
		is_ok: status.is_ok(),
		data: StatusData { room_id: room, status },
	})
}

/// Outbound JSON for a session event.
pub fn encode_event(event: &LiveEvent) -> Result<String, serde_json::Error> {
	match event {
		LiveEvent::Lifecycle(l) => status_notice(l.room, l.status),
		LiveEvent::Chat(c) => serde_json::to_string(&Notice {
			is_ok: true,
			data: ChatData {
				room_id: c.room,
				live_id: c.live_id,
				method: &c.method,
				msg_id: c.msg_id,
				user: &c.user,
				content: &c.content,
			},
		}),
	}
}
