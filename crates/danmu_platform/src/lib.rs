#![forbid(unsafe_code)]

pub mod bus;
pub mod douyin;
pub mod filter;
pub mod registry;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use danmu_domain::{Comment, LiveId, LiveStatus, RoomId};
use serde::Serialize;
use uuid::Uuid;

pub use bus::{EventBus, EventHandler};
pub use filter::ChatFilter;
pub use registry::{RoomLease, RoomRegistry, StopOutcome};

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Session → subscriber event.
#[derive(Debug, Clone)]
pub enum LiveEvent {
	/// Decoded chat sub-message (unfiltered).
	Chat(ChatEvent),

	/// Session lifecycle change.
	Lifecycle(LifecycleEvent),
}

impl LiveEvent {
	pub fn room(&self) -> RoomId {
		match self {
			LiveEvent::Chat(c) => c.room,
			LiveEvent::Lifecycle(l) => l.room,
		}
	}
}

/// Decoded chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEvent {
	pub room: RoomId,
	pub live_id: LiveId,

	/// Wire method name of the sub-message.
	pub method: String,

	/// Platform message id, zero when absent.
	pub msg_id: i64,

	pub user: UserRef,

	pub content: String,

	/// Server receipt timestamp.
	#[serde(skip)]
	pub ingest_time: SystemTime,
}

/// Chat author.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserRef {
	pub id: u64,
	pub nickname: String,
}

/// Session lifecycle event.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
	pub room: RoomId,
	pub status: LiveStatus,
	pub detail: String,
	pub last_error: Option<String>,
	pub time: SystemTime,
}

/// Build a lifecycle event.
pub fn lifecycle(room: RoomId, status: LiveStatus, detail: impl Into<String>) -> LiveEvent {
	LiveEvent::Lifecycle(LifecycleEvent {
		room,
		status,
		detail: detail.into(),
		last_error: None,
		time: SystemTime::now(),
	})
}

/// Build a lifecycle event carrying the error that caused it.
pub fn lifecycle_error(room: RoomId, status: LiveStatus, detail: impl Into<String>, err: impl fmt::Display) -> LiveEvent {
	LiveEvent::Lifecycle(LifecycleEvent {
		room,
		status,
		detail: detail.into(),
		last_error: Some(err.to_string()),
		time: SystemTime::now(),
	})
}

/// Destination for filtered chat text.
///
/// Implementations must not block; the session calls this inline.
pub trait CommentSink: Send + Sync + 'static {
	fn insert_comment(&self, comment: Comment);
}

/// Sink that drops every comment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCommentSink;

impl CommentSink for NullCommentSink {
	fn insert_comment(&self, _comment: Comment) {}
}

pub type SharedCommentSink = Arc<dyn CommentSink>;

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}
