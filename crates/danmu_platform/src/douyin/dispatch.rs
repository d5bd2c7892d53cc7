#![forbid(unsafe_code)]

use std::time::SystemTime;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use danmu_domain::{Comment, LiveId, RoomId};
use danmu_protocol::pb::Message;
use danmu_protocol::{CONTROL_STATUS_LIVE_ENDED, Method, decode_chat, decode_control};
use tracing::{debug, info, trace, warn};

use crate::{ChatEvent, ChatFilter, EventBus, LiveEvent, SharedCommentSink, UserRef};

/// What the session should do after a sub-message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
	Continue,
	/// Control message reported the broadcast as over.
	LiveEnded,
}

/// Routes decoded sub-messages of one session.
pub(crate) struct Dispatcher<'a> {
	pub room: RoomId,
	pub live_id: LiveId,
	pub bus: &'a EventBus,
	pub filter: &'a ChatFilter,
	pub sink: &'a SharedCommentSink,
	pub log_unknown: bool,
}

impl Dispatcher<'_> {
	pub fn dispatch(&self, msg: &Message) -> Dispatch {
		match Method::parse(&msg.method) {
			Method::Chat => {
				self.on_chat(msg);
				Dispatch::Continue
			}
			Method::Control => self.on_control(msg),
			Method::Unrecognized(name) => {
				if self.log_unknown {
					info!(
						room = %self.room,
						method = %name,
						payload = %BASE64_STANDARD.encode(&msg.payload),
						"unrecognized douyin message"
					);
				}
				Dispatch::Continue
			}
			other => {
				trace!(room = %self.room, method = %other, "ignoring douyin message");
				Dispatch::Continue
			}
		}
	}

	fn on_chat(&self, msg: &Message) {
		let chat = match decode_chat(&msg.payload) {
			Ok(c) => c,
			Err(e) => {
				warn!(room = %self.room, msg_id = msg.msg_id, error = %e, "failed to decode chat message");
				metrics::counter!("danmu_decode_errors_total", "stage" => "chat").increment(1);
				return;
			}
		};

		let user = chat
			.user
			.map(|u| UserRef {
				id: u.id,
				nickname: u.nick_name,
			})
			.unwrap_or_default();

		let content = chat.content;
		let filtered = self.filter.filter(&content);

		self.bus.publish(&LiveEvent::Chat(ChatEvent {
			room: self.room,
			live_id: self.live_id,
			method: msg.method.clone(),
			msg_id: msg.msg_id,
			user,
			content,
			ingest_time: SystemTime::now(),
		}));
		metrics::counter!("danmu_chat_messages_total").increment(1);

		if filtered.is_empty() {
			return;
		}
		self.sink.insert_comment(Comment::new(self.live_id, filtered));
		metrics::counter!("danmu_comments_persisted_total").increment(1);
	}

	fn on_control(&self, msg: &Message) -> Dispatch {
		match decode_control(&msg.payload) {
			Ok(ctrl) if ctrl.status == CONTROL_STATUS_LIVE_ENDED => {
				info!(room = %self.room, "douyin reports live ended");
				Dispatch::LiveEnded
			}
			Ok(ctrl) => {
				debug!(room = %self.room, status = ctrl.status, "douyin control message");
				Dispatch::Continue
			}
			Err(e) => {
				warn!(room = %self.room, error = %e, "failed to decode control message");
				metrics::counter!("danmu_decode_errors_total", "stage" => "control").increment(1);
				Dispatch::Continue
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use danmu_protocol::pb::{ChatMessage, ControlMessage, User};
	use prost::Message as _;

	use super::*;
	use crate::CommentSink;

	#[derive(Default)]
	struct VecSink(Mutex<Vec<Comment>>);

	impl CommentSink for VecSink {
		fn insert_comment(&self, comment: Comment) {
			self.0.lock().unwrap().push(comment);
		}
	}

	fn chat(content: &str) -> Message {
		Message {
			method: "WebcastChatMessage".into(),
			payload: ChatMessage {
				common: None,
				user: Some(User {
					id: 77,
					nick_name: "viewer".into(),
					..Default::default()
				}),
				content: content.into(),
			}
			.encode_to_vec(),
			msg_id: 5,
			..Default::default()
		}
	}

	struct Harness {
		bus: EventBus,
		events: Arc<Mutex<Vec<LiveEvent>>>,
		sink: Arc<VecSink>,
		shared: SharedCommentSink,
		filter: ChatFilter,
	}

	impl Harness {
		fn new() -> Self {
			let events = Arc::new(Mutex::new(Vec::new()));
			let mut bus = EventBus::new();
			let seen = Arc::clone(&events);
			bus.subscribe(move |ev| seen.lock().unwrap().push(ev.clone()));
			let sink = Arc::new(VecSink::default());
			Self {
				bus,
				events,
				shared: sink.clone(),
				sink,
				filter: ChatFilter::default(),
			}
		}

		fn dispatcher(&self) -> Dispatcher<'_> {
			Dispatcher {
				room: RoomId::new(1).unwrap(),
				live_id: LiveId::new(2).unwrap(),
				bus: &self.bus,
				filter: &self.filter,
				sink: &self.shared,
				log_unknown: true,
			}
		}
	}

	#[test]
	fn chat_is_published_raw_and_persisted_filtered() {
		let h = Harness::new();
		let out = h.dispatcher().dispatch(&chat("[微笑]今天的直播真好看啊"));
		assert_eq!(out, Dispatch::Continue);

		let events = h.events.lock().unwrap();
		let LiveEvent::Chat(ev) = &events[0] else {
			panic!("expected chat event");
		};
		assert_eq!(ev.content, "[微笑]今天的直播真好看啊");
		assert_eq!(ev.user.id, 77);
		assert_eq!(ev.user.nickname, "viewer");
		assert_eq!(ev.msg_id, 5);

		let comments = h.sink.0.lock().unwrap();
		assert_eq!(comments.len(), 1);
		assert_eq!(comments[0].content, "今天的直播真好看啊");
		assert_eq!(comments[0].live_id.get(), 2);
	}

	#[test]
	fn rejected_chat_is_published_but_not_persisted() {
		let h = Harness::new();
		h.dispatcher().dispatch(&chat("hello"));
		assert_eq!(h.events.lock().unwrap().len(), 1);
		assert!(h.sink.0.lock().unwrap().is_empty());
	}

	#[test]
	fn undecodable_chat_is_skipped() {
		let h = Harness::new();
		let msg = Message {
			method: "WebcastChatMessage".into(),
			payload: vec![0xff, 0xff, 0xff],
			..Default::default()
		};
		assert_eq!(h.dispatcher().dispatch(&msg), Dispatch::Continue);
		assert!(h.events.lock().unwrap().is_empty());
	}

	#[test]
	fn control_end_status_ends_live() {
		let h = Harness::new();
		let end = Message {
			method: "WebcastControlMessage".into(),
			payload: ControlMessage { common: None, status: 3 }.encode_to_vec(),
			..Default::default()
		};
		let other = Message {
			method: "WebcastControlMessage".into(),
			payload: ControlMessage { common: None, status: 1 }.encode_to_vec(),
			..Default::default()
		};
		assert_eq!(h.dispatcher().dispatch(&end), Dispatch::LiveEnded);
		assert_eq!(h.dispatcher().dispatch(&other), Dispatch::Continue);
	}

	#[test]
	fn other_methods_are_ignored() {
		let h = Harness::new();
		for method in ["WebcastGiftMessage", "WebcastLikeMessage", "WebcastSomethingNew"] {
			let msg = Message {
				method: method.into(),
				payload: vec![1, 2, 3],
				..Default::default()
			};
			assert_eq!(h.dispatcher().dispatch(&msg), Dispatch::Continue);
		}
		assert!(h.events.lock().unwrap().is_empty());
		assert!(h.sink.0.lock().unwrap().is_empty());
	}
}
