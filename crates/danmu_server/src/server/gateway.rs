#![forbid(unsafe_code)]

use std::sync::Arc;

use danmu_domain::{LiveId, LiveStatus, RoomId};
use danmu_platform::douyin::{LiveSession, SessionDeps};
use danmu_platform::{EventHandler, LiveEvent, RoomRegistry, StopOutcome, lifecycle_error};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{Inbound, PONG, StopReply, encode_event, parse_inbound, status_notice};
use super::subscribers::{ConnId, Subscribers};

/// Result of a client start request.
#[derive(Debug)]
pub enum StartOutcome {
	/// A session task was spawned for the room.
	Spawned(JoinHandle<()>),
	/// The room already has a session; only the requester was told.
	AlreadyActive,
}

/// Drives the room registry on behalf of gateway clients and fans session
/// events out to all of them.
#[derive(Clone)]
pub struct Gateway {
	registry: RoomRegistry,
	subscribers: Subscribers,
	deps: SessionDeps,
}

impl Gateway {
	pub fn new(deps: SessionDeps, subscribers: Subscribers) -> Self {
		Self {
			registry: RoomRegistry::new(),
			subscribers,
			deps,
		}
	}

	pub fn registry(&self) -> &RoomRegistry {
		&self.registry
	}

	pub fn subscribers(&self) -> &Subscribers {
		&self.subscribers
	}

	/// Handle one text frame from client `conn`.
	pub fn handle_client_text(&self, conn: ConnId, text: &str) {
		match parse_inbound(text) {
			Ok(Inbound::Ping) => {
				self.subscribers.send_to(conn, PONG);
			}
			Ok(Inbound::Start { room, live }) => {
				self.start(conn, room, live);
			}
			Ok(Inbound::Ignored) => {
				debug!(conn_id = conn, "ignoring client message without room_id/live_id");
			}
			Err(e) => {
				warn!(conn_id = conn, error = %e, "invalid client message");
			}
		}
	}

	/// Claim `room` and spawn its session, or tell `conn` the room is busy.
	pub fn start(&self, conn: ConnId, room: RoomId, live: LiveId) -> StartOutcome {
		let Some(lease) = self.registry.try_start(room) else {
			info!(conn_id = conn, %room, "room already active");
			if let Ok(notice) = status_notice(room, LiveStatus::AlreadyActive) {
				self.subscribers.send_to(conn, notice);
			}
			return StartOutcome::AlreadyActive;
		};

		metrics::counter!("danmu_sessions_started_total").increment(1);
		info!(conn_id = conn, %room, %live, "starting room session");

		let gateway = self.clone();
		StartOutcome::Spawned(tokio::spawn(async move {
			match LiveSession::connect(room, &gateway.deps).await {
				Ok(mut session) => {
					session.subscribe_shared(gateway.fanout_handler());
					let reason = session.start(lease, live).await;
					debug!(%room, reason = reason.detail(), "room session task finished");
				}
				Err(e) => {
					warn!(%room, error = %e, "room session setup failed");
					lease.release();
					gateway.publish(&lifecycle_error(room, LiveStatus::Closed, "room lookup failed", &e));
				}
			}
		}))
	}

	/// Ask the session for `room` to stop. Does not wait for it.
	pub fn stop(&self, room: RoomId) -> StopReply {
		match self.registry.request_stop(room) {
			StopOutcome::Accepted => {
				info!(%room, "stop requested");
				StopReply::ok(format!("stop requested for room {room}"))
			}
			StopOutcome::NotRunning => StopReply::err(format!("room {room} is not running")),
		}
	}

	/// Broadcast a session event to every client.
	pub fn publish(&self, event: &LiveEvent) {
		match encode_event(event) {
			Ok(json) => {
				self.subscribers.broadcast(json);
			}
			Err(e) => warn!(room = %event.room(), error = %e, "failed to encode gateway event"),
		}
	}

	fn fanout_handler(&self) -> EventHandler {
		let gateway = self.clone();
		Arc::new(move |event: &LiveEvent| gateway.publish(event))
	}
}
