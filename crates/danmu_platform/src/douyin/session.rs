#![forbid(unsafe_code)]

use std::fmt;

use danmu_domain::{LiveId, LiveStatus, RoomId};
use danmu_protocol::{Inflater, build_ack, decode_batch, decode_envelope, encode_envelope};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::dispatch::{Dispatch, Dispatcher};
use super::push_url::{PushUrlParams, build_push_url, unix_ms_now};
use super::{PushConnector, PushRequest, PushTransport, RoomInfo, SessionDeps};
use crate::{EventBus, EventHandler, LiveEvent, RoomLease, lifecycle, lifecycle_error, new_session_id};

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("failed to resolve room {room}: {source}")]
	Resolve {
		room: RoomId,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync + 'static>,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Created,
	Dialing,
	Active,
	Closing,
	Closed,
}

impl SessionState {
	pub fn as_str(&self) -> &'static str {
		match self {
			SessionState::Created => "created",
			SessionState::Dialing => "dialing",
			SessionState::Active => "active",
			SessionState::Closing => "closing",
			SessionState::Closed => "closed",
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
	StopRequested,
	/// Control message reported the broadcast as over.
	RemoteEnded,
	RemoteClosed,
	ReadFailed(String),
	DialFailed(String),
	SignFailed(String),
}

impl CloseReason {
	/// Lifecycle status published for this reason.
	pub fn status(&self) -> LiveStatus {
		match self {
			CloseReason::StopRequested => LiveStatus::StoppedByPeer,
			_ => LiveStatus::Closed,
		}
	}

	pub fn detail(&self) -> &'static str {
		match self {
			CloseReason::StopRequested => "stopped by request",
			CloseReason::RemoteEnded => "live ended",
			CloseReason::RemoteClosed => "push connection closed by remote",
			CloseReason::ReadFailed(_) => "push connection read failed",
			CloseReason::DialFailed(_) => "push connection failed",
			CloseReason::SignFailed(_) => "signature generation failed",
		}
	}

	pub fn error(&self) -> Option<&str> {
		match self {
			CloseReason::ReadFailed(e) | CloseReason::DialFailed(e) | CloseReason::SignFailed(e) => Some(e),
			_ => None,
		}
	}

	/// Only transport failures are retried.
	fn is_retryable(&self) -> bool {
		matches!(self, CloseReason::DialFailed(_) | CloseReason::ReadFailed(_))
	}
}

/// One push connection to one room.
///
/// Built by [`LiveSession::connect`] and consumed by [`LiveSession::start`];
/// sessions are single-use.
pub struct LiveSession {
	room: RoomId,
	info: RoomInfo,
	bus: EventBus,
	deps: SessionDeps,
	session_id: String,
}

impl fmt::Debug for LiveSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LiveSession")
			.field("room", &self.room)
			.field("info", &self.info)
			.field("bus", &self.bus)
			.field("session_id", &self.session_id)
			.finish()
	}
}

impl LiveSession {
	/// Fetch the cookie and room metadata. No push connection is opened yet.
	pub async fn connect(room: RoomId, deps: &SessionDeps) -> Result<Self, SessionError> {
		let info = deps.resolver.resolve(room).await.map_err(|e| SessionError::Resolve {
			room,
			source: e.into(),
		})?;

		let session_id = new_session_id();
		debug!(%room, %session_id, push_room_id = %info.push_room_id, "douyin session created");

		Ok(Self {
			room,
			info,
			bus: EventBus::new(),
			deps: deps.clone(),
			session_id,
		})
	}

	pub fn subscribe<F>(&mut self, handler: F)
	where
		F: Fn(&LiveEvent) + Send + Sync + 'static,
	{
		self.bus.subscribe(handler);
	}

	pub fn subscribe_shared(&mut self, handler: EventHandler) {
		self.bus.subscribe_shared(handler);
	}

	/// Run the session until it stops, then release `lease` and publish one
	/// closing lifecycle event.
	pub async fn start(self, mut lease: RoomLease, live_id: LiveId) -> CloseReason {
		let span = info_span!("douyin_session", room = %self.room, %live_id, session_id = %self.session_id);

		async move {
			let mut state = SessionState::Created;
			let mut inflater = Inflater::new();
			let mut transport: Option<Box<dyn PushTransport>> = None;

			let reason = self
				.run(&mut lease, live_id, &mut state, &mut transport, &mut inflater)
				.await;

			self.advance(&mut state, SessionState::Closing);
			inflater.discard();
			if let Some(mut t) = transport.take()
				&& let Err(e) = t.close().await
			{
				debug!(error = %e, "push transport close failed");
			}
			lease.release();

			let event = match reason.error() {
				Some(err) => lifecycle_error(self.room, reason.status(), reason.detail(), err),
				None => lifecycle(self.room, reason.status(), reason.detail()),
			};
			self.bus.publish(&event);
			self.advance(&mut state, SessionState::Closed);

			info!(reason = reason.detail(), error = ?reason.error(), "douyin session closed");
			reason
		}
		.instrument(span)
		.await
	}

	async fn run(
		&self,
		lease: &mut RoomLease,
		live_id: LiveId,
		state: &mut SessionState,
		transport: &mut Option<Box<dyn PushTransport>>,
		inflater: &mut Inflater,
	) -> CloseReason {
		let connector = self.deps.connector();
		let retry = self.deps.config.retry;
		let dispatcher = Dispatcher {
			room: self.room,
			live_id,
			bus: &self.bus,
			filter: &self.deps.config.filter,
			sink: &self.deps.sink,
			log_unknown: self.deps.config.log_unknown_methods,
		};

		let mut attempt: u32 = 0;
		let mut started = false;

		'outer: loop {
			self.advance(state, SessionState::Dialing);

			let dialed = tokio::select! {
				biased;
				_ = lease.stopped() => break 'outer CloseReason::StopRequested,
				r = self.dial(&connector) => r,
			};

			let failure = match dialed {
				Ok(t) => {
					attempt = 0;
					let t = transport.insert(t);
					self.advance(state, SessionState::Active);
					if !started {
						started = true;
						info!("douyin push connection established");
						self.bus.publish(&lifecycle(self.room, LiveStatus::Started, "connected"));
					}

					loop {
						let frame = tokio::select! {
							biased;
							_ = lease.stopped() => break 'outer CloseReason::StopRequested,
							f = t.next_frame() => f,
						};

						let bytes = match frame {
							Some(Ok(b)) => b,
							Some(Err(e)) => break CloseReason::ReadFailed(format!("{e:#}")),
							None => break CloseReason::RemoteClosed,
						};

						if self.handle_frame(t.as_mut(), &bytes, inflater, &dispatcher).await == Dispatch::LiveEnded {
							break 'outer CloseReason::RemoteEnded;
						}
					}
				}
				Err(reason) => reason,
			};

			if !failure.is_retryable() {
				break failure;
			}
			attempt = attempt.saturating_add(1);
			let Some(delay) = retry.delay_for(attempt) else {
				break failure;
			};

			warn!(
				reason = failure.detail(),
				error = ?failure.error(),
				attempt,
				?delay,
				"douyin push connection lost; reconnecting"
			);
			inflater.discard();
			if let Some(mut old) = transport.take()
				&& let Err(e) = old.close().await
			{
				debug!(error = %e, "push transport close failed");
			}

			tokio::select! {
				biased;
				_ = lease.stopped() => break 'outer CloseReason::StopRequested,
				_ = sleep(delay) => {}
			}
		}
	}

	async fn dial(&self, connector: &PushConnector) -> Result<Box<dyn PushTransport>, CloseReason> {
		let signature = self
			.deps
			.signer
			.sign(&self.info.push_room_id, &self.info.push_id)
			.await
			.map_err(|e| {
				warn!(error = %e, "push url signing failed");
				CloseReason::SignFailed(e.to_string())
			})?;

		let url = build_push_url(
			&self.deps.config.push_base_url,
			&PushUrlParams {
				push_room_id: &self.info.push_room_id,
				push_id: &self.info.push_id,
				user_agent: &self.info.user_agent,
				signature: &signature,
				now_ms: unix_ms_now(),
			},
		);

		let req = PushRequest {
			url,
			user_agent: self.info.user_agent.clone(),
			ttwid: self.info.ttwid.clone(),
		};

		connector(req).await.map_err(|e| {
			warn!(error = %format!("{e:#}"), "push connection failed");
			CloseReason::DialFailed(format!("{e:#}"))
		})
	}

	async fn handle_frame(
		&self,
		transport: &mut dyn PushTransport,
		bytes: &[u8],
		inflater: &mut Inflater,
		dispatcher: &Dispatcher<'_>,
	) -> Dispatch {
		metrics::counter!("danmu_push_frames_total").increment(1);

		let frame = match decode_envelope(bytes) {
			Ok(f) => f,
			Err(e) => {
				warn!(error = %e, len = bytes.len(), "dropping malformed push frame");
				metrics::counter!("danmu_decode_errors_total", "stage" => "envelope").increment(1);
				return Dispatch::Continue;
			}
		};

		let response = match decode_batch(&frame, inflater) {
			Ok(Some(r)) => r,
			Ok(None) => {
				trace!(payload_type = %frame.payload_type, "ignoring non-msg push frame");
				return Dispatch::Continue;
			}
			Err(e) => {
				warn!(error = %e, log_id = frame.log_id, "dropping undecodable push batch");
				metrics::counter!("danmu_decode_errors_total", "stage" => "batch").increment(1);
				return Dispatch::Continue;
			}
		};

		if response.need_ack {
			let ack = encode_envelope(&build_ack(&frame, &response));
			if let Err(e) = transport.send_binary(ack).await {
				warn!(error = %format!("{e:#}"), log_id = frame.log_id, "ack send failed; skipping batch");
				metrics::counter!("danmu_ack_failures_total").increment(1);
				return Dispatch::Continue;
			}
			metrics::counter!("danmu_acks_sent_total").increment(1);
		}

		let mut outcome = Dispatch::Continue;
		for msg in &response.messages_list {
			if dispatcher.dispatch(msg) == Dispatch::LiveEnded {
				outcome = Dispatch::LiveEnded;
			}
		}
		outcome
	}

	fn advance(&self, state: &mut SessionState, next: SessionState) {
		if *state != next {
			debug!(from = %state, to = %next, "session state");
			*state = next;
		}
	}
}
