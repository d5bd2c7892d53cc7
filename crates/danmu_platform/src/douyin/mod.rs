#![forbid(unsafe_code)]

mod client;
mod dispatch;
mod push_url;
mod session;
mod signer;
mod transport;


use std::sync::Arc;
use std::time::Duration;

pub use client::{DouyinResolver, RoomInfo, RoomResolver, generate_ms_token, random_user_agent};
pub use push_url::{PushUrlParams, browser_version, build_push_url, unix_ms_now};
pub use session::{CloseReason, LiveSession, SessionError, SessionState};
pub use signer::{CommandSigner, SignError, Signer, StaticSigner, sign_params};
pub use transport::{BoxFuture, PushConnector, PushRequest, PushTransport, WsTransport};

use crate::{ChatFilter, SharedCommentSink};

pub const DEFAULT_LIVE_BASE_URL: &str = "https://live.douyin.com/";
pub const DEFAULT_PUSH_BASE_URL: &str = "wss://webcast5-ws-web-lf.douyin.com/webcast/im/push/v2/";

/// Reconnect policy for session-fatal transport failures.
///
/// `max_attempts == 0` disables reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub min_delay: Duration,
	pub max_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::disabled()
	}
}

impl RetryPolicy {
	pub const fn disabled() -> Self {
		Self {
			max_attempts: 0,
			min_delay: Duration::from_millis(500),
			max_delay: Duration::from_secs(30),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.max_attempts > 0
	}

	/// Delay before retry number `attempt` (1-based), or `None` when exhausted.
	pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
		if attempt == 0 || attempt > self.max_attempts {
			return None;
		}
		Some(backoff_delay(attempt - 1, self.min_delay, self.max_delay))
	}
}

pub(crate) fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	d.min(max).max(min)
}

/// Douyin ingest configuration.
#[derive(Clone)]
pub struct DouyinConfig {
	pub live_base_url: String,
	pub push_base_url: String,
	/// Fixed user agent; a random desktop browser one is picked per session when unset.
	pub user_agent: Option<String>,
	pub retry: RetryPolicy,
	/// Log unrecognized sub-messages with their raw payload.
	pub log_unknown_methods: bool,
	pub filter: ChatFilter,
	pub ws_connector: Option<PushConnector>,
}

impl Default for DouyinConfig {
	fn default() -> Self {
		Self {
			live_base_url: DEFAULT_LIVE_BASE_URL.to_string(),
			push_base_url: DEFAULT_PUSH_BASE_URL.to_string(),
			user_agent: None,
			retry: RetryPolicy::disabled(),
			log_unknown_methods: false,
			filter: ChatFilter::default(),
			ws_connector: None,
		}
	}
}

/// Collaborators shared by every session the gateway starts.
#[derive(Clone)]
pub struct SessionDeps {
	pub config: DouyinConfig,
	pub resolver: Arc<dyn RoomResolver>,
	pub signer: Arc<dyn Signer>,
	pub sink: SharedCommentSink,
}

impl SessionDeps {
	pub fn new(
		config: DouyinConfig,
		resolver: Arc<dyn RoomResolver>,
		signer: Arc<dyn Signer>,
		sink: SharedCommentSink,
	) -> Self {
		Self {
			config,
			resolver,
			signer,
			sink,
		}
	}

	pub(crate) fn connector(&self) -> PushConnector {
		if let Some(c) = &self.config.ws_connector {
			return c.clone();
		}

		Arc::new(|req: PushRequest| {
			Box::pin(async move {
				let ws = WsTransport::connect(req).await?;
				Ok(Box::new(ws) as Box<dyn PushTransport>)
			}) as BoxFuture<'static, anyhow::Result<Box<dyn PushTransport>>>
		})
	}
}
