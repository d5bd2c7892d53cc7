#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace};

use crate::SecretString;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub(crate) type PushWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub type PushConnector = Arc<dyn Fn(PushRequest) -> BoxFuture<'static, anyhow::Result<Box<dyn PushTransport>>> + Send + Sync>;

/// Dial parameters for one push connection attempt.
#[derive(Debug, Clone)]
pub struct PushRequest {
	pub url: String,
	pub user_agent: String,
	pub ttwid: SecretString,
}

/// Binary duplex channel to the push server.
#[async_trait::async_trait]
pub trait PushTransport: Send + 'static {
	/// Next binary frame; `None` once the remote has closed.
	async fn next_frame(&mut self) -> Option<anyhow::Result<Bytes>>;

	async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()>;

	async fn close(&mut self) -> anyhow::Result<()>;
}

/// Websocket transport over `tokio-tungstenite`.
pub struct WsTransport {
	ws: PushWs,
}

impl WsTransport {
	pub async fn connect(req: PushRequest) -> anyhow::Result<Self> {
		let mut request = req.url.as_str().into_client_request().context("build push request")?;
		let headers = request.headers_mut();
		headers.insert(
			USER_AGENT,
			HeaderValue::from_str(&req.user_agent).context("user-agent header")?,
		);
		headers.insert(
			COOKIE,
			HeaderValue::from_str(&format!("ttwid={}", req.ttwid.expose())).context("cookie header")?,
		);

		let (ws, resp) = tokio_tungstenite::connect_async(request)
			.await
			.context("connect_async to push server")?;
		debug!(status = %resp.status(), "push socket handshake complete");
		Ok(Self { ws })
	}
}

#[async_trait::async_trait]
impl PushTransport for WsTransport {
	async fn next_frame(&mut self) -> Option<anyhow::Result<Bytes>> {
		loop {
			let msg = match self.ws.next().await? {
				Ok(m) => m,
				Err(e) => return Some(Err(anyhow::Error::new(e).context("push socket read"))),
			};

			match msg {
				Message::Binary(b) => return Some(Ok(b)),
				Message::Ping(p) => {
					if let Err(e) = self.ws.send(Message::Pong(p)).await {
						debug!(error = %e, "push socket pong failed");
					}
				}
				Message::Close(frame) => {
					debug!(?frame, "push socket closed by remote");
					return None;
				}
				Message::Text(t) => {
					trace!(len = t.len(), "ignoring text frame on push socket");
				}
				Message::Pong(_) | Message::Frame(_) => {}
			}
		}
	}

	async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()> {
		self.ws
			.send(Message::Binary(data.into()))
			.await
			.context("push socket write")
	}

	async fn close(&mut self) -> anyhow::Result<()> {
		self.ws.close(None).await.context("push socket close")
	}
}
