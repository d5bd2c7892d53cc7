#![forbid(unsafe_code)]

//! Gateway HTTP surface: the `/start` WebSocket and the `/stop` endpoint.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, info, warn};

use super::gateway::Gateway;
use super::protocol::{StopReply, stop_room_from_body, stop_room_from_query};

/// Largest accepted `/stop` request body.
const MAX_STOP_BODY_BYTES: usize = 4 * 1024;

pub(crate) fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body));
	*resp.status_mut() = status;
	resp
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
	match serde_json::to_vec(value) {
		Ok(body) => {
			let mut resp = respond(status, Bytes::from(body));
			resp.headers_mut()
				.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
			resp
		}
		Err(e) => {
			warn!(error = %e, "failed to encode json response");
			respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
		}
	}
}

/// Accept gateway connections until the listener fails for good.
pub async fn serve(listener: TcpListener, gateway: Gateway) -> anyhow::Result<()> {
	if let Ok(addr) = listener.local_addr() {
		info!(%addr, "gateway listening");
	}

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(v) => v,
			Err(e) => {
				warn!(error = %e, "gateway accept failed");
				tokio::time::sleep(Duration::from_millis(50)).await;
				continue;
			}
		};

		metrics::counter!("danmu_gateway_connections_total").increment(1);
		let io = TokioIo::new(stream);
		let gateway = gateway.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_request(req, gateway.clone()));
			if let Err(err) = http1::Builder::new()
				.serve_connection(io, service)
				.with_upgrades()
				.await
			{
				debug!(%remote, error = %err, "gateway connection error");
			}
		});
	}
}

async fn handle_request(req: Request<Incoming>, gateway: Gateway) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let path = req.uri().path().to_string();
	Ok(match (req.method().clone(), path.as_str()) {
		(Method::GET, "/start") => upgrade_client(req, gateway),
		(Method::GET, "/stop") => {
			let reply = stop_room_from_query(req.uri().query()).map(|room| gateway.stop(room));
			stop_response(reply)
		}
		(Method::POST, "/stop") => {
			let body = match Limited::new(req.into_body(), MAX_STOP_BODY_BYTES).collect().await {
				Ok(collected) => collected.to_bytes(),
				Err(err) => {
					debug!(error = %err, "stop body read failed");
					return Ok(json_response(StatusCode::BAD_REQUEST, &StopReply::err("unreadable request body")));
				}
			};
			let reply = stop_room_from_body(&body).map(|room| gateway.stop(room));
			stop_response(reply)
		}
		(_, "/start") | (_, "/stop") => respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()),
		_ => respond(StatusCode::NOT_FOUND, Bytes::new()),
	})
}

fn stop_response(reply: Result<StopReply, super::protocol::ProtocolError>) -> Response<Full<Bytes>> {
	match reply {
		Ok(reply) => json_response(StatusCode::OK, &reply),
		Err(e) => json_response(StatusCode::BAD_REQUEST, &StopReply::err(e.to_string())),
	}
}

fn header_has_token(req: &Request<Incoming>, name: header::HeaderName, token: &str) -> bool {
	req.headers()
		.get_all(name)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(','))
		.any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn upgrade_client(mut req: Request<Incoming>, gateway: Gateway) -> Response<Full<Bytes>> {
	let is_upgrade =
		header_has_token(&req, header::CONNECTION, "upgrade") && header_has_token(&req, header::UPGRADE, "websocket");
	let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY).filter(|_| is_upgrade) else {
		return respond(StatusCode::BAD_REQUEST, Bytes::from_static(b"expected websocket upgrade"));
	};

	let accept = match HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
		Ok(v) => v,
		Err(e) => {
			warn!(error = %e, "invalid websocket accept key");
			return respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new());
		}
	};

	let on_upgrade = hyper::upgrade::on(&mut req);
	tokio::spawn(async move {
		match on_upgrade.await {
			Ok(upgraded) => {
				let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
				serve_client(ws, gateway).await;
			}
			Err(e) => warn!(error = %e, "websocket upgrade failed"),
		}
	});

	let mut resp = respond(StatusCode::SWITCHING_PROTOCOLS, Bytes::new());
	let headers = resp.headers_mut();
	headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
	headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
	headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
	resp
}

/// Run one gateway client until it disconnects.
///
/// Outbound frames come from the client's subscriber queue on a separate
/// writer task; inbound text frames go to [`Gateway::handle_client_text`].
pub async fn serve_client<S>(ws: WebSocketStream<S>, gateway: Gateway)
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let (conn, mut outbox) = gateway.subscribers().register();
	info!(conn_id = conn, "gateway client connected");

	let (mut sink, mut stream) = ws.split();
	let writer = tokio::spawn(async move {
		while let Some(msg) = outbox.recv().await {
			if let Err(e) = sink.send(Message::text(msg.to_string())).await {
				debug!(conn_id = conn, error = %e, "gateway client write failed");
				break;
			}
		}
		let _ = sink.close().await;
	});

	while let Some(frame) = stream.next().await {
		match frame {
			Ok(Message::Text(text)) => gateway.handle_client_text(conn, text.as_str()),
			Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
				Ok(text) => gateway.handle_client_text(conn, text),
				Err(_) => debug!(conn_id = conn, len = data.len(), "ignoring non-utf8 binary frame"),
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(e) => {
				debug!(conn_id = conn, error = %e, "gateway client read failed");
				break;
			}
		}
	}

	gateway.subscribers().remove(conn);
	writer.abort();
	info!(conn_id = conn, "gateway client disconnected");
}
