#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::warn;

use super::gateway::Gateway;
use super::http::{json_response, respond};

#[derive(Clone)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	gateway: Gateway,
}

#[derive(Serialize)]
struct Readiness {
	ready: bool,
	active_rooms: usize,
	clients: usize,
}

impl HealthState {
	pub fn new(gateway: Gateway) -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
			gateway,
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}

	fn readiness(&self) -> Readiness {
		Readiness {
			ready: self.is_ready(),
			active_rooms: self.gateway.registry().len(),
			clients: self.gateway.subscribers().len(),
		}
	}
}

pub fn spawn_health_server(listener: TcpListener, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(listener, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

pub async fn bind_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<SocketAddr> {
	let listener = TcpListener::bind(bind).await?;
	let addr = listener.local_addr()?;
	spawn_health_server(listener, state);
	Ok(addr)
}

async fn run_health_server(listener: TcpListener, state: HealthState) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}

	Ok(match req.uri().path() {
		"/healthz" => respond(StatusCode::OK, Bytes::from_static(b"ok")),
		"/readyz" => {
			let readiness = state.readiness();
			let status = if readiness.ready {
				StatusCode::OK
			} else {
				StatusCode::SERVICE_UNAVAILABLE
			};
			json_response(status, &readiness)
		}
		_ => respond(StatusCode::NOT_FOUND, Bytes::new()),
	})
}
