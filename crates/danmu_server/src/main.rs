#![forbid(unsafe_code)]

mod config;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use danmu_platform::douyin::{CommandSigner, DouyinResolver, SessionDeps, Signer, StaticSigner};
use danmu_platform::{NullCommentSink, SharedCommentSink};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{DEFAULT_BIND, ServerConfig};
use crate::server::comments::CommentStore;
use crate::server::gateway::Gateway;
use crate::server::health::{HealthState, bind_health_server};
use crate::server::subscribers::Subscribers;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: danmu_server [--bind host:port] [--config path] [--unknown]\n\
\n\
Options:\n\
\t--bind     Gateway bind address (default: {DEFAULT_BIND})\n\
\t--config   Config file (default: ~/.danmu/config.toml)\n\
\t--unknown  Log unrecognized push messages with their payload\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	bind: Option<SocketAddr>,
	config: Option<PathBuf>,
	log_unknown: bool,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let addr = v.trim().parse::<SocketAddr>().unwrap_or_else(|e| {
					eprintln!("--bind: {e} (expected host:port)");
					usage_and_exit();
				});
				args.bind = Some(addr);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			"--unknown" => args.log_unknown = true,
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,danmu_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("danmu_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn build_signer(cfg: &ServerConfig) -> Arc<dyn Signer> {
	if let Some(command) = cfg.signer.command.clone() {
		info!(program = %command.display(), "using external signer");
		let mut signer = CommandSigner::new(command, cfg.signer.args.clone());
		if let Some(timeout) = cfg.signer.timeout {
			signer = signer.with_timeout(timeout);
		}
		return Arc::new(signer);
	}

	match cfg.signer.signature.as_ref() {
		Some(signature) => Arc::new(StaticSigner::new(signature.expose())),
		None => {
			warn!("no [signer] configured; push connections will fail until one is set");
			Arc::new(StaticSigner::new(""))
		}
	}
}

async fn build_comment_sink(cfg: &ServerConfig) -> anyhow::Result<SharedCommentSink> {
	if !cfg.persistence.enabled {
		return Ok(Arc::new(NullCommentSink));
	}
	let Some(database_url) = cfg.persistence.database_url.as_deref() else {
		return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
	};
	let store = CommentStore::connect(database_url).await?;
	info!("comment persistence enabled");
	Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let args = parse_args();

	let config_path = match args.config.clone() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let mut douyin_cfg = server_cfg.douyin_config();
	douyin_cfg.log_unknown_methods |= args.log_unknown;

	let resolver = Arc::new(DouyinResolver::new(
		douyin_cfg.live_base_url.clone(),
		douyin_cfg.user_agent.clone(),
	));
	let signer = build_signer(&server_cfg);
	let sink = build_comment_sink(&server_cfg).await?;

	let deps = SessionDeps::new(douyin_cfg, resolver, signer, sink);
	let gateway = Gateway::new(deps, Subscribers::new(server_cfg.server.subscriber_queue_capacity));

	let health_state = HealthState::new(gateway.clone());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => match bind_health_server(addr, health_state.clone()).await {
				Ok(addr) => info!(%addr, "health server listening"),
				Err(e) => warn!(error = %e, %addr, "failed to start health server"),
			},
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let bind_addr = match args.bind {
		Some(addr) => addr,
		None => server_cfg.server.bind.as_deref().unwrap_or(DEFAULT_BIND).parse::<SocketAddr>()?,
	};
	let listener = TcpListener::bind(bind_addr).await?;

	health_state.mark_ready();

	tokio::select! {
		res = crate::server::http::serve(listener, gateway.clone()) => res?,
		_ = tokio::signal::ctrl_c() => {
			info!(active_rooms = gateway.registry().len(), "shutting down");
			for room in gateway.registry().active_rooms() {
				gateway.stop(room);
			}
		}
	}

	Ok(())
}
