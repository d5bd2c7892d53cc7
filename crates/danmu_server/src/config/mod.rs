#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use danmu_platform::douyin::{DEFAULT_LIVE_BASE_URL, DEFAULT_PUSH_BASE_URL, DouyinConfig, RetryPolicy};
use danmu_platform::{ChatFilter, SecretString, filter::DEFAULT_MIN_CHARS};
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_BIND: &str = "0.0.0.0:18080";
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Default config path: `~/.danmu/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".danmu").join("config.toml"))
}

/// Load the server config from TOML, then apply `DANMU_*` env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub douyin: DouyinSettings,
	pub signer: SignerSettings,
	pub filter: FilterSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Gateway bind address (host:port).
	pub bind: Option<String>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Outbound queue size per gateway client.
	pub subscriber_queue_capacity: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			bind: None,
			metrics_bind: None,
			health_bind: None,
			subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct DouyinSettings {
	pub live_base_url: Option<String>,
	pub push_base_url: Option<String>,
	pub user_agent: Option<String>,
	pub log_unknown_methods: bool,

	/// Zero disables reconnecting.
	pub reconnect_max_attempts: u32,
	pub reconnect_min_delay: Option<Duration>,
	pub reconnect_max_delay: Option<Duration>,
}

/// Where push URL signatures come from.
#[derive(Debug, Clone, Default)]
pub struct SignerSettings {
	/// External signer program; takes precedence over `signature`.
	pub command: Option<PathBuf>,
	pub args: Vec<String>,
	pub timeout: Option<Duration>,
	/// Fixed signature value.
	pub signature: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct FilterSettings {
	pub min_chars: usize,
}

impl Default for FilterSettings {
	fn default() -> Self {
		Self {
			min_chars: DEFAULT_MIN_CHARS,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	pub enabled: bool,
	/// Database URL (sqlite:, postgres: or mysql:).
	pub database_url: Option<String>,
}

impl ServerConfig {
	/// Session settings derived from `[douyin]` and `[filter]`.
	pub fn douyin_config(&self) -> DouyinConfig {
		let defaults = RetryPolicy::disabled();
		DouyinConfig {
			live_base_url: self
				.douyin
				.live_base_url
				.clone()
				.unwrap_or_else(|| DEFAULT_LIVE_BASE_URL.to_string()),
			push_base_url: self
				.douyin
				.push_base_url
				.clone()
				.unwrap_or_else(|| DEFAULT_PUSH_BASE_URL.to_string()),
			user_agent: self.douyin.user_agent.clone(),
			retry: RetryPolicy {
				max_attempts: self.douyin.reconnect_max_attempts,
				min_delay: self.douyin.reconnect_min_delay.unwrap_or(defaults.min_delay),
				max_delay: self.douyin.reconnect_max_delay.unwrap_or(defaults.max_delay),
			},
			log_unknown_methods: self.douyin.log_unknown_methods,
			filter: ChatFilter::new(self.filter.min_chars),
			ws_connector: None,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	douyin: FileDouyinSettings,

	#[serde(default)]
	signer: FileSignerSettings,

	#[serde(default)]
	filter: FileFilterSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	subscriber_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDouyinSettings {
	live_base_url: Option<String>,
	push_base_url: Option<String>,
	user_agent: Option<String>,
	log_unknown_methods: Option<bool>,
	reconnect_max_attempts: Option<u32>,
	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSignerSettings {
	command: Option<String>,
	#[serde(default)]
	args: Vec<String>,
	timeout_ms: Option<u64>,
	signature: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileFilterSettings {
	min_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.filter(|s| !s.trim().is_empty())
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings {
				bind: non_empty(file.server.bind),
				metrics_bind: non_empty(file.server.metrics_bind),
				health_bind: non_empty(file.server.health_bind),
				subscriber_queue_capacity: file
					.server
					.subscriber_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(DEFAULT_SUBSCRIBER_QUEUE_CAPACITY),
			},
			douyin: DouyinSettings {
				live_base_url: non_empty(file.douyin.live_base_url),
				push_base_url: non_empty(file.douyin.push_base_url),
				user_agent: non_empty(file.douyin.user_agent),
				log_unknown_methods: file.douyin.log_unknown_methods.unwrap_or(false),
				reconnect_max_attempts: file.douyin.reconnect_max_attempts.unwrap_or(0),
				reconnect_min_delay: file.douyin.reconnect_min_delay_ms.map(Duration::from_millis),
				reconnect_max_delay: file.douyin.reconnect_max_delay_ms.map(Duration::from_millis),
			},
			signer: SignerSettings {
				command: non_empty(file.signer.command).map(PathBuf::from),
				args: file.signer.args,
				timeout: file.signer.timeout_ms.filter(|v| *v > 0).map(Duration::from_millis),
				signature: non_empty(file.signer.signature).map(SecretString::new),
			},
			filter: FilterSettings {
				min_chars: file.filter.min_chars.unwrap_or(DEFAULT_MIN_CHARS),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: non_empty(file.persistence.database_url),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let text = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = text("DANMU_BIND") {
		cfg.server.bind = Some(v);
		info!("server config: bind overridden by env");
	}

	if let Some(v) = text("DANMU_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = text("DANMU_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = text("DANMU_SUBSCRIBER_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.parse::<usize>()
		&& capacity > 0
	{
		cfg.server.subscriber_queue_capacity = capacity;
		info!(capacity, "server config: subscriber_queue_capacity overridden by env");
	}

	if let Some(v) = text("DANMU_DOUYIN_LIVE_BASE_URL") {
		cfg.douyin.live_base_url = Some(v);
		info!("douyin config: live_base_url overridden by env");
	}

	if let Some(v) = text("DANMU_DOUYIN_PUSH_BASE_URL") {
		cfg.douyin.push_base_url = Some(v);
		info!("douyin config: push_base_url overridden by env");
	}

	if let Some(v) = text("DANMU_DOUYIN_USER_AGENT") {
		cfg.douyin.user_agent = Some(v);
		info!("douyin config: user_agent overridden by env");
	}

	if let Some(v) = text("DANMU_LOG_UNKNOWN_METHODS")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.douyin.log_unknown_methods = enabled;
		info!(enabled, "douyin config: log_unknown_methods overridden by env");
	}

	if let Some(v) = text("DANMU_RECONNECT_MAX_ATTEMPTS")
		&& let Ok(attempts) = v.parse::<u32>()
	{
		cfg.douyin.reconnect_max_attempts = attempts;
		info!(attempts, "douyin config: reconnect_max_attempts overridden by env");
	}

	if let Some(v) = text("DANMU_RECONNECT_MIN_DELAY_MS")
		&& let Ok(min_ms) = v.parse::<u64>()
	{
		cfg.douyin.reconnect_min_delay = Some(Duration::from_millis(min_ms));
		info!(min_ms, "douyin config: reconnect_min_delay overridden by env");
	}

	if let Some(v) = text("DANMU_RECONNECT_MAX_DELAY_MS")
		&& let Ok(max_ms) = v.parse::<u64>()
	{
		cfg.douyin.reconnect_max_delay = Some(Duration::from_millis(max_ms));
		info!(max_ms, "douyin config: reconnect_max_delay overridden by env");
	}

	if let Some(v) = text("DANMU_SIGNER_COMMAND") {
		cfg.signer.command = Some(PathBuf::from(v));
		info!("signer config: command overridden by env");
	}

	if let Some(v) = text("DANMU_SIGNER_SIGNATURE") {
		cfg.signer.signature = Some(SecretString::new(v));
		info!("signer config: signature overridden by env");
	}

	if let Some(v) = text("DANMU_FILTER_MIN_CHARS")
		&& let Ok(min_chars) = v.parse::<usize>()
	{
		cfg.filter.min_chars = min_chars;
		info!(min_chars, "filter config: min_chars overridden by env");
	}

	if let Some(v) = text("DANMU_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Some(v) = text("DANMU_PERSISTENCE_DATABASE_URL") {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if let (Some(min), Some(max)) = (cfg.douyin.reconnect_min_delay, cfg.douyin.reconnect_max_delay)
		&& min > max
	{
		warn!(
			min_ms = min.as_millis(),
			max_ms = max.as_millis(),
			"douyin config: reconnect_min_delay > reconnect_max_delay; swapping"
		);
		cfg.douyin.reconnect_min_delay = Some(max);
		cfg.douyin.reconnect_max_delay = Some(min);
	}
}
