#![forbid(unsafe_code)]

use std::sync::LazyLock;

use anyhow::{Context, anyhow};
use danmu_domain::RoomId;
use rand::Rng;
use rand::seq::IndexedRandom;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{COOKIE, SET_COOKIE};
use tracing::debug;
use url::Url;

use crate::SecretString;

const AC_NONCE: &str = "0123407cc00a9e438deb4";
const MS_TOKEN_LEN: usize = 107;
const MS_TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789=_";

static ROOM_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"roomId\\":\\"(\d+)\\""#).expect("room id regex"));
static PUSH_ID_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"user_unique_id\\":\\"(\d+)\\""#).expect("push id regex"));

const USER_AGENTS: &[&str] = &[
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 Edg/125.0.0.0",
	"Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
	"Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
	"Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
];

/// Pick a desktop browser user agent.
pub fn random_user_agent() -> String {
	USER_AGENTS
		.choose(&mut rand::rng())
		.copied()
		.unwrap_or(USER_AGENTS[0])
		.to_string()
}

/// Random `msToken` cookie value of `len` characters.
pub fn generate_ms_token(len: usize) -> String {
	let mut rng = rand::rng();
	(0..len)
		.map(|_| MS_TOKEN_ALPHABET[rng.random_range(0..MS_TOKEN_ALPHABET.len())] as char)
		.collect()
}

/// Everything a session needs from the room page before dialing.
#[derive(Debug, Clone)]
pub struct RoomInfo {
	pub web_room_id: RoomId,
	/// Internal room id used on the push channel.
	pub push_room_id: String,
	/// Client id (`user_unique_id`) assigned to this visitor.
	pub push_id: String,
	pub ttwid: SecretString,
	pub user_agent: String,
}

/// Pre-connection lookup of a room.
#[async_trait::async_trait]
pub trait RoomResolver: Send + Sync + 'static {
	async fn resolve(&self, room: RoomId) -> anyhow::Result<RoomInfo>;
}

/// Resolves rooms by scraping `live.douyin.com`.
#[derive(Debug, Clone)]
pub struct DouyinResolver {
	live_base_url: String,
	user_agent: Option<String>,
}

impl DouyinResolver {
	pub fn new(live_base_url: impl Into<String>, user_agent: Option<String>) -> Self {
		Self {
			live_base_url: live_base_url.into(),
			user_agent,
		}
	}

	fn base_url(&self) -> anyhow::Result<Url> {
		let mut base = self.live_base_url.trim().to_string();
		if !base.ends_with('/') {
			base.push('/');
		}
		Url::parse(&base).with_context(|| format!("invalid live base url: {base}"))
	}

	async fn fetch_ttwid(&self, http: &reqwest::Client, base: &Url) -> anyhow::Result<SecretString> {
		let resp = http.get(base.clone()).send().await.context("douyin live page send")?;
		let status = resp.status();

		resp.headers()
			.get_all(SET_COOKIE)
			.iter()
			.filter_map(|v| v.to_str().ok())
			.find_map(|v| cookie_value(v, "ttwid"))
			.map(|v| SecretString::new(v.to_string()))
			.ok_or_else(|| anyhow!("ttwid cookie not found (status={status})"))
	}

	async fn fetch_room_page(
		&self,
		http: &reqwest::Client,
		base: &Url,
		room: RoomId,
		ttwid: &SecretString,
	) -> anyhow::Result<String> {
		let url = base.join(&room.to_string()).context("build room page url")?;
		let cookie = format!(
			"ttwid=ttwid={}&msToken={}; __ac_nonce={}",
			ttwid.expose(),
			generate_ms_token(MS_TOKEN_LEN),
			AC_NONCE
		);

		let resp = http
			.get(url)
			.header(COOKIE, cookie)
			.send()
			.await
			.context("douyin room page send")?;

		match resp.status() {
			StatusCode::OK => resp.text().await.context("douyin room page body"),
			status => Err(anyhow!("douyin room page failed: status={status}")),
		}
	}
}

#[async_trait::async_trait]
impl RoomResolver for DouyinResolver {
	async fn resolve(&self, room: RoomId) -> anyhow::Result<RoomInfo> {
		let user_agent = self
			.user_agent
			.clone()
			.filter(|ua| !ua.trim().is_empty())
			.unwrap_or_else(random_user_agent);

		let http = reqwest::Client::builder()
			.user_agent(user_agent.clone())
			.build()
			.context("build reqwest client")?;

		let base = self.base_url()?;
		let ttwid = self.fetch_ttwid(&http, &base).await?;
		let page = self.fetch_room_page(&http, &base, room, &ttwid).await?;

		let (push_room_id, push_id) = parse_room_page(&page)?;
		debug!(%room, %push_room_id, "resolved douyin room");

		Ok(RoomInfo {
			web_room_id: room,
			push_room_id,
			push_id,
			ttwid,
			user_agent,
		})
	}
}

/// Extract `(push_room_id, push_id)` from the room page HTML.
pub(crate) fn parse_room_page(page: &str) -> anyhow::Result<(String, String)> {
	let room_id = ROOM_ID_RE
		.captures(page)
		.and_then(|c| c.get(1))
		.map(|m| m.as_str().to_string())
		.ok_or_else(|| anyhow!("roomId not found in room page"))?;
	let push_id = PUSH_ID_RE
		.captures(page)
		.and_then(|c| c.get(1))
		.map(|m| m.as_str().to_string())
		.ok_or_else(|| anyhow!("user_unique_id not found in room page"))?;
	Ok((room_id, push_id))
}

/// Value of cookie `name` in a `Set-Cookie` header.
pub(crate) fn cookie_value<'a>(set_cookie: &'a str, name: &str) -> Option<&'a str> {
	let pair = set_cookie.split(';').next()?.trim();
	let (k, v) = pair.split_once('=')?;
	(k.trim() == name && !v.is_empty()).then_some(v.trim())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ms_token_has_requested_length_and_alphabet() {
		let token = generate_ms_token(MS_TOKEN_LEN);
		assert_eq!(token.len(), 107);
		assert!(token.bytes().all(|b| MS_TOKEN_ALPHABET.contains(&b)));
	}

	#[test]
	fn random_user_agent_is_a_mozilla_string() {
		let ua = random_user_agent();
		assert!(ua.starts_with("Mozilla/5.0 ("));
	}

	#[test]
	fn parses_escaped_ids_from_page() {
		let page = r#"<script>self.__pace_f.push([1,"{\"state\":{\"roomStore\":{\"roomInfo\":{\"roomId\":\"7380000000000000001\",\"web_rid\":\"123\"}},\"userStore\":{\"odin\":{\"user_unique_id\":\"7390000000000000002\"}}}}"])</script>"#;
		let (room, push) = parse_room_page(page).expect("parse");
		assert_eq!(room, "7380000000000000001");
		assert_eq!(push, "7390000000000000002");
	}

	#[test]
	fn missing_ids_are_errors() {
		assert!(parse_room_page("<html></html>").is_err());
		assert!(parse_room_page(r#"roomId\":\"1\""#).is_err());
	}

	#[test]
	fn cookie_value_reads_first_pair_only() {
		assert_eq!(
			cookie_value("ttwid=1%7Cabc; Path=/; Domain=douyin.com; HttpOnly", "ttwid"),
			Some("1%7Cabc")
		);
		assert_eq!(cookie_value("other=1; ttwid=2", "ttwid"), None);
		assert_eq!(cookie_value("ttwid=; Path=/", "ttwid"), None);
	}
}
