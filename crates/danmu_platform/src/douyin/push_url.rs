#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

/// Inputs of the push socket URL.
#[derive(Debug, Clone, Copy)]
pub struct PushUrlParams<'a> {
	pub push_room_id: &'a str,
	pub push_id: &'a str,
	pub user_agent: &'a str,
	pub signature: &'a str,
	pub now_ms: u64,
}

/// Current wall clock in epoch milliseconds.
pub fn unix_ms_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default()
}

/// `browser_version` query value: the user agent after `Mozilla`, without its
/// leading `/`, spaces encoded as `%20`.
pub fn browser_version(user_agent: &str) -> String {
	let tail = user_agent
		.split_once("Mozilla")
		.map(|(_, rest)| rest)
		.unwrap_or(user_agent);
	let mut chars = tail.chars();
	chars.next();
	chars.as_str().replace(' ', "%20")
}

/// Build the push socket URL.
///
/// The query string is matched byte for byte by the server; field order and
/// the constant values must not change.
pub fn build_push_url(base: &str, p: &PushUrlParams<'_>) -> String {
	let bv = browser_version(p.user_agent);
	let t = p.now_ms;
	let room = p.push_room_id;
	let push = p.push_id;
	let sig = p.signature;

	format!(
		"{base}?app_name=douyin_web&version_code=180800&webcast_sdk_version=1.0.14-beta.0\
		&update_version_code=1.0.14-beta.0&compress=gzip&device_platform=web&cookie_enabled=true\
		&screen_width=1920&screen_height=1080&browser_language=zh-CN&browser_platform=Win32\
		&browser_name=Mozilla&browser_version={bv}&browser_online=true&tz_name=Asia/Shanghai\
		&cursor=d-1_u-1_fh-7383731312643626035_t-1719159695790_r-1\
		&internal_ext=internal_src:dim|wss_push_room_id:{room}|wss_push_did:{push}|first_req_ms:{t}\
		|fetch_time:{t}|seq:1|wss_info:0-{t}-0-0|wrds_v:7382620942951772256\
		&host=https://live.douyin.com&aid=6383&live_id=1&did_rule=3&endpoint=live_pc&support_wrds=1\
		&user_unique_id={push}&im_path=/webcast/im/fetch/&identity=audience&need_persist_msg_count=15\
		&insert_task_id=&live_reason=&room_id={room}&heartbeatDuration=0&signature={sig}"
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	const UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

	#[test]
	fn browser_version_drops_prefix_and_encodes_spaces() {
		assert_eq!(
			browser_version(UA),
			"5.0%20(Windows%20NT%2010.0;%20Win64;%20x64)%20AppleWebKit/537.36%20(KHTML,%20like%20Gecko)%20Chrome/126.0.0.0%20Safari/537.36"
		);
		assert_eq!(browser_version("curl 8"), "url%208");
	}

	#[test]
	fn url_matches_expected_layout() {
		let url = build_push_url(
			"wss://webcast5-ws-web-lf.douyin.com/webcast/im/push/v2/",
			&PushUrlParams {
				push_room_id: "7380000000000000001",
				push_id: "7390000000000000002",
				user_agent: "Mozilla/5.0 (X11)",
				signature: "SIG",
				now_ms: 1719159695790,
			},
		);

		let expected = "wss://webcast5-ws-web-lf.douyin.com/webcast/im/push/v2/?app_name=douyin_web&version_code=180800&webcast_sdk_version=1.0.14-beta.0&update_version_code=1.0.14-beta.0&compress=gzip&device_platform=web&cookie_enabled=true&screen_width=1920&screen_height=1080&browser_language=zh-CN&browser_platform=Win32&browser_name=Mozilla&browser_version=5.0%20(X11)&browser_online=true&tz_name=Asia/Shanghai&cursor=d-1_u-1_fh-7383731312643626035_t-1719159695790_r-1&internal_ext=internal_src:dim|wss_push_room_id:7380000000000000001|wss_push_did:7390000000000000002|first_req_ms:1719159695790|fetch_time:1719159695790|seq:1|wss_info:0-1719159695790-0-0|wrds_v:7382620942951772256&host=https://live.douyin.com&aid=6383&live_id=1&did_rule=3&endpoint=live_pc&support_wrds=1&user_unique_id=7390000000000000002&im_path=/webcast/im/fetch/&identity=audience&need_persist_msg_count=15&insert_task_id=&live_reason=&room_id=7380000000000000001&heartbeatDuration=0&signature=SIG";
		assert_eq!(url, expected);
	}
}
