#![forbid(unsafe_code)]

use std::sync::LazyLock;

use regex::Regex;

/// Default minimum length, in characters, of a persisted comment.
pub const DEFAULT_MIN_CHARS: usize = 4;

static BRACKET_EMOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[.*?\]").expect("bracket emote regex"));
static SUPPLEMENTARY: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"[\x{10000}-\x{10FFFF}]").expect("supplementary plane regex"));
static LETTERS_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z]+$").expect("letters-only regex"));
static URL_LIKE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"https?://(?:[a-zA-Z0-9-]+\.)+[a-zA-Z]{2,}(?:/[^ \n]*)?|(?-u:\b)(?:\.com|www|.cn|.net)(?-u:\b)")
		.expect("url regex")
});

/// Reduces raw chat text to something worth persisting.
///
/// `filter` returns an empty string when the text is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatFilter {
	min_chars: usize,
}

impl Default for ChatFilter {
	fn default() -> Self {
		Self::new(DEFAULT_MIN_CHARS)
	}
}

impl ChatFilter {
	pub fn new(min_chars: usize) -> Self {
		Self { min_chars }
	}

	pub fn min_chars(&self) -> usize {
		self.min_chars
	}

	pub fn filter(&self, text: &str) -> String {
		let text = BRACKET_EMOTE.replace_all(text, "");
		let text = SUPPLEMENTARY.replace_all(&text, "");

		if text.chars().count() < self.min_chars {
			return String::new();
		}
		if LETTERS_ONLY.is_match(&text) {
			return String::new();
		}
		if URL_LIKE.is_match(&text) {
			return String::new();
		}

		text.into_owned()
	}

	pub fn accepts(&self, text: &str) -> bool {
		!self.filter(text).is_empty()
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn rejects_emoji_only() {
		assert_eq!(ChatFilter::default().filter("😀😀"), "");
	}

	#[test]
	fn rejects_short_letters() {
		assert_eq!(ChatFilter::default().filter("hello"), "");
		assert_eq!(ChatFilter::default().filter("abcdefghijk"), "");
	}

	#[test]
	fn rejects_urls_and_domain_tokens() {
		let f = ChatFilter::default();
		assert_eq!(f.filter("visit http://example.com now please"), "");
		assert_eq!(f.filter("去看看 www 这个地址吧"), "");
		assert_eq!(f.filter("快来 example.net 看直播"), "");
	}

	#[test]
	fn keeps_plain_cjk_sentence() {
		let f = ChatFilter::default();
		assert_eq!(f.filter("今天天气真好"), "今天天气真好");
		assert_eq!(
			f.filter("这是一个足够长的测试弹幕内容用于验证"),
			"这是一个足够长的测试弹幕内容用于验证"
		);
	}

	#[test]
	fn strips_bracket_emotes_and_emoji_before_measuring() {
		let f = ChatFilter::default();
		assert_eq!(f.filter("[捂脸][捂脸]哈哈"), "");
		assert_eq!(f.filter("[赞]主播唱得好听😀"), "主播唱得好听");
	}

	#[test]
	fn threshold_is_counted_in_characters() {
		let f = ChatFilter::new(4);
		assert_eq!(f.filter("好好好"), "");
		assert_eq!(f.filter("好好好好"), "好好好好");
		assert!(ChatFilter::new(0).accepts("a b"));
	}

	proptest! {
		#[test]
		fn filter_is_idempotent(s in "\\PC{0,24}|[a-z\\[\\] .😀中文]{0,24}") {
			let f = ChatFilter::default();
			let once = f.filter(&s);
			prop_assert_eq!(f.filter(&once), once);
		}
	}
}
