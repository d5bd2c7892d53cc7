#![forbid(unsafe_code)]

use core::fmt;

/// Sub-message method names seen on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
	Chat,
	Gift,
	Like,
	Member,
	Social,
	RoomUserSeq,
	RoomStats,
	RoomRank,
	Fansclub,
	EmojiChat,
	Control,
	Unrecognized(String),
}

impl Method {
	pub fn parse(name: &str) -> Self {
		match name {
			"WebcastChatMessage" => Method::Chat,
			"WebcastGiftMessage" => Method::Gift,
			"WebcastLikeMessage" => Method::Like,
			"WebcastMemberMessage" => Method::Member,
			"WebcastSocialMessage" => Method::Social,
			"WebcastRoomUserSeqMessage" => Method::RoomUserSeq,
			"WebcastRoomStatsMessage" => Method::RoomStats,
			"WebcastRoomRankMessage" => Method::RoomRank,
			"WebcastFansclubMessage" => Method::Fansclub,
			"WebcastEmojiChatMessage" => Method::EmojiChat,
			"WebcastControlMessage" => Method::Control,
			other => Method::Unrecognized(other.to_string()),
		}
	}

	/// Wire name.
	pub fn as_str(&self) -> &str {
		match self {
			Method::Chat => "WebcastChatMessage",
			Method::Gift => "WebcastGiftMessage",
			Method::Like => "WebcastLikeMessage",
			Method::Member => "WebcastMemberMessage",
			Method::Social => "WebcastSocialMessage",
			Method::RoomUserSeq => "WebcastRoomUserSeqMessage",
			Method::RoomStats => "WebcastRoomStatsMessage",
			Method::RoomRank => "WebcastRoomRankMessage",
			Method::Fansclub => "WebcastFansclubMessage",
			Method::EmojiChat => "WebcastEmojiChatMessage",
			Method::Control => "WebcastControlMessage",
			Method::Unrecognized(name) => name,
		}
	}
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
